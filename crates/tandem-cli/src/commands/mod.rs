//! Commands - CLI Command Implementations
//!
//! This module contains the implementations for all CLI commands.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

pub mod check;
pub mod fuse_scan;
pub mod ops;
pub mod utils;
pub mod worker;
