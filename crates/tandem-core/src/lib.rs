//! Tandem Core - Foundation Types for the Tandem Collective Harness
//!
//! Provides the small tensor layer shared by every Tandem crate: a dense
//! row-major `Array`, the runtime `DType`, a seeded random source that workers
//! and the verifier both draw from, and numpy-style tolerance comparison.
//!
//! # Key Features
//! - `Array<T>` with row slicing, stacking and 2-D matmul
//! - `SeededRng` so expected values can be rebuilt from a seed alone
//! - `Tolerance` / `check_close` with readable mismatch reports
//!
//! # Example
//! ```rust
//! use tandem_core::{Array, SeededRng, Tolerance, check_close};
//!
//! let a = SeededRng::new(7).uniform(&[2, 3]);
//! let b = SeededRng::new(7).uniform(&[2, 3]);
//! assert!(check_close(&a, &b, Tolerance::default()).is_ok());
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_range_loop)]

pub mod array;
pub mod compare;
pub mod dtype;
pub mod error;
pub mod random;

pub use array::{checked_numel, Array};
pub use compare::{allclose, check_close, check_close_abs, Discrepancy, Tolerance};
pub use dtype::{DType, Scalar};
pub use error::{Error, Result};
pub use random::SeededRng;
