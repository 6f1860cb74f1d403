//! Tandem Fusion - Program Rewrites and Their Auto-Scan
//!
//! A small program IR with a reference executor, fusion passes over it and a
//! randomized scan that checks a pass keeps programs numerically equivalent.
//!
//! - **flatten2 + matmul**: rewritten to a single `mul`
//! - **mul + elementwise_add**: lowered to `fc`, run by [`FusedLinear`]
//! - **Auto-scan**: random programs, ignore rules for known-bad configurations
//!
//! # Example
//! ```rust
//! use tandem_fusion::{Flatten2MatmulCase, PassAutoScan};
//!
//! let stats = PassAutoScan::new(["flatten2_matmul_fuse_pass"])
//!     .with_max_examples(5)
//!     .run(&Flatten2MatmulCase)
//!     .unwrap();
//! assert_eq!(stats.failed, 0);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod autoscan;
pub mod engine;
pub mod error;
pub mod executor;
pub mod linear;
pub mod pass;
pub mod program;

pub use autoscan::{
    AutoScanCase, CaseOutcome, CaseReport, Flatten2MatmulCase, IgnoreReason, IgnoreRule,
    PassAutoScan, PredictorCase, ScanStats,
};
pub use engine::{EngineConfig, Predictor};
pub use error::{FusionError, FusionResult};
pub use executor::Executor;
pub use linear::FusedLinear;
pub use pass::{
    pass_by_name, FcFusePass, Flatten2MatmulFusePass, FusePass, OptimizationStats, PassManager,
    REGISTERED_PASSES,
};
pub use program::{OpDesc, OpKind, Program, ProgramConfig, Scope, TensorConfig};

// =============================================================================
// Fused Operation Trait
// =============================================================================

use std::fmt::Debug;
use tandem_core::Array;

/// Trait for fused kernels.
pub trait FusedOp: Debug + Send + Sync {
    /// Executes the fused kernel.
    fn execute(&self, inputs: &[&Array]) -> FusionResult<Array>;

    /// Returns the name of the kernel.
    fn name(&self) -> &str;

    /// Returns the number of ops the kernel replaces.
    fn num_ops(&self) -> usize;
}
