//! Tandem Distributed - Collective Communication Runtime
//!
//! The communication layer the Tandem harness drives: a `Backend` trait with
//! point-to-point messaging and default collectives, an in-process backend for
//! threaded tests, and a TCP backend for real multi-process groups.
//!
//! # Features
//!
//! ## Communication
//! - **Collective Operations**: all-reduce, all-gather, broadcast, reduce,
//!   scatter, all-to-all (variable size), barrier
//! - **Point-to-Point**: tagged send / recv
//! - **Topologies**: direct mesh exchange, or ring all-reduce / all-gather
//!
//! ## Model Parallelism
//! - **Expert routing** - `global_scatter` / `global_gather` with backward
//! - **Tensor Parallelism** - column / row parallel linear, parallel embedding
//!
//! # Example
//!
//! ```rust
//! use tandem_core::Array;
//! use tandem_distributed::prelude::*;
//!
//! let world = World::local();
//! let mut t = Array::from_vec(vec![1.0, 2.0], &[2]).unwrap();
//! all_reduce_sum(&mut t, world.default_group()).unwrap();
//! assert_eq!(t.to_vec(), vec![1.0, 2.0]);
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
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]

pub mod backend;
pub mod comm;
pub mod error;
pub mod mailbox;
pub mod mesh;
pub mod moe;
pub mod parallel;
pub mod process_group;
pub mod ring;
pub mod tcp;
pub mod wire;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{Backend, LocalBackend, ReduceOp, Tag, COLLECTIVE_TAG_BIT};
pub use comm::{
    all_gather, all_gather_rows, all_reduce_max, all_reduce_mean, all_reduce_sum, all_to_all,
    barrier, broadcast, broadcast_from, is_main_process, reduce_sum, scatter,
};
pub use error::{CommError, CommResult};
pub use moe::{exchange_expert_counts, global_gather, global_scatter};
pub use parallel::{ColumnParallelLinear, ParallelEmbedding, RowParallelLinear};
pub use process_group::{ProcessGroup, World};
pub use tcp::{RendezvousConfig, TcpBackend, Topology};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for distributed code.
pub mod prelude {
    pub use crate::{
        all_gather, all_reduce_sum, barrier, broadcast, broadcast_from, Backend, CommError,
        CommResult, LocalBackend, ProcessGroup, ReduceOp, RendezvousConfig, TcpBackend, Topology,
        World,
    };
}
