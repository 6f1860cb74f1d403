//! Tandem Harness - Two-Process Collective Checks
//!
//! Runs one collective operation across two real worker processes and checks
//! both results against a reference recomputed from the workers' seeds.
//!
//! # Flow
//!
//! 1. [`PortAllocator`] reserves two local rendezvous endpoints
//! 2. [`Launcher`] spawns both workers with their own [`WorkerSpec`]
//! 3. Each worker joins the TCP group, runs the collective in graph or eager
//!    mode and writes an encoded [`WorkerResult`] to stdout
//! 4. The outputs are decoded and [`verify`] compares them with the reference
//!
//! # Example
//!
//! ```no_run
//! use tandem_harness::{CollectiveKind, Harness, HarnessConfig, RunRequest, WorkerProgram};
//!
//! let config = HarnessConfig::default();
//! let harness = Harness::new(config.clone(), WorkerProgram::new("target/debug/tandem-worker"));
//! let report = harness
//!     .run(&RunRequest::from_config(&config, CollectiveKind::Allreduce))
//!     .unwrap();
//! println!("{:?}", report.history);
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
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod graph;
pub mod harness;
pub mod launcher;
pub mod ops;
pub mod payload;
pub mod port;
pub mod recipe;
pub mod reference;
pub mod spec;
pub mod telemetry;
pub mod verify;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{HarnessConfig, TuningFlags};
pub use endpoint::{join_endpoints, parse_endpoints, Endpoint};
pub use error::{HarnessError, HarnessResult, PeerReport};
pub use harness::{Harness, RunReport, RunRequest, RunState, RunTracker};
pub use launcher::{Launcher, WorkerCommand, WorkerHandle, WorkerProgram};
pub use payload::{decode, encode, Payload, WorkerResult, MAGIC};
pub use port::PortAllocator;
pub use spec::{BackendKind, CollectiveKind, ExecutionMode, WorkerArgs, WorkerSpec, WORLD_SIZE};
pub use telemetry::init_tracing;
pub use verify::{verify, RankVerdict, Verdict};
pub use worker::{execute, run_worker, worker_main};
