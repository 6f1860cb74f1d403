//! Harness Error Types
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::io;

use tandem_core::Tolerance;
use tandem_distributed::CommError;
use thiserror::Error;

/// Exit status and log of a worker stopped after another rank failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    /// Rank of the worker.
    pub rank: usize,
    /// Exit status, or how the worker was stopped.
    pub status: String,
    /// Contents of the worker's log file.
    pub stderr: String,
}

fn format_peers(peers: &[PeerReport]) -> String {
    peers
        .iter()
        .map(|p| format!("\n--- worker {} ({}) stderr ---\n{}", p.rank, p.status, p.stderr))
        .collect()
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors raised while preparing, running or checking a collective run.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// No free port could be reserved.
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    /// A worker process could not be started.
    #[error("Failed to launch worker {rank}: {source}")]
    WorkerLaunch {
        /// Rank of the worker.
        rank: usize,
        /// Spawn error.
        source: io::Error,
    },

    /// A worker exited unsuccessfully.
    #[error(
        "Worker {rank} exited with {status}\n--- worker {rank} stderr ---\n{stderr}{}",
        format_peers(.peers)
    )]
    WorkerCrash {
        /// Rank of the worker.
        rank: usize,
        /// Exit status as reported by the OS.
        status: String,
        /// Contents of the worker's log file.
        stderr: String,
        /// How every other unfinished worker ended, with its log.
        peers: Vec<PeerReport>,
    },

    /// A worker's stdout could not be decoded.
    #[error("Malformed output from worker {rank}: {reason} (starts with {preview:?})")]
    MalformedOutput {
        /// Rank of the worker.
        rank: usize,
        /// What was wrong.
        reason: String,
        /// First bytes of the output, lossily decoded.
        preview: String,
    },

    /// A worker result could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// A result disagreed with its reference.
    #[error("{op} rank {rank} {label}: {detail} (tolerance {tolerance})")]
    ResultMismatch {
        /// Collective name.
        op: String,
        /// Rank of the worker.
        rank: usize,
        /// Which part of the result.
        label: String,
        /// First mismatch and summary.
        detail: String,
        /// Tolerance used.
        tolerance: Tolerance,
    },

    /// Worker parameters are inconsistent.
    #[error("Invalid worker spec: {0}")]
    InvalidSpec(String),

    /// A run stepped outside its state machine.
    #[error("Invalid run transition {from} -> {to}")]
    InvalidTransition {
        /// State before.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File or pipe I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Collective communication error.
    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    /// Tensor error.
    #[error("Tensor error: {0}")]
    Tensor(#[from] tandem_core::Error),
}

impl From<toml::de::Error> for HarnessError {
    fn from(e: toml::de::Error) -> Self {
        HarnessError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for HarnessError {
    fn from(e: toml::ser::Error) -> Self {
        HarnessError::Config(e.to_string())
    }
}
