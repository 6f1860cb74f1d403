//! CLI - Command Line Interface Definitions
//!
//! Defines the CLI structure using clap derive macros.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tandem_harness::{BackendKind, CollectiveKind, ExecutionMode, WorkerArgs};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Tandem - two-process checks for collective communication
#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    author = "AutomataNexus Development Team",
    version,
    about = "Tandem CLI - Run collectives across two processes and verify the results",
    long_about = "Tandem launches two worker processes, runs one collective operation in each, \
                  and checks both results against a reference recomputed from the workers' seeds."
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run collectives across two worker processes and verify them
    Check(CheckArgs),

    /// Run as one worker rank
    Worker(WorkerArgs),

    /// List supported collectives
    Ops(OpsArgs),

    /// Scan the flatten2 + matmul fuse pass on random programs
    FuseScan(FuseScanArgs),
}

// =============================================================================
// Check Arguments
// =============================================================================

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Collective to run
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    pub op: Option<CollectiveKind>,

    /// Run every collective
    #[arg(long)]
    pub all: bool,

    /// Transport: mesh, ring or none
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Execution mode: graph or eager
    #[arg(short, long)]
    pub mode: Option<ExecutionMode>,

    /// API layer: 0 process group, 1 raw backend
    #[arg(long)]
    pub path_id: Option<u32>,

    /// Base seed; rank r uses seed + r (defaults to worker process ids)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Configuration file (defaults to ./tandem.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for worker logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Ops Arguments
// =============================================================================

/// Arguments for the ops command
#[derive(Args, Debug)]
pub struct OpsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Fuse Scan Arguments
// =============================================================================

/// Arguments for the fuse-scan command
#[derive(Args, Debug)]
pub struct FuseScanArgs {
    /// Number of programs to draw
    #[arg(short = 'n', long, default_value = "50")]
    pub examples: usize,

    /// Seed for the draws
    #[arg(short, long, default_value = "0")]
    pub seed: u64,

    /// Print the scan statistics as JSON
    #[arg(long)]
    pub json: bool,
}
