//! Tandem CLI - Command Line Interface for Tandem
//!
//! The main entry point for the `tandem` command-line tool.
//!
//! # Commands
//! - `tandem check` - Run collectives across two worker processes and verify them
//! - `tandem worker` - Run as one worker rank (spawned by `check`)
//! - `tandem ops` - List the supported collectives
//! - `tandem fuse-scan` - Scan the flatten2 + matmul fuse pass on random programs
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// CLI-specific allowances
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unnecessary_wraps)]

use clap::Parser;
use colored::Colorize;

mod cli;
mod commands;
mod error;

use cli::{Cli, Commands};
use error::CliResult;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let default_filter = match (&cli.command, cli.verbose) {
        (Commands::Worker(_), _) => "tandem_harness=info,tandem_distributed=info",
        (_, true) => "debug",
        (_, false) => "warn",
    };
    tandem_harness::init_tracing(default_filter);

    match cli.command {
        Commands::Check(args) => commands::check::execute(args, cli.quiet),
        Commands::Worker(args) => commands::worker::execute(args),
        Commands::Ops(args) => commands::ops::execute(args),
        Commands::FuseScan(args) => commands::fuse_scan::execute(args, cli.quiet),
    }
}
