//! Tandem Worker - Collective Worker Process
//!
//! Spawned by the harness, once per rank. Writes its encoded result to stdout
//! and logs to stderr.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use clap::Parser;
use colored::Colorize;
use tandem_harness::{init_tracing, worker_main, WorkerArgs};

/// Runs one collective as one rank of a two-process group.
#[derive(Parser, Debug)]
#[command(name = "tandem-worker", version, about)]
struct Cli {
    #[command(flatten)]
    args: WorkerArgs,
}

fn main() {
    init_tracing("tandem_harness=info,tandem_distributed=info");
    let cli = Cli::parse();
    if let Err(e) = worker_main(cli.args) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
