//! Worker - Run One Worker Rank
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_harness::{worker_main, WorkerArgs};

use crate::error::CliResult;

/// Execute the worker command
pub fn execute(args: WorkerArgs) -> CliResult<()> {
    worker_main(args)?;
    Ok(())
}
