//! Fuse Scan - Randomized Check of the flatten2 + matmul Pass
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_fusion::{CaseOutcome, Flatten2MatmulCase, PassAutoScan};

use super::utils::{print_header, print_kv, print_success, print_warning};
use crate::cli::FuseScanArgs;
use crate::error::{CliError, CliResult};

/// Execute the fuse-scan command
pub fn execute(args: FuseScanArgs, quiet: bool) -> CliResult<()> {
    let stats = PassAutoScan::new(["flatten2_matmul_fuse_pass"])
        .with_max_examples(args.examples)
        .with_seed(args.seed)
        .run(&Flatten2MatmulCase)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if !quiet {
        print_header("flatten2_matmul_fuse_pass");
        print_kv("examples", &stats.examples.to_string());
        print_kv("passed", &stats.passed.to_string());
        print_kv("ignored", &stats.ignored.to_string());
        print_kv("failed", &stats.failed.to_string());
        for report in &stats.reports {
            if let CaseOutcome::Failed { reason } = &report.outcome {
                print_warning(&format!("case {}: {}", report.index, reason));
            }
        }
        if stats.is_success() {
            println!();
            print_success("fused programs match the reference");
        }
    }

    if stats.is_success() {
        Ok(())
    } else {
        Err(CliError::CheckFailed(format!(
            "{} of {} cases failed, {} passed",
            stats.failed, stats.examples, stats.passed
        )))
    }
}
