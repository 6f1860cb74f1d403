//! Check - Run and Verify Collectives
//!
//! Launches this same executable as both worker ranks (`tandem worker ...`)
//! and verifies each requested collective.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::{Path, PathBuf};

use anyhow::Context;
use tandem_harness::{CollectiveKind, Harness, HarnessConfig, RunReport, RunRequest, WorkerProgram};
use tracing::debug;

use super::utils::{print_header, print_info, print_kv, print_success};
use crate::cli::CheckArgs;
use crate::error::{CliError, CliResult};

const DEFAULT_CONFIG: &str = "tandem.toml";

// =============================================================================
// Configuration
// =============================================================================

fn load_config(path: Option<&Path>) -> CliResult<HarnessConfig> {
    let config = match path {
        Some(p) if !p.exists() => {
            return Err(CliError::Config(format!("{} does not exist", p.display())));
        }
        Some(p) => load_file(p)?,
        None if Path::new(DEFAULT_CONFIG).exists() => load_file(Path::new(DEFAULT_CONFIG))?,
        None => HarnessConfig::default(),
    };
    Ok(config)
}

fn load_file(path: &Path) -> CliResult<HarnessConfig> {
    HarnessConfig::load(path).map_err(|e| CliError::Config(format!("{}: {}", path.display(), e)))
}

/// Applies command-line overrides on top of the file configuration.
fn resolve_config(args: &CheckArgs) -> CliResult<HarnessConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(path_id) = args.path_id {
        config.path_id = path_id;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    Ok(config)
}

fn selected_ops(args: &CheckArgs) -> CliResult<Vec<CollectiveKind>> {
    if args.all {
        return Ok(CollectiveKind::ALL.to_vec());
    }
    args.op
        .map(|op| vec![op])
        .ok_or_else(|| CliError::InvalidArgument("pass --op <OP> or --all".to_string()))
}

fn worker_program() -> CliResult<WorkerProgram> {
    let exe: PathBuf = std::env::current_exe().context("locating the tandem executable")?;
    Ok(WorkerProgram::new(exe).with_leading_arg("worker"))
}

// =============================================================================
// Execution
// =============================================================================

/// Execute the check command
pub fn execute(args: CheckArgs, quiet: bool) -> CliResult<()> {
    let config = resolve_config(&args)?;
    let ops = selected_ops(&args)?;
    debug!(?config, ?ops, "check configuration");

    let harness = Harness::new(config.clone(), worker_program()?);
    let mut reports = Vec::with_capacity(ops.len());
    if !quiet && !args.json {
        print_header("Tandem collective check");
        print_kv("backend", &config.backend.to_string());
        print_kv("mode", &config.mode.to_string());
        print_kv("path_id", &config.path_id.to_string());
        print_kv("log dir", &config.log_dir.display().to_string());
        if config.seed.is_none() {
            print_info("seeds default to worker process ids");
        }
        println!();
    }

    for op in ops {
        let report = harness.run(&RunRequest::from_config(&config, op))?;
        if !quiet && !args.json {
            print_report(&report);
        }
        reports.push(report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if !quiet {
        println!();
        print_success(&format!("{} collective(s) verified", reports.len()));
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let seeds: Vec<String> = report.seeds.iter().map(ToString::to_string).collect();
    let checked = report.verdict.ranks.iter().filter(|r| r.checked).count();
    print_success(&format!(
        "{} ({} ranks checked, seeds {}, {})",
        report.request.op,
        checked,
        seeds.join("/"),
        report.verdict.tolerance
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_harness::{BackendKind, ExecutionMode};
    use tempfile::TempDir;

    fn args() -> CheckArgs {
        CheckArgs {
            op: Some(CollectiveKind::Scatter),
            all: false,
            backend: None,
            mode: None,
            path_id: None,
            seed: None,
            config: None,
            log_dir: None,
            json: false,
        }
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tandem.toml");
        std::fs::write(&path, "backend = \"ring\"\nmode = \"eager\"\nseed = 5\n").unwrap();
        let mut a = args();
        a.config = Some(path);
        a.mode = Some(ExecutionMode::Graph);
        let config = resolve_config(&a).unwrap();
        assert_eq!(config.backend, BackendKind::Ring);
        assert_eq!(config.mode, ExecutionMode::Graph);
        assert_eq!(config.seed, Some(5));
    }

    #[test]
    fn test_missing_config_file() {
        let mut a = args();
        a.config = Some(PathBuf::from("/definitely/not/here/tandem.toml"));
        assert!(matches!(resolve_config(&a), Err(CliError::Config(_))));
    }

    #[test]
    fn test_malformed_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tandem.toml");
        std::fs::write(&path, "backend = [").unwrap();
        let mut a = args();
        a.config = Some(path);
        assert!(matches!(resolve_config(&a), Err(CliError::Config(_))));
    }

    #[test]
    fn test_all_selects_every_op() {
        let mut a = args();
        a.all = true;
        a.op = None;
        assert_eq!(selected_ops(&a).unwrap().len(), 12);
    }
}
