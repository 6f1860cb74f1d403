//! Launcher - Worker Process Management
//!
//! Spawns one worker process per [`WorkerSpec`]. Every rank's command is built
//! by the same function; stdout is piped back to the harness and stderr goes
//! to a per-rank log file that is attached to any crash report.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::TuningFlags;
use crate::error::{HarnessError, HarnessResult, PeerReport};
use crate::spec::WorkerSpec;

// =============================================================================
// Worker Command
// =============================================================================

/// Executable that runs a worker, plus arguments placed before the worker flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProgram {
    /// Path to the executable.
    pub path: PathBuf,
    /// Arguments preceding the worker arguments, such as a subcommand.
    pub leading_args: Vec<String>,
}

impl WorkerProgram {
    /// A dedicated worker binary.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            leading_args: Vec::new(),
        }
    }

    /// Adds a leading argument.
    pub fn with_leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

/// Everything needed to spawn one rank.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Executable.
    pub program: PathBuf,
    /// Full argument list.
    pub args: Vec<String>,
    /// Extra environment.
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Builds the command for `spec`; the same for every rank.
    pub fn build(program: &WorkerProgram, spec: &WorkerSpec, tuning: &TuningFlags, connect_timeout_secs: u64) -> Self {
        let mut args = program.leading_args.clone();
        args.extend(spec.to_args());
        args.push("--connect-timeout-secs".to_string());
        args.push(connect_timeout_secs.to_string());
        Self {
            program: program.path.clone(),
            args,
            env: tuning.env_pairs(),
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Log file of `rank` for the harness with process id `harness_pid`.
pub fn log_path(log_dir: &Path, rank: usize, harness_pid: u32) -> PathBuf {
    log_dir.join(format!("tandem_tr{}_err_{}.log", rank, harness_pid))
}

// =============================================================================
// Worker Handle
// =============================================================================

/// A running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Rank.
    pub rank: usize,
    /// OS process id.
    pub pid: u32,
    /// Where the worker's stderr goes.
    pub log_path: PathBuf,
    child: Child,
}

impl WorkerHandle {
    /// Waits for exit and returns everything written to stdout.
    ///
    /// A non-zero exit becomes [`HarnessError::WorkerCrash`] carrying the log.
    pub fn collect(self) -> HarnessResult<Vec<u8>> {
        let output = self.child.wait_with_output()?;
        debug!(rank = self.rank, status = %output.status, bytes = output.stdout.len(), "worker exited");
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(HarnessError::WorkerCrash {
            rank: self.rank,
            status: output.status.to_string(),
            stderr: read_log(&self.log_path),
            peers: Vec::new(),
        })
    }

    /// Gives the worker `grace` to exit on its own, kills it if it has not,
    /// and reports how it ended along with its log.
    pub fn reap(mut self, grace: Duration) -> PeerReport {
        let deadline = Instant::now() + grace;
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status.to_string(),
                Ok(None) if Instant::now() < deadline => thread::sleep(REAP_POLL),
                Ok(None) => {
                    if let Err(e) = self.child.kill() {
                        warn!(rank = self.rank, error = %e, "failed to kill worker");
                    }
                    break match self.child.wait() {
                        Ok(status) => format!("killed after {:?} ({})", grace, status),
                        Err(e) => format!("killed after {:?}, not reaped: {}", grace, e),
                    };
                }
                Err(e) => break format!("unknown: {}", e),
            }
        };
        debug!(rank = self.rank, %status, "worker reaped");
        PeerReport {
            rank: self.rank,
            status,
            stderr: read_log(&self.log_path),
        }
    }

    /// Kills the worker and reaps it.
    pub fn kill(mut self) {
        if let Err(e) = self.child.kill() {
            warn!(rank = self.rank, error = %e, "failed to kill worker");
        }
        if let Err(e) = self.child.wait() {
            warn!(rank = self.rank, error = %e, "failed to reap worker");
        }
    }
}

const REAP_POLL: Duration = Duration::from_millis(20);

fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| format!("<could not read {}: {}>", path.display(), e))
}

// =============================================================================
// Launcher
// =============================================================================

/// Starts worker processes.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: WorkerProgram,
    tuning: TuningFlags,
    log_dir: PathBuf,
    connect_timeout_secs: u64,
}

impl Launcher {
    /// Creates a launcher writing logs under `log_dir`.
    pub fn new(program: WorkerProgram, tuning: TuningFlags, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program,
            tuning,
            log_dir: log_dir.into(),
            connect_timeout_secs: 30,
        }
    }

    /// Sets how long workers keep dialing peers.
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Spawns every spec before waiting on any.
    ///
    /// If a spawn fails, workers already started are killed.
    pub fn launch(&self, specs: &[WorkerSpec]) -> HarnessResult<Vec<WorkerHandle>> {
        std::fs::create_dir_all(&self.log_dir)?;
        let harness_pid = std::process::id();
        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.spawn(spec, harness_pid) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for started in handles {
                        started.kill();
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    fn spawn(&self, spec: &WorkerSpec, harness_pid: u32) -> HarnessResult<WorkerHandle> {
        let rank = spec.rank;
        let log_path = log_path(&self.log_dir, rank, harness_pid);
        let log = File::create(&log_path).map_err(|source| HarnessError::WorkerLaunch { rank, source })?;
        let command = WorkerCommand::build(&self.program, spec, &self.tuning, self.connect_timeout_secs);
        let child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|source| HarnessError::WorkerLaunch { rank, source })?;
        let pid = child.id();
        info!(rank, pid, log = %log_path.display(), "worker launched");
        Ok(WorkerHandle {
            rank,
            pid,
            log_path,
            child,
        })
    }
}
