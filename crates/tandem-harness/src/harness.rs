//! Harness - One Collective Run End to End
//!
//! Allocates rendezvous ports, launches both workers, collects their outputs
//! in rank order and verifies them. Each run walks a fixed state machine;
//! any failed step moves it to `Failed` and the error is returned as is.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::endpoint::Endpoint;
use crate::error::{HarnessError, HarnessResult, PeerReport};
use crate::launcher::{Launcher, WorkerHandle, WorkerProgram};
use crate::payload::{decode, WorkerResult};
use crate::port::PortAllocator;
use crate::spec::{BackendKind, CollectiveKind, ExecutionMode, WorkerSpec, WORLD_SIZE};
use crate::verify::{verify, Verdict};

// =============================================================================
// Run State
// =============================================================================

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing done yet.
    Init,
    /// Endpoints reserved.
    PortsAllocated,
    /// Both workers spawned.
    WorkersLaunched,
    /// Both outputs decoded.
    OutputsCollected,
    /// Results matched the reference.
    Verified,
    /// A step failed.
    Failed,
}

impl RunState {
    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::PortsAllocated)
                | (Self::PortsAllocated, Self::WorkersLaunched)
                | (Self::WorkersLaunched, Self::OutputsCollected)
                | (Self::OutputsCollected, Self::Verified)
                | (
                    Self::Init | Self::PortsAllocated | Self::WorkersLaunched | Self::OutputsCollected,
                    Self::Failed
                )
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::PortsAllocated => "ports_allocated",
            RunState::WorkersLaunched => "workers_launched",
            RunState::OutputsCollected => "outputs_collected",
            RunState::Verified => "verified",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State plus every state visited.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self {
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }
}

impl RunTracker {
    /// Starts at `Init`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// States visited, oldest first.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: RunState) -> HarnessResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(HarnessError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

// =============================================================================
// Requests and Reports
// =============================================================================

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    /// Collective.
    pub op: CollectiveKind,
    /// Transport.
    pub backend: BackendKind,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// API layer.
    pub path_id: u32,
    /// Base seed; process ids when absent.
    pub seed: Option<u64>,
}

impl RunRequest {
    /// A request for `op` using the config's defaults.
    pub fn from_config(config: &HarnessConfig, op: CollectiveKind) -> Self {
        Self {
            op,
            backend: config.backend,
            mode: config.mode,
            path_id: config.path_id,
            seed: config.seed,
        }
    }

    /// Builds the worker spec of every rank.
    pub fn worker_specs(&self, endpoints: &[Endpoint]) -> Vec<WorkerSpec> {
        (0..endpoints.len())
            .map(|rank| WorkerSpec {
                rank,
                world_size: endpoints.len(),
                endpoints: endpoints.to_vec(),
                backend: self.backend,
                op: self.op,
                mode: self.mode,
                path_id: self.path_id,
                seed: self.seed.map(|s| s.wrapping_add(rank as u64)),
            })
            .collect()
    }
}

/// A verified run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The request.
    pub request: RunRequest,
    /// Endpoints used, by rank.
    pub endpoints: Vec<String>,
    /// Seeds used, by rank.
    pub seeds: Vec<u64>,
    /// Process ids, by rank.
    pub pids: Vec<u32>,
    /// Verification details.
    pub verdict: Verdict,
    /// States visited.
    pub history: Vec<RunState>,
}

// =============================================================================
// Harness
// =============================================================================

/// Runs collectives across two worker processes.
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
    program: WorkerProgram,
}

impl Harness {
    /// Creates a harness that starts workers with `program`.
    pub fn new(config: HarnessConfig, program: WorkerProgram) -> Self {
        Self { config, program }
    }

    /// Configuration in use.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs one request. Nothing is retried.
    pub fn run(&self, request: &RunRequest) -> HarnessResult<RunReport> {
        let mut tracker = RunTracker::new();
        match self.run_steps(request, &mut tracker) {
            Ok(report) => Ok(report),
            Err(e) => {
                let at = tracker.state();
                tracker.advance(RunState::Failed)?;
                error!(op = %request.op, state = %at, error = %e, "run failed");
                Err(e)
            }
        }
    }

    fn run_steps(&self, request: &RunRequest, tracker: &mut RunTracker) -> HarnessResult<RunReport> {
        let mut allocator = PortAllocator::new(self.config.host.clone());
        let endpoints = allocator.allocate_endpoints(WORLD_SIZE)?;
        tracker.advance(RunState::PortsAllocated)?;

        let specs = request.worker_specs(&endpoints);
        for spec in &specs {
            spec.validate()?;
        }
        let launcher = Launcher::new(
            self.program.clone(),
            self.config.tuning.clone(),
            self.config.log_dir.clone(),
        )
        .with_connect_timeout_secs(self.config.connect_timeout_secs);
        let handles = launcher.launch(&specs)?;
        // Under the process-id policy each worker seeds itself with its pid.
        let seeds: Vec<u64> = handles
            .iter()
            .map(|h| specs[h.rank].seed.unwrap_or_else(|| u64::from(h.pid)))
            .collect();
        let pids: Vec<u32> = handles.iter().map(|h| h.pid).collect();
        tracker.advance(RunState::WorkersLaunched)?;
        info!(op = %request.op, ?seeds, ?pids, "workers launched");

        let results = collect_all(handles)?;
        tracker.advance(RunState::OutputsCollected)?;

        let verdict = verify(request.op, request.mode, &results, &seeds, self.config.tolerance)?;
        tracker.advance(RunState::Verified)?;
        info!(op = %request.op, mode = %request.mode, backend = %request.backend, "run verified");

        Ok(RunReport {
            request: request.clone(),
            endpoints: endpoints.iter().map(ToString::to_string).collect(),
            seeds,
            pids,
            verdict,
            history: tracker.history().to_vec(),
        })
    }
}

/// How long unfinished workers get to exit after another rank failed.
const PEER_GRACE: Duration = Duration::from_secs(10);

/// Collects workers in rank order.
///
/// On the first failure every remaining worker is reaped and its log is
/// attached to the crash report.
fn collect_all(handles: Vec<WorkerHandle>) -> HarnessResult<Vec<WorkerResult>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut pending = handles.into_iter();
    while let Some(handle) = pending.next() {
        let rank = handle.rank;
        match handle.collect().and_then(|bytes| decode(rank, &bytes)) {
            Ok(result) => results.push(result),
            Err(mut e) => {
                let reports: Vec<PeerReport> = pending.map(|rest| rest.reap(PEER_GRACE)).collect();
                if let HarnessError::WorkerCrash { peers, .. } = &mut e {
                    *peers = reports;
                } else {
                    for report in &reports {
                        warn!(rank = report.rank, status = %report.status, stderr = %report.stderr, "worker stopped after failure");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut t = RunTracker::new();
        for next in [
            RunState::PortsAllocated,
            RunState::WorkersLaunched,
            RunState::OutputsCollected,
            RunState::Verified,
        ] {
            t.advance(next).unwrap();
        }
        assert_eq!(t.history().len(), 5);
        assert!(t.advance(RunState::Failed).is_err());
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let mut t = RunTracker::new();
        let err = t.advance(RunState::WorkersLaunched).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidTransition { ref from, ref to } if from == "init" && to == "workers_launched"
        ));
        t.advance(RunState::Failed).unwrap();
        assert!(t.advance(RunState::PortsAllocated).is_err());
    }

    #[test]
    fn test_worker_specs_thread_seeds() {
        let endpoints = vec![Endpoint::new("127.0.0.1", 1), Endpoint::new("127.0.0.1", 2)];
        let config = HarnessConfig {
            seed: Some(40),
            ..HarnessConfig::default()
        };
        let specs = RunRequest::from_config(&config, CollectiveKind::Broadcast).worker_specs(&endpoints);
        assert_eq!(specs[0].seed, Some(40));
        assert_eq!(specs[1].seed, Some(41));
        assert!(specs.iter().all(|s| s.validate().is_ok()));

        let unseeded = RunRequest::from_config(&HarnessConfig::default(), CollectiveKind::Broadcast);
        assert!(unseeded.worker_specs(&endpoints).iter().all(|s| s.seed.is_none()));
    }
}
