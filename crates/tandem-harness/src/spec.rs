//! Spec - Per-Worker Configuration
//!
//! A [`WorkerSpec`] is built once per worker by the launcher and handed to the
//! worker as command-line arguments. [`WorkerArgs`] is the worker-side parser;
//! every flag also falls back to a `TANDEM_*` environment variable.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::str::FromStr;

use clap::Args;
use serde::{Deserialize, Serialize};
use tandem_distributed::Topology;

use crate::endpoint::{join_endpoints, parse_endpoints, Endpoint};
use crate::error::{HarnessError, HarnessResult};

/// Number of workers every run uses.
pub const WORLD_SIZE: usize = 2;

// =============================================================================
// Enumerations
// =============================================================================

/// Collective transport requested for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Direct exchange between every pair of ranks.
    #[default]
    Mesh,
    /// Ring all-reduce and all-gather.
    Ring,
    /// No preference; the mesh transport is used.
    None,
}

impl BackendKind {
    /// Every backend kind.
    pub const ALL: [BackendKind; 3] = [BackendKind::Mesh, BackendKind::Ring, BackendKind::None];

    /// Name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Mesh => "mesh",
            BackendKind::Ring => "ring",
            BackendKind::None => "none",
        }
    }

    /// Transport topology.
    pub fn topology(self) -> Topology {
        match self {
            BackendKind::Ring => Topology::Ring,
            BackendKind::Mesh | BackendKind::None => Topology::Mesh,
        }
    }
}

/// How the worker drives the collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Build a program and run it with the graph executor.
    #[default]
    Graph,
    /// Call the process-group API directly.
    Eager,
}

impl ExecutionMode {
    /// Both modes.
    pub const ALL: [ExecutionMode; 2] = [ExecutionMode::Graph, ExecutionMode::Eager];

    /// Name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ExecutionMode::Graph => "graph",
            ExecutionMode::Eager => "eager",
        }
    }
}

/// The collective a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveKind {
    /// Every rank receives every rank's tensor.
    Allgather,
    /// Rank 1's tensor is copied to every rank.
    Broadcast,
    /// Sum lands on rank 0.
    Reduce,
    /// Sum lands on every rank.
    Allreduce,
    /// Rank 1's rows are split across ranks.
    Scatter,
    /// Row blocks are exchanged between every pair.
    Alltoall,
    /// Rank 0 sends to rank 1.
    Sendrecv,
    /// Expert outputs return to their owners.
    GlobalGather,
    /// Rows move to the rank hosting their expert.
    GlobalScatter,
    /// Vocabulary-sharded embedding lookup.
    ParallelEmbedding,
    /// Row-sharded linear layer.
    RowParallelLinear,
    /// Column-sharded linear layer.
    ColumnParallelLinear,
}

impl CollectiveKind {
    /// Every collective, in listing order.
    pub const ALL: [CollectiveKind; 12] = [
        CollectiveKind::Allgather,
        CollectiveKind::Broadcast,
        CollectiveKind::Reduce,
        CollectiveKind::Allreduce,
        CollectiveKind::Scatter,
        CollectiveKind::Alltoall,
        CollectiveKind::Sendrecv,
        CollectiveKind::GlobalGather,
        CollectiveKind::GlobalScatter,
        CollectiveKind::ParallelEmbedding,
        CollectiveKind::RowParallelLinear,
        CollectiveKind::ColumnParallelLinear,
    ];

    /// Name used on the command line and in payloads.
    pub fn name(self) -> &'static str {
        match self {
            CollectiveKind::Allgather => "allgather",
            CollectiveKind::Broadcast => "broadcast",
            CollectiveKind::Reduce => "reduce",
            CollectiveKind::Allreduce => "allreduce",
            CollectiveKind::Scatter => "scatter",
            CollectiveKind::Alltoall => "alltoall",
            CollectiveKind::Sendrecv => "sendrecv",
            CollectiveKind::GlobalGather => "global_gather",
            CollectiveKind::GlobalScatter => "global_scatter",
            CollectiveKind::ParallelEmbedding => "parallel_embedding",
            CollectiveKind::RowParallelLinear => "row_parallel_linear",
            CollectiveKind::ColumnParallelLinear => "column_parallel_linear",
        }
    }

    /// True for ops that can run on the raw backend API (`path_id` 1).
    pub fn supports_backend_path(self) -> bool {
        matches!(
            self,
            CollectiveKind::Allgather
                | CollectiveKind::Broadcast
                | CollectiveKind::Reduce
                | CollectiveKind::Allreduce
                | CollectiveKind::Scatter
                | CollectiveKind::Sendrecv
        )
    }

    /// True for the expert-routing ops.
    pub fn is_expert_routing(self) -> bool {
        matches!(self, CollectiveKind::GlobalGather | CollectiveKind::GlobalScatter)
    }
}

macro_rules! name_parsing {
    ($ty:ty, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = HarnessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == s)
                    .ok_or_else(|| HarnessError::InvalidSpec(format!("unknown {} '{}'", $what, s)))
            }
        }
    };
}

name_parsing!(BackendKind, "backend");
name_parsing!(ExecutionMode, "mode");
name_parsing!(CollectiveKind, "collective");

// =============================================================================
// Worker Spec
// =============================================================================

/// Everything one worker needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// This worker's rank.
    pub rank: usize,
    /// Number of workers.
    pub world_size: usize,
    /// Endpoints of every rank, indexed by rank.
    pub endpoints: Vec<Endpoint>,
    /// Transport.
    pub backend: BackendKind,
    /// Collective to run.
    pub op: CollectiveKind,
    /// Graph or eager.
    pub mode: ExecutionMode,
    /// API layer: 0 process group, 1 raw backend.
    pub path_id: u32,
    /// RNG seed; the worker's process id when absent.
    pub seed: Option<u64>,
}

impl WorkerSpec {
    /// This worker's own endpoint.
    pub fn current_endpoint(&self) -> HarnessResult<&Endpoint> {
        self.endpoints.get(self.rank).ok_or_else(|| {
            HarnessError::InvalidSpec(format!(
                "rank {} has no endpoint among {}",
                self.rank,
                self.endpoints.len()
            ))
        })
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.world_size != WORLD_SIZE {
            return Err(HarnessError::InvalidSpec(format!(
                "world size must be {}, got {}",
                WORLD_SIZE, self.world_size
            )));
        }
        if self.rank >= self.world_size {
            return Err(HarnessError::InvalidSpec(format!(
                "rank {} out of range for world size {}",
                self.rank, self.world_size
            )));
        }
        if self.endpoints.len() != self.world_size {
            return Err(HarnessError::InvalidSpec(format!(
                "{} endpoints for world size {}",
                self.endpoints.len(),
                self.world_size
            )));
        }
        match self.path_id {
            0 => Ok(()),
            1 if self.op.supports_backend_path() => Ok(()),
            1 => Err(HarnessError::InvalidSpec(format!(
                "{} has no raw backend path",
                self.op
            ))),
            other => Err(HarnessError::InvalidSpec(format!("unknown path_id {}", other))),
        }
    }

    /// Command-line arguments that reproduce this spec in a worker.
    pub fn to_args(&self) -> Vec<String> {
        let current = self
            .endpoints
            .get(self.rank)
            .map(ToString::to_string)
            .unwrap_or_default();
        let mut args = vec![
            "--rank".to_string(),
            self.rank.to_string(),
            "--world-size".to_string(),
            self.world_size.to_string(),
            "--endpoints".to_string(),
            join_endpoints(&self.endpoints),
            "--current-endpoint".to_string(),
            current,
            "--backend".to_string(),
            self.backend.to_string(),
            "--op".to_string(),
            self.op.to_string(),
            "--mode".to_string(),
            self.mode.to_string(),
            "--path-id".to_string(),
            self.path_id.to_string(),
        ];
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        args
    }
}

// =============================================================================
// Worker Arguments
// =============================================================================

/// Worker command-line arguments.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Rank of this worker
    #[arg(long, env = "TANDEM_TRAINER_ID")]
    pub rank: usize,

    /// Number of workers
    #[arg(long, env = "TANDEM_TRAINERS_NUM", default_value_t = WORLD_SIZE)]
    pub world_size: usize,

    /// Comma-separated endpoints of every rank
    #[arg(long, env = "TANDEM_TRAINER_ENDPOINTS")]
    pub endpoints: String,

    /// This worker's endpoint; must match its entry in --endpoints
    #[arg(long, env = "TANDEM_CURRENT_ENDPOINT")]
    pub current_endpoint: Option<String>,

    /// Transport: mesh, ring or none
    #[arg(long, env = "TANDEM_BACKEND", default_value = "mesh")]
    pub backend: BackendKind,

    /// Collective to run
    #[arg(long, env = "TANDEM_COLLECTIVE")]
    pub op: CollectiveKind,

    /// API layer: 0 process group, 1 raw backend
    #[arg(long, env = "TANDEM_PATH_ID", default_value_t = 0)]
    pub path_id: u32,

    /// Execution mode: graph or eager
    #[arg(long, env = "TANDEM_EXECUTION_MODE")]
    pub mode: Option<ExecutionMode>,

    /// RNG seed (defaults to the process id)
    #[arg(long, env = "TANDEM_SEED")]
    pub seed: Option<u64>,

    /// Seconds to keep dialing peers
    #[arg(long, env = "TANDEM_CONNECT_TIMEOUT", default_value_t = 30)]
    pub connect_timeout_secs: u64,
}

impl WorkerArgs {
    /// Resolves the arguments into a validated spec.
    ///
    /// Without `--mode`, `eager_default` picks eager over graph.
    pub fn into_spec(self, eager_default: bool) -> HarnessResult<WorkerSpec> {
        let endpoints = parse_endpoints(&self.endpoints)?;
        let mode = self.mode.unwrap_or(if eager_default {
            ExecutionMode::Eager
        } else {
            ExecutionMode::Graph
        });
        let spec = WorkerSpec {
            rank: self.rank,
            world_size: self.world_size,
            endpoints,
            backend: self.backend,
            op: self.op,
            mode,
            path_id: self.path_id,
            seed: self.seed,
        };
        spec.validate()?;
        if let Some(current) = self.current_endpoint {
            let current: Endpoint = current.parse()?;
            if &current != spec.current_endpoint()? {
                return Err(HarnessError::InvalidSpec(format!(
                    "current endpoint {} does not match rank {} endpoint {}",
                    current,
                    spec.rank,
                    spec.current_endpoint()?
                )));
            }
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: WorkerArgs,
    }

    fn spec(op: CollectiveKind, path_id: u32) -> WorkerSpec {
        WorkerSpec {
            rank: 1,
            world_size: 2,
            endpoints: vec![Endpoint::new("127.0.0.1", 7000), Endpoint::new("127.0.0.1", 7001)],
            backend: BackendKind::Ring,
            op,
            mode: ExecutionMode::Eager,
            path_id,
            seed: Some(42),
        }
    }

    #[test]
    fn test_names_round_trip() {
        for op in CollectiveKind::ALL {
            assert_eq!(op.name().parse::<CollectiveKind>().unwrap(), op);
        }
        assert_eq!("none".parse::<BackendKind>().unwrap(), BackendKind::None);
        assert!("nccl".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::None.topology(), Topology::Mesh);
    }

    #[test]
    fn test_args_reproduce_spec() {
        let original = spec(CollectiveKind::GlobalScatter, 0);
        let mut argv = vec!["worker".to_string()];
        argv.extend(original.to_args());
        let parsed = TestCli::try_parse_from(argv).unwrap().args.into_spec(false).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_path_id_validation() {
        assert!(spec(CollectiveKind::Allreduce, 1).validate().is_ok());
        assert!(spec(CollectiveKind::Alltoall, 1).validate().is_err());
        assert!(spec(CollectiveKind::Allreduce, 2).validate().is_err());
    }

    #[test]
    fn test_eager_default_applies_without_mode() {
        let argv = [
            "worker",
            "--rank",
            "0",
            "--endpoints",
            "127.0.0.1:7000,127.0.0.1:7001",
            "--op",
            "allreduce",
        ];
        let args = TestCli::try_parse_from(argv).unwrap().args;
        assert_eq!(args.clone().into_spec(true).unwrap().mode, ExecutionMode::Eager);
        assert_eq!(args.into_spec(false).unwrap().mode, ExecutionMode::Graph);
    }

    #[test]
    fn test_mismatched_current_endpoint() {
        let argv = [
            "worker",
            "--rank",
            "0",
            "--endpoints",
            "127.0.0.1:7000,127.0.0.1:7001",
            "--current-endpoint",
            "127.0.0.1:7001",
            "--op",
            "broadcast",
        ];
        let args = TestCli::try_parse_from(argv).unwrap().args;
        assert!(matches!(args.into_spec(false), Err(HarnessError::InvalidSpec(_))));
    }
}
