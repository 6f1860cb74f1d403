//! Worker - Single-Collective Worker Runtime
//!
//! A worker joins the TCP process group described by its [`WorkerSpec`],
//! runs exactly one collective in graph or eager mode, waits at a closing
//! barrier and writes its encoded [`WorkerResult`] to stdout.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tandem_core::Array;
use tandem_distributed::moe::{
    global_gather, global_gather_backward, global_scatter, global_scatter_backward,
};
use tandem_distributed::{
    exchange_expert_counts, ColumnParallelLinear, ParallelEmbedding, ProcessGroup,
    RendezvousConfig, RowParallelLinear, TcpBackend,
};
use tracing::{debug, info, warn};

use crate::config::TuningFlags;
use crate::error::{HarnessError, HarnessResult};
use crate::graph::{build_program, payload_from, Executor, Value, Variables};
use crate::ops::{self, Api};
use crate::payload::{encode, Payload, WorkerResult};
use crate::recipe::{self, ExpertDraw};
use crate::spec::{BackendKind, CollectiveKind, ExecutionMode, WorkerArgs, WorkerSpec};

/// The seed a worker uses: the explicit one, or its own process id.
pub fn derive_seed(spec: &WorkerSpec) -> u64 {
    spec.seed.unwrap_or_else(|| u64::from(std::process::id()))
}

// =============================================================================
// Inputs
// =============================================================================

/// Builds this rank's feeds for `op`.
///
/// Expert routing exchanges counts with the peer here, since the number of
/// rows `global_gather` consumes depends on what the peer sends.
pub fn prepare(op: CollectiveKind, seed: u64, pg: &ProcessGroup) -> HarnessResult<Variables> {
    let mut feeds = Variables::new();
    match op {
        CollectiveKind::ParallelEmbedding => {
            feeds.insert("ids".to_string(), Value::Tensor(recipe::embedding_ids(seed)));
        }
        CollectiveKind::GlobalScatter | CollectiveKind::GlobalGather => {
            let draw = ExpertDraw::new(seed, pg.world_size());
            let local = draw.local_count.clone();
            let global = exchange_expert_counts(&local, pg)?;
            let rows = if op == CollectiveKind::GlobalScatter {
                recipe::total_rows(&local)
            } else {
                recipe::total_rows(&global)
            };
            debug!(?local, ?global, rows, "expert counts exchanged");
            feeds.insert("x".to_string(), Value::Tensor(draw.rows(rows)));
            feeds.insert("local_count".to_string(), Value::Counts(local));
            feeds.insert("global_count".to_string(), Value::Counts(global));
        }
        _ => {
            feeds.insert("x".to_string(), Value::Tensor(recipe::dense_input(seed)));
        }
    }
    Ok(feeds)
}

fn take_tensor(feeds: &mut Variables, name: &str) -> HarnessResult<Array> {
    match feeds.remove(name) {
        Some(Value::Tensor(t)) => Ok(t),
        _ => Err(HarnessError::InvalidSpec(format!("feed '{}' is not a tensor", name))),
    }
}

fn take_counts(feeds: &mut Variables, name: &str) -> HarnessResult<Vec<i64>> {
    match feeds.remove(name) {
        Some(Value::Counts(c)) => Ok(c),
        _ => Err(HarnessError::InvalidSpec(format!("feed '{}' is not a count vector", name))),
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Runs `spec.op` on `pg` and packages the result.
pub fn execute(spec: &WorkerSpec, seed: u64, pg: &ProcessGroup) -> HarnessResult<WorkerResult> {
    let api = Api::from_path_id(spec.path_id, spec.op)?;
    let feeds = prepare(spec.op, seed, pg)?;
    let payload = match spec.mode {
        ExecutionMode::Graph => {
            let program = build_program(spec.op, pg.rank());
            payload_from(Executor::new(pg, api).run(&program, feeds)?)?
        }
        ExecutionMode::Eager => eager(spec.op, pg, api, feeds)?,
    };
    Ok(WorkerResult {
        rank: pg.rank(),
        seed,
        op: spec.op,
        payload,
    })
}

fn eager(op: CollectiveKind, pg: &ProcessGroup, api: Api, mut feeds: Variables) -> HarnessResult<Payload> {
    let payload = match op {
        CollectiveKind::Allgather => {
            Payload::Tensors(ops::all_gather(pg, api, &take_tensor(&mut feeds, "x")?)?)
        }
        CollectiveKind::Broadcast => {
            let mut x = take_tensor(&mut feeds, "x")?;
            ops::broadcast(pg, api, &mut x, 1)?;
            Payload::Tensor(x)
        }
        CollectiveKind::Reduce => match ops::reduce(pg, api, &take_tensor(&mut feeds, "x")?, 0)? {
            Some(sum) => Payload::Tensor(sum),
            None => Payload::Empty,
        },
        CollectiveKind::Allreduce => {
            let mut x = take_tensor(&mut feeds, "x")?;
            ops::all_reduce(pg, api, &mut x)?;
            Payload::Tensor(x)
        }
        CollectiveKind::Scatter => {
            Payload::Tensor(ops::scatter(pg, api, &take_tensor(&mut feeds, "x")?, 1)?)
        }
        CollectiveKind::Alltoall => Payload::Tensors(ops::all_to_all(pg, &take_tensor(&mut feeds, "x")?)?),
        CollectiveKind::Sendrecv => {
            let x = take_tensor(&mut feeds, "x")?;
            if pg.rank() == 0 {
                ops::send(pg, api, &x, 1)?;
                Payload::Empty
            } else {
                Payload::Tensor(ops::recv(pg, api, 0, x.shape())?)
            }
        }
        CollectiveKind::GlobalScatter | CollectiveKind::GlobalGather => {
            let x = take_tensor(&mut feeds, "x")?;
            let local = take_counts(&mut feeds, "local_count")?;
            let global = take_counts(&mut feeds, "global_count")?;
            // loss = sum(out^2), so d(loss)/d(out) = 2 * out.
            let (out, grad) = if op == CollectiveKind::GlobalScatter {
                let out = global_scatter(&x, &local, &global, pg)?;
                let grad = global_scatter_backward(&out.scale(2.0), &local, &global, pg)?;
                (out, grad)
            } else {
                let out = global_gather(&x, &local, &global, pg)?;
                let grad = global_gather_backward(&out.scale(2.0), &local, &global, pg)?;
                (out, grad)
            };
            Payload::Tensors(vec![out, grad])
        }
        CollectiveKind::ParallelEmbedding => {
            let mut ids = take_tensor(&mut feeds, "ids")?;
            ops::broadcast(pg, api, &mut ids, 0)?;
            let layer = ParallelEmbedding::from_full(&recipe::embedding_table(), pg.clone())?;
            let out = layer.forward(&recipe::ids_to_i64(&ids))?;
            Payload::Tensors(vec![ids, out])
        }
        CollectiveKind::RowParallelLinear => {
            let mut x = take_tensor(&mut feeds, "x")?;
            ops::broadcast(pg, api, &mut x, 0)?;
            let layer = RowParallelLinear::from_full(&recipe::linear_weight(), pg.clone())?;
            Payload::Tensor(layer.forward(&x)?)
        }
        CollectiveKind::ColumnParallelLinear => {
            let mut x = take_tensor(&mut feeds, "x")?;
            ops::broadcast(pg, api, &mut x, 0)?;
            let layer = ColumnParallelLinear::from_full(&recipe::linear_weight(), pg.clone())?;
            Payload::Tensor(layer.forward(&x)?)
        }
    };
    Ok(payload)
}

// =============================================================================
// Process Entry
// =============================================================================

/// Joins the group, runs the collective and returns the encoded result.
pub fn run_worker(spec: &WorkerSpec, connect_timeout: Duration) -> HarnessResult<Vec<u8>> {
    spec.validate()?;
    let seed = derive_seed(spec);
    info!(
        rank = spec.rank,
        op = %spec.op,
        mode = %spec.mode,
        backend = %spec.backend,
        path_id = spec.path_id,
        seed,
        "worker starting"
    );
    if spec.backend == BackendKind::None {
        warn!(rank = spec.rank, "no backend requested, using mesh transport");
    }

    let endpoints = spec.endpoints.iter().map(ToString::to_string).collect();
    let backend = TcpBackend::connect(
        RendezvousConfig::new(spec.rank, endpoints)
            .with_topology(spec.backend.topology())
            .with_connect_timeout(connect_timeout),
    )?;
    let pg = ProcessGroup::new(Arc::new(backend));

    let result = execute(spec, seed, &pg)?;
    pg.barrier()?;
    // Dropping the last handle joins the writer threads, flushing every frame.
    drop(pg);

    info!(rank = spec.rank, items = result.payload.items().len(), "worker finished");
    encode(&result)
}

/// Worker process body: resolves arguments and writes the result to stdout.
pub fn worker_main(args: WorkerArgs) -> HarnessResult<()> {
    let connect_timeout = Duration::from_secs(args.connect_timeout_secs);
    let spec = args.into_spec(TuningFlags::from_env().eager_mode)?;
    let bytes = run_worker(&spec, connect_timeout)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(())
}
