//! Graph - Graph-Mode Collective Programs
//!
//! In graph mode a worker does not call collectives directly. It builds a
//! small program of named variables (feeds, collective nodes, fetches) and
//! hands it to an [`Executor`] bound to the process group.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::BTreeMap;
use std::fmt;

use tandem_core::Array;
use tandem_distributed::moe::{global_gather, global_scatter};
use tandem_distributed::{ColumnParallelLinear, ParallelEmbedding, ProcessGroup, RowParallelLinear};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::ops::{self, Api};
use crate::payload::Payload;
use crate::recipe;
use crate::spec::CollectiveKind;

// =============================================================================
// Values
// =============================================================================

/// A variable held by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// One tensor.
    Tensor(Array),
    /// An ordered list of tensors.
    List(Vec<Array>),
    /// Expert routing counts.
    Counts(Vec<i64>),
    /// Produced on another rank only.
    Empty,
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::List(_) => "list",
            Value::Counts(_) => "counts",
            Value::Empty => "empty",
        }
    }
}

/// Named variables of one program run.
pub type Variables = BTreeMap<String, Value>;

// =============================================================================
// Program
// =============================================================================

/// A collective node.
#[derive(Debug, Clone)]
pub enum GraphOp {
    /// Gathers every rank's tensor.
    AllGather,
    /// Copies `src`'s tensor to every rank.
    Broadcast {
        /// Source rank.
        src: usize,
    },
    /// Sums onto `dst`.
    Reduce {
        /// Destination rank.
        dst: usize,
    },
    /// Sums onto every rank.
    AllReduce,
    /// Splits `src`'s rows across ranks.
    Scatter {
        /// Source rank.
        src: usize,
    },
    /// Exchanges row blocks.
    AllToAll,
    /// Sends the input to `dst`.
    Send {
        /// Destination rank.
        dst: usize,
    },
    /// Receives a tensor of known shape from `src`.
    Recv {
        /// Source rank.
        src: usize,
        /// Shape of the incoming tensor.
        shape: Vec<usize>,
    },
    /// Routes rows to expert owners. Inputs: rows, local count, global count.
    GlobalScatter,
    /// Routes expert outputs back. Inputs: rows, local count, global count.
    GlobalGather,
    /// Vocabulary-parallel embedding over a full table.
    EmbeddingLookup {
        /// Full `[vocab, dim]` table.
        table: Array,
    },
    /// Column-parallel linear over a full weight.
    ColumnLinear {
        /// Full `[in, out]` weight.
        weight: Array,
    },
    /// Row-parallel linear over a full weight.
    RowLinear {
        /// Full `[in, out]` weight.
        weight: Array,
    },
}

impl GraphOp {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GraphOp::AllGather => "all_gather",
            GraphOp::Broadcast { .. } => "broadcast",
            GraphOp::Reduce { .. } => "reduce",
            GraphOp::AllReduce => "all_reduce",
            GraphOp::Scatter { .. } => "scatter",
            GraphOp::AllToAll => "all_to_all",
            GraphOp::Send { .. } => "send",
            GraphOp::Recv { .. } => "recv",
            GraphOp::GlobalScatter => "global_scatter",
            GraphOp::GlobalGather => "global_gather",
            GraphOp::EmbeddingLookup { .. } => "embedding_lookup",
            GraphOp::ColumnLinear { .. } => "column_parallel_linear",
            GraphOp::RowLinear { .. } => "row_parallel_linear",
        }
    }
}

/// One node: `output = op(inputs...)`.
#[derive(Debug, Clone)]
pub struct Node {
    /// Operation.
    pub op: GraphOp,
    /// Input variable names.
    pub inputs: Vec<String>,
    /// Output variable name; empty for sinks.
    pub output: String,
}

impl Node {
    fn new(op: GraphOp, inputs: &[&str], output: &str) -> Self {
        Self {
            op,
            inputs: inputs.iter().map(ToString::to_string).collect(),
            output: output.to_string(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}({})", self.output, self.op.name(), self.inputs.join(", "))
    }
}

/// Nodes plus the variables returned after the run.
#[derive(Debug, Clone)]
pub struct CollectiveProgram {
    /// Nodes in execution order.
    pub nodes: Vec<Node>,
    /// Variables returned by [`Executor::run`].
    pub fetches: Vec<String>,
}

/// Builds the program `rank` runs for `op`.
///
/// Feeds: `x` (dense input) for the dense collectives and the linear layers,
/// `ids` for the embedding, `x`, `local_count` and `global_count` for expert
/// routing.
pub fn build_program(op: CollectiveKind, rank: usize) -> CollectiveProgram {
    let (nodes, fetches): (Vec<Node>, Vec<&str>) = match op {
        CollectiveKind::Allgather => (vec![Node::new(GraphOp::AllGather, &["x"], "out")], vec!["out"]),
        CollectiveKind::Broadcast => (
            vec![Node::new(GraphOp::Broadcast { src: 1 }, &["x"], "out")],
            vec!["out"],
        ),
        CollectiveKind::Reduce => (
            vec![Node::new(GraphOp::Reduce { dst: 0 }, &["x"], "out")],
            vec!["out"],
        ),
        CollectiveKind::Allreduce => (vec![Node::new(GraphOp::AllReduce, &["x"], "out")], vec!["out"]),
        CollectiveKind::Scatter => (
            vec![Node::new(GraphOp::Scatter { src: 1 }, &["x"], "out")],
            vec!["out"],
        ),
        CollectiveKind::Alltoall => (vec![Node::new(GraphOp::AllToAll, &["x"], "out")], vec!["out"]),
        CollectiveKind::Sendrecv if rank == 0 => (vec![Node::new(GraphOp::Send { dst: 1 }, &["x"], "")], vec![]),
        CollectiveKind::Sendrecv => (
            vec![Node::new(
                GraphOp::Recv {
                    src: 0,
                    shape: recipe::DENSE_SHAPE.to_vec(),
                },
                &[],
                "out",
            )],
            vec!["out"],
        ),
        CollectiveKind::GlobalScatter => (
            vec![Node::new(
                GraphOp::GlobalScatter,
                &["x", "local_count", "global_count"],
                "out",
            )],
            vec!["out"],
        ),
        CollectiveKind::GlobalGather => (
            vec![Node::new(
                GraphOp::GlobalGather,
                &["x", "local_count", "global_count"],
                "out",
            )],
            vec!["out"],
        ),
        CollectiveKind::ParallelEmbedding => (
            vec![
                Node::new(GraphOp::Broadcast { src: 0 }, &["ids"], "ids_0"),
                Node::new(
                    GraphOp::EmbeddingLookup {
                        table: recipe::embedding_table(),
                    },
                    &["ids_0"],
                    "out",
                ),
            ],
            vec!["ids_0", "out"],
        ),
        CollectiveKind::RowParallelLinear => (
            vec![
                Node::new(GraphOp::Broadcast { src: 0 }, &["x"], "x_0"),
                Node::new(
                    GraphOp::RowLinear {
                        weight: recipe::linear_weight(),
                    },
                    &["x_0"],
                    "out",
                ),
            ],
            vec!["out"],
        ),
        CollectiveKind::ColumnParallelLinear => (
            vec![
                Node::new(GraphOp::Broadcast { src: 0 }, &["x"], "x_0"),
                Node::new(
                    GraphOp::ColumnLinear {
                        weight: recipe::linear_weight(),
                    },
                    &["x_0"],
                    "out",
                ),
            ],
            vec!["out"],
        ),
    };
    CollectiveProgram {
        nodes,
        fetches: fetches.into_iter().map(ToString::to_string).collect(),
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs collective programs on one rank.
pub struct Executor<'a> {
    pg: &'a ProcessGroup,
    api: Api,
}

impl<'a> Executor<'a> {
    /// Binds an executor to a process group and API layer.
    pub fn new(pg: &'a ProcessGroup, api: Api) -> Self {
        Self { pg, api }
    }

    /// Runs every node in order and returns the fetched variables.
    pub fn run(&self, program: &CollectiveProgram, feeds: Variables) -> HarnessResult<Vec<Value>> {
        let mut vars = feeds;
        for node in &program.nodes {
            debug!(rank = self.pg.rank(), node = %node, "running node");
            let value = self.run_node(node, &vars)?;
            if !node.output.is_empty() {
                vars.insert(node.output.clone(), value);
            }
        }
        program
            .fetches
            .iter()
            .map(|name| {
                vars.remove(name)
                    .ok_or_else(|| HarnessError::InvalidSpec(format!("fetch '{}' was never produced", name)))
            })
            .collect()
    }

    fn run_node(&self, node: &Node, vars: &Variables) -> HarnessResult<Value> {
        let pg = self.pg;
        let api = self.api;
        let value = match &node.op {
            GraphOp::AllGather => Value::List(ops::all_gather(pg, api, tensor(node, vars, 0)?)?),
            GraphOp::Broadcast { src } => {
                let mut x = tensor(node, vars, 0)?.clone();
                ops::broadcast(pg, api, &mut x, *src)?;
                Value::Tensor(x)
            }
            GraphOp::Reduce { dst } => match ops::reduce(pg, api, tensor(node, vars, 0)?, *dst)? {
                Some(sum) => Value::Tensor(sum),
                None => Value::Empty,
            },
            GraphOp::AllReduce => {
                let mut x = tensor(node, vars, 0)?.clone();
                ops::all_reduce(pg, api, &mut x)?;
                Value::Tensor(x)
            }
            GraphOp::Scatter { src } => Value::Tensor(ops::scatter(pg, api, tensor(node, vars, 0)?, *src)?),
            GraphOp::AllToAll => Value::List(ops::all_to_all(pg, tensor(node, vars, 0)?)?),
            GraphOp::Send { dst } => {
                ops::send(pg, api, tensor(node, vars, 0)?, *dst)?;
                Value::Empty
            }
            GraphOp::Recv { src, shape } => Value::Tensor(ops::recv(pg, api, *src, shape)?),
            GraphOp::GlobalScatter => {
                let x = tensor(node, vars, 0)?;
                let local = counts(node, vars, 1)?;
                let global = counts(node, vars, 2)?;
                Value::Tensor(global_scatter(x, local, global, pg)?)
            }
            GraphOp::GlobalGather => {
                let x = tensor(node, vars, 0)?;
                let local = counts(node, vars, 1)?;
                let global = counts(node, vars, 2)?;
                Value::Tensor(global_gather(x, local, global, pg)?)
            }
            GraphOp::EmbeddingLookup { table } => {
                let ids = recipe::ids_to_i64(tensor(node, vars, 0)?);
                let layer = ParallelEmbedding::from_full(table, pg.clone())?;
                Value::Tensor(layer.forward(&ids)?)
            }
            GraphOp::ColumnLinear { weight } => {
                let layer = ColumnParallelLinear::from_full(weight, pg.clone())?;
                Value::Tensor(layer.forward(tensor(node, vars, 0)?)?)
            }
            GraphOp::RowLinear { weight } => {
                let layer = RowParallelLinear::from_full(weight, pg.clone())?;
                Value::Tensor(layer.forward(tensor(node, vars, 0)?)?)
            }
        };
        Ok(value)
    }
}

fn input<'v>(node: &Node, vars: &'v Variables, i: usize) -> HarnessResult<&'v Value> {
    let name = node
        .inputs
        .get(i)
        .ok_or_else(|| HarnessError::InvalidSpec(format!("{} is missing input {}", node, i)))?;
    vars.get(name)
        .ok_or_else(|| HarnessError::InvalidSpec(format!("{} reads undefined '{}'", node, name)))
}

fn tensor<'v>(node: &Node, vars: &'v Variables, i: usize) -> HarnessResult<&'v Array> {
    match input(node, vars, i)? {
        Value::Tensor(t) => Ok(t),
        other => Err(HarnessError::InvalidSpec(format!(
            "{} input {} is {}, expected tensor",
            node,
            i,
            other.kind()
        ))),
    }
}

fn counts<'v>(node: &Node, vars: &'v Variables, i: usize) -> HarnessResult<&'v [i64]> {
    match input(node, vars, i)? {
        Value::Counts(c) => Ok(c),
        other => Err(HarnessError::InvalidSpec(format!(
            "{} input {} is {}, expected counts",
            node,
            i,
            other.kind()
        ))),
    }
}

/// Packs fetched values into a worker payload.
///
/// A single tensor stays a tensor; lists are flattened; `Empty` fetches
/// contribute nothing.
pub fn payload_from(mut values: Vec<Value>) -> HarnessResult<Payload> {
    if let [Value::Tensor(_)] = values.as_slice() {
        if let Some(Value::Tensor(t)) = values.pop() {
            return Ok(Payload::Tensor(t));
        }
    }
    let mut items = Vec::new();
    for value in values {
        match value {
            Value::Tensor(t) => items.push(t),
            Value::List(ts) => items.extend(ts),
            Value::Empty => {}
            Value::Counts(_) => {
                return Err(HarnessError::InvalidSpec("counts cannot be fetched".to_string()))
            }
        }
    }
    if items.is_empty() {
        Ok(Payload::Empty)
    } else {
        Ok(Payload::Tensors(items))
    }
}
