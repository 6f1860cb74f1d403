//! Tensor Parallelism - Sharded Linear and Embedding Layers
//!
//! Each layer is built from the full (replicated) weight and keeps only its
//! rank's shard. Forward passes communicate so every rank ends with the
//! output the unsharded layer would produce.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;

use crate::backend::ReduceOp;
use crate::comm::shard_range;
use crate::error::{CommError, CommResult};
use crate::process_group::ProcessGroup;

fn check_divisible(what: &str, len: usize, world: usize) -> CommResult<()> {
    if world == 0 || len % world != 0 {
        return Err(CommError::Protocol(format!(
            "{} of size {} cannot be split over {} ranks",
            what, len, world
        )));
    }
    Ok(())
}

fn weight_dims(weight: &Array) -> CommResult<(usize, usize)> {
    match weight.shape() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(CommError::Protocol(format!(
            "expected a 2-D weight, got shape {:?}",
            other
        ))),
    }
}

// =============================================================================
// Column Parallel Linear
// =============================================================================

/// Column-parallel linear layer.
///
/// The `[in, out]` weight is split along its output columns; each rank
/// computes its slice of the output and an all-gather reassembles it.
pub struct ColumnParallelLinear {
    weight: Array,
    process_group: ProcessGroup,
    in_features: usize,
    out_features: usize,
}

impl ColumnParallelLinear {
    /// Shards a full `[in, out]` weight by columns.
    pub fn from_full(weight: &Array, process_group: ProcessGroup) -> CommResult<Self> {
        let (in_features, out_features) = weight_dims(weight)?;
        let world = process_group.world_size();
        check_divisible("output features", out_features, world)?;
        let cols = shard_range(out_features, process_group.rank(), world);
        Ok(Self {
            weight: weight.slice_cols(cols)?,
            process_group,
            in_features,
            out_features,
        })
    }

    /// The local `[in, out / world]` shard.
    pub fn local_weight(&self) -> &Array {
        &self.weight
    }

    /// Computes `input @ W` for a `[batch, in]` input.
    pub fn forward(&self, input: &Array) -> CommResult<Array> {
        let local = input.matmul(&self.weight)?;
        let parts = self.process_group.all_gather_tensor(&local)?;
        let out = Array::concat_cols(&parts)?;
        debug_assert_eq!(out.shape().last().copied(), Some(self.out_features));
        Ok(out)
    }

    /// Number of input features.
    pub fn in_features(&self) -> usize {
        self.in_features
    }
}

// =============================================================================
// Row Parallel Linear
// =============================================================================

/// Row-parallel linear layer.
///
/// The `[in, out]` weight is split along its input rows; each rank multiplies
/// its slice of the input features and an all-reduce sums the partials.
pub struct RowParallelLinear {
    weight: Array,
    process_group: ProcessGroup,
    in_features: usize,
    out_features: usize,
}

impl RowParallelLinear {
    /// Shards a full `[in, out]` weight by rows.
    pub fn from_full(weight: &Array, process_group: ProcessGroup) -> CommResult<Self> {
        let (in_features, out_features) = weight_dims(weight)?;
        let world = process_group.world_size();
        check_divisible("input features", in_features, world)?;
        let rows = shard_range(in_features, process_group.rank(), world);
        Ok(Self {
            weight: weight.slice_rows(rows)?,
            process_group,
            in_features,
            out_features,
        })
    }

    /// The local `[in / world, out]` shard.
    pub fn local_weight(&self) -> &Array {
        &self.weight
    }

    /// Computes `input @ W` for a full `[batch, in]` input.
    pub fn forward(&self, input: &Array) -> CommResult<Array> {
        let world = self.process_group.world_size();
        let cols = shard_range(self.in_features, self.process_group.rank(), world);
        let mut partial = input.slice_cols(cols)?.matmul(&self.weight)?;
        self.process_group
            .all_reduce_tensor(&mut partial, ReduceOp::Sum)?;
        Ok(partial)
    }

    /// Number of output features.
    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

// =============================================================================
// Parallel Embedding
// =============================================================================

/// Vocabulary-parallel embedding.
///
/// Each rank holds a contiguous block of table rows, looks up the ids it
/// owns, leaves zeros elsewhere, and an all-reduce fills in the rest.
pub struct ParallelEmbedding {
    table: Array,
    process_group: ProcessGroup,
    vocab_start: usize,
    embedding_dim: usize,
}

impl ParallelEmbedding {
    /// Shards a full `[vocab, dim]` table by rows.
    pub fn from_full(table: &Array, process_group: ProcessGroup) -> CommResult<Self> {
        let (vocab, embedding_dim) = weight_dims(table)?;
        let world = process_group.world_size();
        check_divisible("vocabulary", vocab, world)?;
        let rows = shard_range(vocab, process_group.rank(), world);
        let vocab_start = rows.start;
        Ok(Self {
            table: table.slice_rows(rows)?,
            process_group,
            vocab_start,
            embedding_dim,
        })
    }

    /// Looks up `ids` of any shape, returning `[ids.shape..., dim]`.
    pub fn forward(&self, ids: &Array<i64>) -> CommResult<Array> {
        let local_vocab = self.table.rows();
        let dim = self.embedding_dim;
        let mut data = vec![0.0f32; ids.numel() * dim];
        for (slot, &id) in ids.as_slice().iter().enumerate() {
            let Ok(id) = usize::try_from(id) else {
                return Err(CommError::Protocol(format!("negative embedding id {}", id)));
            };
            if (self.vocab_start..self.vocab_start + local_vocab).contains(&id) {
                let row = self.table.row(id - self.vocab_start)?;
                data[slot * dim..(slot + 1) * dim].copy_from_slice(row);
            }
        }
        let mut shape = ids.shape().to_vec();
        shape.push(dim);
        let mut out = Array::from_vec(data, &shape)?;
        self.process_group
            .all_reduce_tensor(&mut out, ReduceOp::Sum)?;
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
