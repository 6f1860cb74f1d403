//! Recipe - Seeded Input Data
//!
//! The inputs every collective consumes. Workers and the reference
//! computation both draw from these functions, so the same seed always
//! yields bit-identical data on either side.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::ops::Range;

use tandem_core::{Array, SeededRng};

use crate::error::HarnessResult;

/// Shape of the dense per-rank input.
pub const DENSE_SHAPE: [usize; 2] = [10, 1000];
/// Seed shared by every rank for layer weights.
pub const WEIGHT_SEED: u64 = 2020;
/// Output features of the parallel linear layers.
pub const LINEAR_OUT: usize = 16;
/// Embedding vocabulary size.
pub const VOCAB: usize = 12;
/// Embedding width.
pub const EMBEDDING_DIM: usize = 8;
/// Shape of the embedding id matrix.
pub const IDS_SHAPE: [usize; 2] = [10, 4];
/// Experts hosted per rank.
pub const N_EXPERT: usize = 2;
/// Feature width of expert-routed rows.
pub const IN_FEAT: usize = 2;

/// `uniform[0, 1)` input of shape `(10, 1000)`.
pub fn dense_input(seed: u64) -> Array {
    SeededRng::new(seed).uniform(&DENSE_SHAPE)
}

/// `(1000, 16)` weight for the parallel linear layers.
pub fn linear_weight() -> Array {
    SeededRng::new(WEIGHT_SEED).uniform(&[DENSE_SHAPE[1], LINEAR_OUT])
}

/// `(12, 8)` embedding table.
pub fn embedding_table() -> Array {
    SeededRng::new(WEIGHT_SEED).uniform(&[VOCAB, EMBEDDING_DIM])
}

/// Embedding ids in `[0, 12)`, carried as `f32` so they travel through collectives.
pub fn embedding_ids(seed: u64) -> Array {
    SeededRng::new(seed)
        .randint(0, VOCAB as i64, &IDS_SHAPE)
        .map(|id| id as f32)
}

/// Converts `f32` ids back to integers.
pub fn ids_to_i64(ids: &Array) -> Array<i64> {
    ids.map(|v| v.round() as i64)
}

// =============================================================================
// Expert Routing
// =============================================================================

/// Draws for one rank's expert-routing run.
///
/// Counts come first from the rank's stream; rows are drawn afterwards from
/// the same stream once the row count is known.
#[derive(Debug, Clone)]
pub struct ExpertDraw {
    rng: SeededRng,
    /// Rows this rank sends to each (rank, expert) slot.
    pub local_count: Vec<i64>,
}

impl ExpertDraw {
    /// Draws `local_count = randint[1, 4)` for `world_size * N_EXPERT` slots.
    pub fn new(seed: u64, world_size: usize) -> Self {
        let mut rng = SeededRng::new(seed);
        let local_count = rng.randint(1, 4, &[world_size * N_EXPERT]).into_vec();
        Self { rng, local_count }
    }

    /// Draws `rows` input rows of width [`IN_FEAT`].
    pub fn rows(mut self, rows: usize) -> Array {
        self.rng.uniform(&[rows, IN_FEAT])
    }
}

/// Global count of `rank` given every rank's local count.
///
/// `global[s * N_EXPERT + e]` is how many rows rank `s` sends to this rank's
/// expert `e`.
pub fn global_count_for(rank: usize, locals: &[Vec<i64>]) -> Vec<i64> {
    locals
        .iter()
        .flat_map(|local| local[rank * N_EXPERT..(rank + 1) * N_EXPERT].iter().copied())
        .collect()
}

/// Sum of a count vector as a row count.
pub fn total_rows(counts: &[i64]) -> usize {
    counts.iter().map(|&c| c.max(0) as usize).sum()
}

/// Row ranges of consecutive segments with the given counts.
pub fn segments(counts: &[i64]) -> Vec<Range<usize>> {
    let mut start = 0;
    counts
        .iter()
        .map(|&c| {
            let end = start + c.max(0) as usize;
            let range = start..end;
            start = end;
            range
        })
        .collect()
}

/// Stacks row ranges of the given arrays, in order.
pub fn gather_rows(pieces: &[(&Array, Range<usize>)]) -> HarnessResult<Array> {
    let parts = pieces
        .iter()
        .map(|(a, r)| a.slice_rows(r.clone()))
        .collect::<tandem_core::Result<Vec<_>>>()?;
    if parts.iter().all(Array::is_empty) {
        return Ok(Array::empty(&[IN_FEAT]));
    }
    Ok(Array::concat_rows(&parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_input_is_deterministic() {
        let a = dense_input(11);
        assert_eq!(a.shape(), &DENSE_SHAPE);
        assert_eq!(a, dense_input(11));
        assert_ne!(a, dense_input(12));
        assert!(a.as_slice().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_weights_share_one_seed() {
        assert_eq!(linear_weight().shape(), &[1000, 16]);
        assert_eq!(embedding_table().shape(), &[12, 8]);
        assert_eq!(embedding_table().as_slice()[..8], linear_weight().as_slice()[..8]);
    }

    #[test]
    fn test_embedding_ids_range() {
        let ids = ids_to_i64(&embedding_ids(3));
        assert_eq!(ids.shape(), &IDS_SHAPE);
        assert!(ids.as_slice().iter().all(|&id| (0..12).contains(&id)));
    }

    #[test]
    fn test_expert_counts() {
        let draw = ExpertDraw::new(5, 2);
        assert_eq!(draw.local_count.len(), 4);
        assert!(draw.local_count.iter().all(|&c| (1..4).contains(&c)));
        let rows = total_rows(&draw.local_count);
        assert_eq!(draw.rows(rows).shape(), &[rows, IN_FEAT]);
    }

    #[test]
    fn test_global_count_for() {
        let locals = vec![vec![1, 2, 3, 1], vec![2, 2, 1, 3]];
        assert_eq!(global_count_for(0, &locals), vec![1, 2, 2, 2]);
        assert_eq!(global_count_for(1, &locals), vec![3, 1, 1, 3]);
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments(&[2, 0, 3]), vec![0..2, 2..2, 2..5]);
    }
}
