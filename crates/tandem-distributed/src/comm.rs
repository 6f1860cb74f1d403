//! Communication - High-level Communication Utilities
//!
//! Free-function forms of the process-group collectives, plus row sharding
//! helpers used by the tensor-parallel layers.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;

use crate::backend::ReduceOp;
use crate::error::CommResult;
use crate::process_group::ProcessGroup;

// =============================================================================
// All-Reduce Operations
// =============================================================================

/// Performs all-reduce sum on a tensor.
pub fn all_reduce_sum(tensor: &mut Array, pg: &ProcessGroup) -> CommResult<()> {
    pg.all_reduce_tensor(tensor, ReduceOp::Sum)
}

/// Performs all-reduce mean on a tensor.
pub fn all_reduce_mean(tensor: &mut Array, pg: &ProcessGroup) -> CommResult<()> {
    pg.all_reduce_tensor(tensor, ReduceOp::Average)
}

/// Performs all-reduce max on a tensor.
pub fn all_reduce_max(tensor: &mut Array, pg: &ProcessGroup) -> CommResult<()> {
    pg.all_reduce_tensor(tensor, ReduceOp::Max)
}

// =============================================================================
// Broadcast / Reduce
// =============================================================================

/// Broadcasts a tensor from the root rank (0).
pub fn broadcast(tensor: &mut Array, pg: &ProcessGroup) -> CommResult<()> {
    broadcast_from(tensor, 0, pg)
}

/// Broadcasts a tensor from a specific rank.
pub fn broadcast_from(tensor: &mut Array, src: usize, pg: &ProcessGroup) -> CommResult<()> {
    pg.broadcast_tensor(tensor, src)
}

/// Sum-reduces a tensor onto `dst`.
pub fn reduce_sum(tensor: &Array, dst: usize, pg: &ProcessGroup) -> CommResult<Option<Array>> {
    pg.reduce_tensor(tensor, dst, ReduceOp::Sum)
}

// =============================================================================
// Gather / Scatter
// =============================================================================

/// All-gathers a tensor across all ranks.
pub fn all_gather(tensor: &Array, pg: &ProcessGroup) -> CommResult<Vec<Array>> {
    pg.all_gather_tensor(tensor)
}

/// All-gathers and stacks the results along the row dimension.
pub fn all_gather_rows(tensor: &Array, pg: &ProcessGroup) -> CommResult<Array> {
    Ok(Array::concat_rows(&pg.all_gather_tensor(tensor)?)?)
}

/// Scatters `src`'s tensor row-wise.
pub fn scatter(tensor: &Array, src: usize, pg: &ProcessGroup) -> CommResult<Array> {
    pg.scatter_tensor(tensor, src)
}

/// Equal-split all-to-all.
pub fn all_to_all(tensor: &Array, pg: &ProcessGroup) -> CommResult<Vec<Array>> {
    pg.all_to_all_tensor(tensor)
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Synchronizes all processes.
pub fn barrier(pg: &ProcessGroup) -> CommResult<()> {
    pg.barrier()
}

/// Checks if this is the main process (rank 0).
#[must_use]
pub fn is_main_process(pg: &ProcessGroup) -> bool {
    pg.rank() == 0
}

// =============================================================================
// Model Parallel Utilities
// =============================================================================

/// Range of `len` items owned by `rank` when split evenly over `world_size`.
pub fn shard_range(len: usize, rank: usize, world_size: usize) -> std::ops::Range<usize> {
    let per = len / world_size;
    rank * per..(rank + 1) * per
}

/// Returns this rank's share of the tensor's rows without communicating.
pub fn local_rows(tensor: &Array, pg: &ProcessGroup) -> CommResult<Array> {
    let range = shard_range(tensor.rows(), pg.rank(), pg.world_size());
    Ok(tensor.slice_rows(range)?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_rank_is_identity() {
        let pg = ProcessGroup::local();
        let mut t = Array::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        all_reduce_sum(&mut t, &pg).unwrap();
        all_reduce_mean(&mut t, &pg).unwrap();
        all_reduce_max(&mut t, &pg).unwrap();
        broadcast(&mut t, &pg).unwrap();
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(reduce_sum(&t, 0, &pg).unwrap(), Some(t.clone()));
        barrier(&pg).unwrap();
        assert!(is_main_process(&pg));
    }

    #[test]
    fn test_shard_range() {
        assert_eq!(shard_range(1000, 0, 2), 0..500);
        assert_eq!(shard_range(1000, 1, 2), 500..1000);
        assert_eq!(shard_range(12, 1, 3), 4..8);
    }

    #[test]
    fn test_all_gather_rows_two_ranks() {
        let mut groups = ProcessGroup::local_world(2);
        let g1 = groups.pop().unwrap();
        let g0 = groups.pop().unwrap();
        let h = thread::spawn(move || {
            let t = Array::full(&[1, 2], 1.0);
            all_gather_rows(&t, &g1).unwrap()
        });
        let stacked = all_gather_rows(&Array::full(&[2, 2], 0.0), &g0).unwrap();
        assert_eq!(stacked.shape(), &[3, 2]);
        assert_eq!(h.join().unwrap(), stacked);
    }

    #[test]
    fn test_local_rows() {
        let pg = ProcessGroup::local();
        let t = Array::<f32>::zeros(&[4, 2]);
        assert_eq!(local_rows(&t, &pg).unwrap().shape(), &[4, 2]);
    }
}
