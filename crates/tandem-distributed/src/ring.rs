//! Ring - Ring Collective Algorithms
//!
//! Each rank only talks to its neighbours: it sends to `rank + 1` and
//! receives from `rank - 1`. All-reduce is a reduce-scatter pass followed by
//! an all-gather pass over `world_size` chunks.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::ops::Range;

use crate::backend::{Backend, ReduceOp};
use crate::error::{CommError, CommResult};

/// Splits `len` elements into `parts` contiguous ranges, the first ones larger.
fn chunk_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

fn neighbours(rank: usize, world: usize) -> (usize, usize) {
    ((rank + world - 1) % world, (rank + 1) % world)
}

/// Ring all-reduce.
pub fn all_reduce<B: Backend + ?Sized>(
    backend: &B,
    data: &mut [f32],
    op: ReduceOp,
) -> CommResult<()> {
    let (rank, world) = (backend.rank(), backend.world_size());
    if world == 1 {
        return Ok(());
    }
    let tag = backend.next_collective_tag();
    let (left, right) = neighbours(rank, world);
    let chunks = chunk_ranges(data.len(), world);

    // Reduce-scatter: after world-1 steps rank r owns the full reduction of chunk r+1.
    for step in 0..world - 1 {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;
        backend.send(&data[chunks[send_idx].clone()], right, tag)?;
        let incoming = backend.recv(left, tag)?;
        let target = &mut data[chunks[recv_idx].clone()];
        if incoming.len() != target.len() {
            return Err(CommError::SizeMismatch {
                peer: left,
                expected: target.len(),
                actual: incoming.len(),
            });
        }
        for (acc, v) in target.iter_mut().zip(incoming) {
            *acc = op.apply_f32(*acc, v);
        }
    }

    // All-gather of the reduced chunks.
    for step in 0..world - 1 {
        let send_idx = (rank + 1 + world - step) % world;
        let recv_idx = (rank + world - step) % world;
        backend.send(&data[chunks[send_idx].clone()], right, tag)?;
        let incoming = backend.recv(left, tag)?;
        let target = &mut data[chunks[recv_idx].clone()];
        if incoming.len() != target.len() {
            return Err(CommError::SizeMismatch {
                peer: left,
                expected: target.len(),
                actual: incoming.len(),
            });
        }
        target.copy_from_slice(&incoming);
    }

    op.finish(data, world);
    Ok(())
}

/// Ring all-gather; each rank's block travels `world - 1` hops.
pub fn all_gather<B: Backend + ?Sized>(backend: &B, data: &[f32]) -> CommResult<Vec<Vec<f32>>> {
    let (rank, world) = (backend.rank(), backend.world_size());
    let mut blocks = vec![Vec::new(); world];
    blocks[rank] = data.to_vec();
    if world == 1 {
        return Ok(blocks);
    }
    let tag = backend.next_collective_tag();
    let (left, right) = neighbours(rank, world);
    for step in 0..world - 1 {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;
        backend.send(&blocks[send_idx], right, tag)?;
        blocks[recv_idx] = backend.recv(left, tag)?;
    }
    Ok(blocks)
}
