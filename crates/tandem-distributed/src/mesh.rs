//! Mesh - Direct-Exchange Collective Algorithms
//!
//! Every rank talks to every other rank directly. These are the default
//! collective implementations on [`Backend`]; each one draws a single tag and
//! so costs exactly one `next_collective_tag` call per rank.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::backend::{check_rank, Backend, ReduceOp};
use crate::error::{CommError, CommResult};

fn expect_len(peer: usize, expected: usize, actual: usize) -> CommResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CommError::SizeMismatch {
            peer,
            expected,
            actual,
        })
    }
}

/// Exchanges buffers with every peer and returns all buffers by rank.
fn exchange<B: Backend + ?Sized>(backend: &B, data: &[f32]) -> CommResult<Vec<Vec<f32>>> {
    let tag = backend.next_collective_tag();
    let (rank, world) = (backend.rank(), backend.world_size());
    for peer in (0..world).filter(|&p| p != rank) {
        backend.send(data, peer, tag)?;
    }
    (0..world)
        .map(|peer| {
            if peer == rank {
                Ok(data.to_vec())
            } else {
                backend.recv(peer, tag)
            }
        })
        .collect()
}

/// All-reduce by full exchange, reducing in rank order on every rank.
pub fn all_reduce<B: Backend + ?Sized>(
    backend: &B,
    data: &mut [f32],
    op: ReduceOp,
) -> CommResult<()> {
    if backend.world_size() == 1 {
        return Ok(());
    }
    let all = exchange(backend, data)?;
    for (peer, buf) in all.iter().enumerate() {
        expect_len(peer, data.len(), buf.len())?;
    }
    data.copy_from_slice(&op.reduce_slices(&all));
    Ok(())
}

/// Broadcast from `src` to every other rank.
pub fn broadcast<B: Backend + ?Sized>(backend: &B, data: &mut [f32], src: usize) -> CommResult<()> {
    check_rank(src, backend.world_size())?;
    let tag = backend.next_collective_tag();
    if backend.rank() == src {
        for peer in (0..backend.world_size()).filter(|&p| p != src) {
            backend.send(data, peer, tag)?;
        }
    } else {
        let buf = backend.recv(src, tag)?;
        expect_len(src, data.len(), buf.len())?;
        data.copy_from_slice(&buf);
    }
    Ok(())
}

/// All-gather; buffers may differ in length between ranks.
pub fn all_gather<B: Backend + ?Sized>(backend: &B, data: &[f32]) -> CommResult<Vec<Vec<f32>>> {
    exchange(backend, data)
}

/// Reduce onto `dst`.
pub fn reduce<B: Backend + ?Sized>(
    backend: &B,
    data: &[f32],
    dst: usize,
    op: ReduceOp,
) -> CommResult<Option<Vec<f32>>> {
    check_rank(dst, backend.world_size())?;
    let tag = backend.next_collective_tag();
    if backend.rank() != dst {
        backend.send(data, dst, tag)?;
        return Ok(None);
    }
    let mut all = Vec::with_capacity(backend.world_size());
    for peer in 0..backend.world_size() {
        let buf = if peer == dst {
            data.to_vec()
        } else {
            backend.recv(peer, tag)?
        };
        expect_len(peer, data.len(), buf.len())?;
        all.push(buf);
    }
    Ok(Some(op.reduce_slices(&all)))
}

/// Scatter from `src`; `chunks` is only read on the source rank.
pub fn scatter<B: Backend + ?Sized>(
    backend: &B,
    chunks: Option<&[Vec<f32>]>,
    src: usize,
) -> CommResult<Vec<f32>> {
    let world = backend.world_size();
    check_rank(src, world)?;
    let tag = backend.next_collective_tag();
    if backend.rank() != src {
        return backend.recv(src, tag);
    }
    let chunks = chunks.ok_or_else(|| {
        CommError::Protocol(format!("scatter source rank {} supplied no chunks", src))
    })?;
    if chunks.len() != world {
        return Err(CommError::Protocol(format!(
            "scatter needs {} chunks, got {}",
            world,
            chunks.len()
        )));
    }
    for (peer, chunk) in chunks.iter().enumerate().filter(|&(p, _)| p != src) {
        backend.send(chunk, peer, tag)?;
    }
    Ok(chunks[src].clone())
}

/// Personalized exchange: `chunks[r]` goes to rank `r`.
pub fn all_to_all<B: Backend + ?Sized>(
    backend: &B,
    chunks: &[Vec<f32>],
) -> CommResult<Vec<Vec<f32>>> {
    let (rank, world) = (backend.rank(), backend.world_size());
    if chunks.len() != world {
        return Err(CommError::Protocol(format!(
            "all_to_all needs {} chunks, got {}",
            world,
            chunks.len()
        )));
    }
    let tag = backend.next_collective_tag();
    for (peer, chunk) in chunks.iter().enumerate().filter(|&(p, _)| p != rank) {
        backend.send(chunk, peer, tag)?;
    }
    (0..world)
        .map(|peer| {
            if peer == rank {
                Ok(chunks[rank].clone())
            } else {
                backend.recv(peer, tag)
            }
        })
        .collect()
}

/// Barrier: an empty message to and from every peer.
pub fn barrier<B: Backend + ?Sized>(backend: &B) -> CommResult<()> {
    exchange(backend, &[]).map(|_| ())
}
