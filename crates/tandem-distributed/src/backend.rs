//! Backend - Communication Backend Abstractions
//!
//! A backend only has to move tagged `f32` buffers between ranks. Every
//! collective has a default implementation on top of `send`/`recv` (see
//! [`crate::mesh`]), and transports override the ones they can do better.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CommError, CommResult};
use crate::mailbox::Mailbox;
use crate::mesh;

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum all values.
    Sum,
    /// Compute product of all values.
    Product,
    /// Find minimum value.
    Min,
    /// Find maximum value.
    Max,
    /// Compute average of all values.
    Average,
}

impl ReduceOp {
    /// Applies the reduction operation to two f32 values.
    ///
    /// `Average` accumulates like `Sum`; divide with [`ReduceOp::finish`].
    #[must_use]
    pub fn apply_f32(&self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Average => a + b,
            ReduceOp::Product => a * b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    /// Post-processes an accumulated buffer reduced over `count` ranks.
    pub fn finish(&self, data: &mut [f32], count: usize) {
        if *self == ReduceOp::Average && count > 0 {
            let count = count as f32;
            for v in data {
                *v /= count;
            }
        }
    }

    /// Reduces equally sized slices in the order given.
    #[must_use]
    pub fn reduce_slices(&self, slices: &[Vec<f32>]) -> Vec<f32> {
        let Some(first) = slices.first() else {
            return Vec::new();
        };
        let mut result = first.clone();
        for slice in &slices[1..] {
            for (acc, &val) in result.iter_mut().zip(slice) {
                *acc = self.apply_f32(*acc, val);
            }
        }
        self.finish(&mut result, slices.len());
        result
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Message tag. User point-to-point tags must stay below [`COLLECTIVE_TAG_BIT`].
pub type Tag = u64;

/// High bit reserved for tags generated by collectives.
pub const COLLECTIVE_TAG_BIT: Tag = 1 << 63;

/// Trait for distributed communication backends.
///
/// Collectives must be entered by every rank in the same order; each call
/// draws a fresh tag from [`Backend::next_collective_tag`] so consecutive
/// collectives never read each other's messages.
pub trait Backend: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &str;

    /// Returns the rank of this process.
    fn rank(&self) -> usize;

    /// Returns the total world size.
    fn world_size(&self) -> usize;

    /// Sends a buffer to `dst`. Returns once the buffer is queued.
    fn send(&self, data: &[f32], dst: usize, tag: Tag) -> CommResult<()>;

    /// Blocks until a buffer from `src` with `tag` arrives.
    fn recv(&self, src: usize, tag: Tag) -> CommResult<Vec<f32>>;

    /// Returns the tag for the next collective call.
    fn next_collective_tag(&self) -> Tag;

    /// Reduces `data` across all ranks in place.
    fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> CommResult<()> {
        mesh::all_reduce(self, data, op)
    }

    /// Overwrites `data` with the buffer held by `src`.
    fn broadcast(&self, data: &mut [f32], src: usize) -> CommResult<()> {
        mesh::broadcast(self, data, src)
    }

    /// Collects every rank's buffer, indexed by rank. Sizes may differ.
    fn all_gather(&self, data: &[f32]) -> CommResult<Vec<Vec<f32>>> {
        mesh::all_gather(self, data)
    }

    /// Reduces onto `dst`. Only `dst` receives `Some`.
    fn reduce(&self, data: &[f32], dst: usize, op: ReduceOp) -> CommResult<Option<Vec<f32>>> {
        mesh::reduce(self, data, dst, op)
    }

    /// Hands chunk `r` of `src`'s `chunks` to rank `r`. Non-source ranks pass `None`.
    fn scatter(&self, chunks: Option<&[Vec<f32>]>, src: usize) -> CommResult<Vec<f32>> {
        mesh::scatter(self, chunks, src)
    }

    /// Sends `chunks[r]` to rank `r` and returns what each rank sent here.
    fn all_to_all(&self, chunks: &[Vec<f32>]) -> CommResult<Vec<Vec<f32>>> {
        mesh::all_to_all(self, chunks)
    }

    /// Synchronizes all processes.
    fn barrier(&self) -> CommResult<()> {
        mesh::barrier(self)
    }
}

/// Checks that `rank` names a member of a world of `world_size`.
pub fn check_rank(rank: usize, world_size: usize) -> CommResult<()> {
    if rank < world_size {
        Ok(())
    } else {
        Err(CommError::InvalidRank { rank, world_size })
    }
}

// =============================================================================
// Local Backend
// =============================================================================

/// In-process backend: every rank is a thread sharing one [`Mailbox`].
///
/// Dropping a rank closes it, so peers blocked on it fail rather than hang.
pub struct LocalBackend {
    rank: usize,
    world_size: usize,
    mailbox: Arc<Mailbox>,
    seq: AtomicU64,
}

impl LocalBackend {
    /// Creates one backend per rank, sharing a mailbox.
    #[must_use]
    pub fn create_world(world_size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::new());
        (0..world_size)
            .map(|rank| LocalBackend {
                rank,
                world_size,
                mailbox: Arc::clone(&mailbox),
                seq: AtomicU64::new(0),
            })
            .collect()
    }

    /// Creates a single backend (rank 0, world size 1).
    #[must_use]
    pub fn single() -> Self {
        LocalBackend {
            rank: 0,
            world_size: 1,
            mailbox: Arc::new(Mailbox::new()),
            seq: AtomicU64::new(0),
        }
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send(&self, data: &[f32], dst: usize, tag: Tag) -> CommResult<()> {
        check_rank(dst, self.world_size)?;
        if self.mailbox.is_closed(dst) {
            return Err(CommError::PeerDisconnected { peer: dst });
        }
        self.mailbox.deliver(self.rank, dst, tag, data.to_vec());
        Ok(())
    }

    fn recv(&self, src: usize, tag: Tag) -> CommResult<Vec<f32>> {
        check_rank(src, self.world_size)?;
        self.mailbox.take(src, self.rank, tag)
    }

    fn next_collective_tag(&self) -> Tag {
        COLLECTIVE_TAG_BIT | self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        self.mailbox.close(self.rank);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Runs `f` on every rank of a local world and returns results by rank.
    fn run_world<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(LocalBackend) -> T + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = LocalBackend::create_world(n)
            .into_iter()
            .map(|b| {
                let f = f.clone();
                thread::spawn(move || f(b))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_reduce_op_apply() {
        assert_eq!(ReduceOp::Sum.apply_f32(1.0, 2.0), 3.0);
        assert_eq!(ReduceOp::Product.apply_f32(2.0, 3.0), 6.0);
        assert_eq!(ReduceOp::Min.apply_f32(2.0, 3.0), 2.0);
        assert_eq!(ReduceOp::Max.apply_f32(2.0, 3.0), 3.0);
    }

    #[test]
    fn test_reduce_slices() {
        let slices = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        assert_eq!(ReduceOp::Sum.reduce_slices(&slices), vec![9.0, 12.0]);
        assert_eq!(ReduceOp::Average.reduce_slices(&slices), vec![3.0, 4.0]);
        assert!(ReduceOp::Sum.reduce_slices(&[]).is_empty());
    }

    #[test]
    fn test_local_backend_single() {
        let backend = LocalBackend::single();
        assert_eq!(backend.rank(), 0);
        assert_eq!(backend.world_size(), 1);
        assert_eq!(backend.name(), "local");

        let mut data = vec![1.0, 2.0];
        backend.all_reduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, vec![1.0, 2.0]);
    }

    #[test]
    fn test_collective_tags_increase() {
        let backend = LocalBackend::single();
        let a = backend.next_collective_tag();
        let b = backend.next_collective_tag();
        assert_ne!(a, b);
        assert!(a & COLLECTIVE_TAG_BIT != 0);
    }

    #[test]
    fn test_send_recv_threads() {
        let out = run_world(2, |b| {
            if b.rank() == 0 {
                b.send(&[1.0, 2.0, 3.0], 1, 5).unwrap();
                Vec::new()
            } else {
                b.recv(0, 5).unwrap()
            }
        });
        assert_eq!(out[1], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_invalid_rank() {
        let backend = LocalBackend::single();
        assert!(matches!(
            backend.send(&[1.0], 3, 0),
            Err(CommError::InvalidRank { rank: 3, .. })
        ));
    }

    #[test]
    fn test_dropped_peer_unblocks_recv() {
        let mut world = LocalBackend::create_world(2);
        let peer = world.pop().unwrap();
        let me = world.pop().unwrap();
        drop(peer);
        assert!(matches!(
            me.recv(1, 0),
            Err(CommError::PeerDisconnected { peer: 1 })
        ));
    }

    #[test]
    fn test_all_reduce_threads() {
        let out = run_world(3, |b| {
            let mut data = vec![b.rank() as f32 + 1.0; 4];
            b.all_reduce(&mut data, ReduceOp::Sum).unwrap();
            data
        });
        for data in out {
            assert_eq!(data, vec![6.0; 4]);
        }
    }
}
