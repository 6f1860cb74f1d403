//! `ProcessGroup` - Process Group Abstraction
//!
//! Tensor-level wrappers over a shared [`Backend`]. Shapes travel out of band:
//! every wrapper rebuilds shapes from its own arguments, so peers only ever
//! exchange flat `f32` buffers.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::Arc;

use tandem_core::Array;

use crate::backend::{Backend, LocalBackend, ReduceOp, Tag};
use crate::error::{CommError, CommResult};

// =============================================================================
// ProcessGroup
// =============================================================================

/// A group of processes that can communicate with each other.
#[derive(Clone)]
pub struct ProcessGroup {
    backend: Arc<dyn Backend>,
    ranks: Vec<usize>,
}

/// Rebuilds an array whose leading dimension is unknown from a flat buffer.
fn rows_from_flat(data: Vec<f32>, trailing: &[usize], peer: usize) -> CommResult<Array> {
    let row_len: usize = trailing.iter().product();
    if row_len == 0 || data.len() % row_len != 0 {
        return Err(CommError::SizeMismatch {
            peer,
            expected: row_len,
            actual: data.len(),
        });
    }
    let mut shape = vec![data.len() / row_len];
    shape.extend_from_slice(trailing);
    Ok(Array::from_vec(data, &shape)?)
}

fn trailing_shape(tensor: &Array) -> Vec<usize> {
    tensor.shape().get(1..).unwrap_or(&[]).to_vec()
}

impl ProcessGroup {
    /// Creates a new process group with all ranks.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let world_size = backend.world_size();
        Self {
            backend,
            ranks: (0..world_size).collect(),
        }
    }

    /// Creates a process group with specific ranks.
    pub fn with_ranks(backend: Arc<dyn Backend>, ranks: Vec<usize>) -> Self {
        Self { backend, ranks }
    }

    /// Creates a single-rank group backed by a [`LocalBackend`].
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalBackend::single()))
    }

    /// Wraps every rank of a local world in its own group.
    #[must_use]
    pub fn local_world(world_size: usize) -> Vec<Self> {
        LocalBackend::create_world(world_size)
            .into_iter()
            .map(|b| Self::new(Arc::new(b)))
            .collect()
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    /// Returns the number of processes in this group.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    /// Returns the ranks in this group.
    #[must_use]
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Checks if this process is part of the group.
    #[must_use]
    pub fn contains(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }

    /// Synchronizes all processes in the group.
    pub fn barrier(&self) -> CommResult<()> {
        self.backend.barrier()
    }

    /// Performs all-reduce on a tensor.
    pub fn all_reduce_tensor(&self, tensor: &mut Array, op: ReduceOp) -> CommResult<()> {
        self.backend.all_reduce(tensor.as_mut_slice(), op)
    }

    /// Broadcasts a tensor from a source rank. Every rank passes a tensor of the same shape.
    pub fn broadcast_tensor(&self, tensor: &mut Array, src: usize) -> CommResult<()> {
        self.backend.broadcast(tensor.as_mut_slice(), src)
    }

    /// Gathers every rank's tensor, in rank order.
    ///
    /// Peers may contribute a different number of rows but must agree on the
    /// trailing dimensions.
    pub fn all_gather_tensor(&self, tensor: &Array) -> CommResult<Vec<Array>> {
        let trailing = trailing_shape(tensor);
        let gathered = self.backend.all_gather(tensor.as_slice())?;
        gathered
            .into_iter()
            .enumerate()
            .map(|(peer, data)| {
                if data.len() == tensor.numel() {
                    Ok(Array::from_vec(data, tensor.shape())?)
                } else {
                    rows_from_flat(data, &trailing, peer)
                }
            })
            .collect()
    }

    /// Reduces a tensor onto `dst`; only `dst` receives `Some`.
    pub fn reduce_tensor(&self, tensor: &Array, dst: usize, op: ReduceOp) -> CommResult<Option<Array>> {
        match self.backend.reduce(tensor.as_slice(), dst, op)? {
            Some(data) => Ok(Some(Array::from_vec(data, tensor.shape())?)),
            None => Ok(None),
        }
    }

    /// Splits `src`'s tensor row-wise into `world_size` equal parts and hands
    /// part `r` to rank `r`. Every rank passes a tensor of the full shape.
    pub fn scatter_tensor(&self, tensor: &Array, src: usize) -> CommResult<Array> {
        let world = self.world_size();
        let chunks = if self.rank() == src {
            Some(
                tensor
                    .split_rows(world)?
                    .into_iter()
                    .map(Array::into_vec)
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };
        let data = self.backend.scatter(chunks.as_deref(), src)?;
        let mut shape = tensor.shape().to_vec();
        if let Some(rows) = shape.first_mut() {
            *rows /= world;
        }
        Ok(Array::from_vec(data, &shape)?)
    }

    /// Splits the tensor row-wise into `world_size` equal parts, sends part
    /// `r` to rank `r` and returns the parts received, in sender order.
    pub fn all_to_all_tensor(&self, tensor: &Array) -> CommResult<Vec<Array>> {
        let parts = tensor.split_rows(self.world_size())?;
        self.all_to_all_v(&parts)
    }

    /// Variable-size all-to-all: `parts[r]` goes to rank `r`. Parts may have
    /// any number of rows, including zero, but share trailing dimensions.
    pub fn all_to_all_v(&self, parts: &[Array]) -> CommResult<Vec<Array>> {
        let Some(first) = parts.first() else {
            return Err(CommError::Protocol("all_to_all_v needs parts".to_string()));
        };
        let trailing = trailing_shape(first);
        let chunks: Vec<Vec<f32>> = parts.iter().map(Array::to_vec).collect();
        self.backend
            .all_to_all(&chunks)?
            .into_iter()
            .enumerate()
            .map(|(peer, data)| rows_from_flat(data, &trailing, peer))
            .collect()
    }

    /// Sends a tensor to `dst`.
    pub fn send_tensor(&self, tensor: &Array, dst: usize, tag: Tag) -> CommResult<()> {
        self.backend.send(tensor.as_slice(), dst, tag)
    }

    /// Receives a tensor of a known shape from `src`.
    pub fn recv_tensor(&self, src: usize, tag: Tag, shape: &[usize]) -> CommResult<Array> {
        let data = self.backend.recv(src, tag)?;
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CommError::SizeMismatch {
                peer: src,
                expected,
                actual: data.len(),
            });
        }
        Ok(Array::from_vec(data, shape)?)
    }
}

// =============================================================================
// World
// =============================================================================

/// Global distributed world.
pub struct World {
    default_group: ProcessGroup,
}

impl World {
    /// Initializes the distributed world.
    pub fn init(backend: Arc<dyn Backend>) -> Self {
        Self {
            default_group: ProcessGroup::new(backend),
        }
    }

    /// Creates a single-rank world.
    #[must_use]
    pub fn local() -> Self {
        Self {
            default_group: ProcessGroup::local(),
        }
    }

    /// Returns the default process group.
    #[must_use]
    pub fn default_group(&self) -> &ProcessGroup {
        &self.default_group
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.default_group.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.default_group.world_size()
    }

    /// Checks if this is the main process (rank 0).
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.rank() == 0
    }

    /// Synchronizes all processes.
    pub fn barrier(&self) -> CommResult<()> {
        self.default_group.barrier()
    }

    /// Creates a new process group with specific ranks.
    #[must_use]
    pub fn new_group(&self, ranks: Vec<usize>) -> ProcessGroup {
        ProcessGroup::with_ranks(Arc::clone(&self.default_group.backend), ranks)
    }
}

// =============================================================================
// Tests
// =============================================================================
