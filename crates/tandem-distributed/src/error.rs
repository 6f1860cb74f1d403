//! Communication Error Types
//!
//! Errors raised by backends, the TCP transport and the tensor-level wrappers.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

/// Result type for communication operations.
pub type CommResult<T> = Result<T, CommError>;

/// Errors that can occur during collective communication.
#[derive(Error, Debug)]
pub enum CommError {
    /// Socket or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peers could not find each other.
    #[error("Rendezvous failed: {0}")]
    Rendezvous(String),

    /// A peer closed its connection while data was still expected.
    #[error("Peer rank {peer} disconnected")]
    PeerDisconnected {
        /// Rank of the peer that went away.
        peer: usize,
    },

    /// A frame did not decode or arrived out of protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A rank outside `0..world_size` was named.
    #[error("Invalid rank {rank} for world size {world_size}")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// Size of the world.
        world_size: usize,
    },

    /// A peer contributed a buffer of the wrong length.
    #[error("Size mismatch from rank {peer}: expected {expected} elements, got {actual}")]
    SizeMismatch {
        /// Rank that sent the buffer.
        peer: usize,
        /// Expected element count.
        expected: usize,
        /// Received element count.
        actual: usize,
    },

    /// Tensor construction or reshaping failed.
    #[error("Tensor error: {0}")]
    Tensor(#[from] tandem_core::Error),
}

impl From<bincode::Error> for CommError {
    fn from(err: bincode::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
