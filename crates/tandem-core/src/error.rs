//! Error Types - Tandem Core Error Handling
//!
//! Errors raised by array construction and shape-checked operations.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for array operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Shape mismatch between arrays.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Element count does not match the requested shape.
    #[error("Cannot view {len} elements as shape {shape:?}")]
    InvalidShape {
        /// The requested shape.
        shape: Vec<usize>,
        /// Number of elements supplied.
        len: usize,
    },

    /// Invalid dimension index.
    #[error("Invalid dimension: index {index} for array with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension index.
        index: usize,
        /// Number of dimensions in the array.
        ndim: usize,
    },

    /// Index or range out of bounds.
    #[error("Index out of bounds: index {index} for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index.
        index: usize,
        /// The size of the dimension.
        size: usize,
    },

    /// Invalid operation for the given array.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidOperation`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for array operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
