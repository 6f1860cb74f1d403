//! Linear Algebra Error Types
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::DType;
use thiserror::Error;

/// Result type for linear algebra operations.
pub type LinalgResult<T> = Result<T, LinalgError>;

/// Errors raised by decompositions and their gradients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    /// Input has fewer than two dimensions.
    #[error("Input must have at least 2 dimensions, got {ndim}")]
    NotEnoughDims {
        /// Dimensions of the input.
        ndim: usize,
    },

    /// The trailing two dimensions differ.
    #[error("Input must be square in its last two dimensions, got {rows} x {cols}")]
    NotSquare {
        /// Size of the second-to-last dimension.
        rows: usize,
        /// Size of the last dimension.
        cols: usize,
    },

    /// Triangle selector other than "L" or "U".
    #[error("UPLO must be 'L' or 'U', got '{0}'")]
    InvalidUplo(String),

    /// Element type the operator cannot handle.
    #[error("Unsupported dtype {0}: expected float32 or float64")]
    UnsupportedDType(DType),

    /// The iteration did not reach tolerance.
    #[error("Eigen-solver did not converge after {sweeps} sweeps (off-diagonal norm {off_norm:e})")]
    NoConvergence {
        /// Sweeps performed.
        sweeps: usize,
        /// Remaining off-diagonal Frobenius norm.
        off_norm: f64,
    },

    /// Underlying array error.
    #[error("Tensor error: {0}")]
    Tensor(#[from] tandem_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        let errors = [
            LinalgError::NotEnoughDims { ndim: 1 },
            LinalgError::NotSquare { rows: 12, cols: 32 },
            LinalgError::InvalidUplo("R".to_string()),
            LinalgError::UnsupportedDType(DType::I32),
        ];
        let messages: std::collections::HashSet<_> =
            errors.iter().map(ToString::to_string).collect();
        assert_eq!(messages.len(), 4);
        assert!(errors[3].to_string().contains("int32"));
    }
}
