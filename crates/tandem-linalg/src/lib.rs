//! Tandem Linalg - Symmetric Eigen-Decomposition
//!
//! Batched `eigh` over stacks of square matrices, with the argument checks the
//! operator performs before touching data and a closed-form backward pass.
//!
//! # Example
//!
//! ```rust
//! use tandem_core::Array;
//! use tandem_linalg::eigh;
//!
//! let x = Array::from_vec(vec![2.0f64, 1.0, 1.0, 2.0], &[2, 2]).unwrap();
//! let out = eigh(&x, "L").unwrap();
//! assert!((out.eigenvalues.as_slice()[1] - 3.0).abs() < 1e-12);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::similar_names)]

pub mod eigh;
pub mod error;
pub mod jacobi;

pub use eigh::{eigh, eigh_backward, EighOutput, Uplo};
pub use error::{LinalgError, LinalgResult};
