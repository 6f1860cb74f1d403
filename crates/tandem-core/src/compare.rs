//! Compare - Tolerance-Based Array Comparison
//!
//! Element `a` is close to expected `e` when `|a - e| <= atol + rtol * |e|`.
//! Failures are reported as a [`Discrepancy`] naming the first offending
//! element so a mismatch in a 10 000 element result stays readable.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::dtype::Scalar;

// =============================================================================
// Tolerance
// =============================================================================

/// Relative and absolute tolerance pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Relative tolerance, scaled by the expected magnitude.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-5,
        }
    }
}

impl Tolerance {
    /// Creates a tolerance pair.
    pub const fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    /// Returns a copy with a different absolute tolerance.
    pub const fn with_atol(self, atol: f64) -> Self {
        Self { atol, ..self }
    }

    /// Checks a single pair of values.
    pub fn is_close(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return false;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtol={:e}, atol={:e}", self.rtol, self.atol)
    }
}

// =============================================================================
// Discrepancy
// =============================================================================

/// Why two arrays failed to compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Discrepancy {
    /// The shapes differ.
    Shape {
        /// Shape produced.
        actual: Vec<usize>,
        /// Shape expected.
        expected: Vec<usize>,
    },
    /// Some elements are outside tolerance.
    Values {
        /// Flat index of the first mismatching element.
        first_index: usize,
        /// Value found at that index.
        actual: f64,
        /// Value expected at that index.
        expected: f64,
        /// Number of mismatching elements.
        mismatched: usize,
        /// Total element count.
        total: usize,
        /// Largest absolute difference over the whole array.
        max_abs_diff: f64,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape { actual, expected } => {
                write!(f, "shape {:?} != expected {:?}", actual, expected)
            }
            Self::Values {
                first_index,
                actual,
                expected,
                mismatched,
                total,
                max_abs_diff,
            } => write!(
                f,
                "{}/{} elements differ; first at flat index {}: {} != {} (max abs diff {:e})",
                mismatched, total, first_index, actual, expected, max_abs_diff
            ),
        }
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// Compares `actual` against `expected` element by element.
///
/// Two zero-element arrays are equal regardless of their shapes.
pub fn check_close<T: Scalar>(
    actual: &Array<T>,
    expected: &Array<T>,
    tol: Tolerance,
) -> Result<(), Discrepancy> {
    if actual.is_empty() && expected.is_empty() {
        return Ok(());
    }
    if actual.shape() != expected.shape() {
        return Err(Discrepancy::Shape {
            actual: actual.shape().to_vec(),
            expected: expected.shape().to_vec(),
        });
    }

    let mut first = None;
    let mut mismatched = 0;
    let mut max_abs_diff = 0.0f64;
    for (i, (&a, &e)) in actual.as_slice().iter().zip(expected.as_slice()).enumerate() {
        let (a, e) = (a.to_f64(), e.to_f64());
        let diff = (a - e).abs();
        if diff > max_abs_diff || diff.is_nan() {
            max_abs_diff = diff;
        }
        if !tol.is_close(a, e) {
            mismatched += 1;
            first.get_or_insert((i, a, e));
        }
    }

    match first {
        None => Ok(()),
        Some((first_index, actual_v, expected_v)) => Err(Discrepancy::Values {
            first_index,
            actual: actual_v,
            expected: expected_v,
            mismatched,
            total: expected.numel(),
            max_abs_diff,
        }),
    }
}

/// Compares absolute values, for results that are only defined up to sign.
pub fn check_close_abs<T: Scalar>(
    actual: &Array<T>,
    expected: &Array<T>,
    tol: Tolerance,
) -> Result<(), Discrepancy> {
    check_close(&actual.abs(), &expected.abs(), tol)
}

/// Boolean form of [`check_close`].
pub fn allclose<T: Scalar>(actual: &Array<T>, expected: &Array<T>, tol: Tolerance) -> bool {
    check_close(actual, expected, tol).is_ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(values: &[f32]) -> Array<f32> {
        Array::from_slice(values, &[values.len()]).unwrap()
    }

    #[test]
    fn test_is_close_formula() {
        let tol = Tolerance::new(1e-1, 0.0);
        assert!(tol.is_close(10.5, 10.0));
        assert!(!tol.is_close(11.5, 10.0));
        assert!(!Tolerance::default().is_close(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_check_close_reports_first_mismatch() {
        let err = check_close(
            &arr(&[1.0, 2.5, 3.0, 9.0]),
            &arr(&[1.0, 2.0, 3.0, 4.0]),
            Tolerance::default(),
        )
        .unwrap_err();
        match err {
            Discrepancy::Values {
                first_index,
                mismatched,
                total,
                max_abs_diff,
                ..
            } => {
                assert_eq!(first_index, 1);
                assert_eq!(mismatched, 2);
                assert_eq!(total, 4);
                assert!((max_abs_diff - 5.0).abs() < 1e-12);
            }
            Discrepancy::Shape { .. } => panic!("expected value discrepancy"),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array::<f32>::zeros(&[2, 3]);
        let b = Array::<f32>::zeros(&[3, 2]);
        let err = check_close(&a, &b, Tolerance::default()).unwrap_err();
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn test_empty_arrays_equal() {
        let a = Array::<f32>::empty(&[]);
        let b = Array::<f32>::empty(&[2]);
        assert!(allclose(&a, &b, Tolerance::default()));
    }

    #[test]
    fn test_abs_comparison() {
        let a = arr(&[-0.5, 0.25]);
        let b = arr(&[0.5, -0.25]);
        assert!(!allclose(&a, &b, Tolerance::default()));
        assert!(check_close_abs(&a, &b, Tolerance::default()).is_ok());
    }
}
