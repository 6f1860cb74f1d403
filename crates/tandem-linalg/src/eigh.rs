//! Eigh - Batched Symmetric Eigen-Decomposition
//!
//! `eigh` treats the last two dimensions of its input as a stack of square
//! matrices and reads only one triangle of each, mirroring it to form the
//! symmetric matrix that is decomposed. All arithmetic happens in `f64`; the
//! outputs are cast back to the input's element type.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::str::FromStr;

use tandem_core::{Array, Scalar};

use crate::error::{LinalgError, LinalgResult};
use crate::jacobi::symmetric_eigen;

// =============================================================================
// Uplo
// =============================================================================

/// Which triangle of the input is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Uplo {
    /// Lower triangle (including the diagonal).
    #[default]
    Lower,
    /// Upper triangle (including the diagonal).
    Upper,
}

impl FromStr for Uplo {
    type Err = LinalgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(Self::Lower),
            "U" => Ok(Self::Upper),
            other => Err(LinalgError::InvalidUplo(other.to_string())),
        }
    }
}

// =============================================================================
// Forward
// =============================================================================

/// Result of [`eigh`].
#[derive(Debug, Clone, PartialEq)]
pub struct EighOutput<T: Scalar> {
    /// Eigenvalues, ascending, shape `[..., n]`.
    pub eigenvalues: Array<T>,
    /// Eigenvectors as columns, shape `[..., n, n]`.
    pub eigenvectors: Array<T>,
}

/// Splits `[..., n, n]` into `(batch, n)`, validating in a fixed order.
fn matrix_dims(shape: &[usize]) -> LinalgResult<(usize, usize)> {
    let ndim = shape.len();
    if ndim < 2 {
        return Err(LinalgError::NotEnoughDims { ndim });
    }
    let (rows, cols) = (shape[ndim - 2], shape[ndim - 1]);
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    Ok((shape[..ndim - 2].iter().product(), rows))
}

/// Symmetric eigen-decomposition of every matrix in `x`.
///
/// Errors, checked in this order: fewer than two dimensions, non-square
/// trailing dimensions, a `uplo` other than `"L"`/`"U"`, integer input.
pub fn eigh<T: Scalar>(x: &Array<T>, uplo: &str) -> LinalgResult<EighOutput<T>> {
    let (batch, n) = matrix_dims(x.shape())?;
    let uplo: Uplo = uplo.parse()?;
    if !T::DTYPE.is_float() {
        return Err(LinalgError::UnsupportedDType(T::DTYPE));
    }

    let data = x.as_slice();
    let mut values = Vec::with_capacity(batch * n);
    let mut vectors = Vec::with_capacity(batch * n * n);
    for b in 0..batch {
        let m = &data[b * n * n..(b + 1) * n * n];
        let mut sym = vec![0.0f64; n * n];
        for i in 0..n {
            for j in 0..n {
                let (r, c) = match uplo {
                    Uplo::Lower if j > i => (j, i),
                    Uplo::Upper if j < i => (j, i),
                    _ => (i, j),
                };
                sym[i * n + j] = m[r * n + c].to_f64();
            }
        }
        let (w, v) = symmetric_eigen(sym, n)?;
        values.extend(w.into_iter().map(T::from_f64));
        vectors.extend(v.into_iter().map(T::from_f64));
    }

    let vector_shape = x.shape().to_vec();
    let value_shape = &vector_shape[..vector_shape.len() - 1];
    Ok(EighOutput {
        eigenvalues: Array::from_vec(values, value_shape)?,
        eigenvectors: Array::from_vec(vectors, &vector_shape)?,
    })
}

// =============================================================================
// Backward
// =============================================================================

/// Gradient of a scalar loss with respect to the input of [`eigh`].
///
/// For `A = V diag(w) V^T` the input gradient is
/// `V (diag(gw) + F * (V^T gV)) V^T` with `F[i][j] = 1 / (w[j] - w[i])` off the
/// diagonal, symmetrized as `(G + G^T) / 2`. Pairs of equal eigenvalues
/// contribute nothing. Either upstream gradient may be absent.
pub fn eigh_backward<T: Scalar>(
    eigenvalues: &Array<T>,
    eigenvectors: &Array<T>,
    grad_values: Option<&Array<T>>,
    grad_vectors: Option<&Array<T>>,
) -> LinalgResult<Array<T>> {
    let (batch, n) = matrix_dims(eigenvectors.shape())?;
    let expected_w: Vec<usize> = eigenvectors.shape()[..eigenvectors.ndim() - 1].to_vec();
    if eigenvalues.shape() != expected_w.as_slice() {
        return Err(tandem_core::Error::ShapeMismatch {
            expected: expected_w,
            actual: eigenvalues.shape().to_vec(),
        }
        .into());
    }
    for (grad, shape) in [
        (grad_values, eigenvalues.shape()),
        (grad_vectors, eigenvectors.shape()),
    ] {
        if let Some(g) = grad {
            if g.shape() != shape {
                return Err(tandem_core::Error::ShapeMismatch {
                    expected: shape.to_vec(),
                    actual: g.shape().to_vec(),
                }
                .into());
            }
        }
    }

    let w_all: Vec<f64> = eigenvalues.as_slice().iter().map(|v| v.to_f64()).collect();
    let v_all: Vec<f64> = eigenvectors.as_slice().iter().map(|v| v.to_f64()).collect();
    let gw_all: Option<Vec<f64>> =
        grad_values.map(|g| g.as_slice().iter().map(|v| v.to_f64()).collect());
    let gv_all: Option<Vec<f64>> =
        grad_vectors.map(|g| g.as_slice().iter().map(|v| v.to_f64()).collect());

    let mut out = Vec::with_capacity(batch * n * n);
    for b in 0..batch {
        let w = &w_all[b * n..(b + 1) * n];
        let v = &v_all[b * n * n..(b + 1) * n * n];

        // inner = diag(gw) + F * (V^T gV)
        let mut inner = vec![0.0f64; n * n];
        if let Some(gv) = &gv_all {
            let gv = &gv[b * n * n..(b + 1) * n * n];
            for i in 0..n {
                for j in 0..n {
                    let gap = w[j] - w[i];
                    if i == j || gap.abs() <= f64::EPSILON * (w[i].abs() + w[j].abs()) {
                        continue;
                    }
                    let mut vt_gv = 0.0;
                    for k in 0..n {
                        vt_gv += v[k * n + i] * gv[k * n + j];
                    }
                    inner[i * n + j] = vt_gv / gap;
                }
            }
        }
        if let Some(gw) = &gw_all {
            for i in 0..n {
                inner[i * n + i] += gw[b * n + i];
            }
        }

        // G = V inner V^T
        let mut tmp = vec![0.0f64; n * n];
        for i in 0..n {
            for j in 0..n {
                tmp[i * n + j] = (0..n).map(|k| v[i * n + k] * inner[k * n + j]).sum();
            }
        }
        let mut g = vec![0.0f64; n * n];
        for i in 0..n {
            for j in 0..n {
                g[i * n + j] = (0..n).map(|k| tmp[i * n + k] * v[j * n + k]).sum();
            }
        }
        for i in 0..n {
            for j in 0..n {
                out.push(T::from_f64(0.5 * (g[i * n + j] + g[j * n + i])));
            }
        }
    }

    Ok(Array::from_vec(out, eigenvectors.shape())?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{check_close, check_close_abs, DType, SeededRng, Tolerance};

    fn tol() -> Tolerance {
        Tolerance::new(1e-6, 1e-6)
    }

    fn random_matrix(n: usize, seed: u64) -> Array<f64> {
        SeededRng::new(seed).uniform_f64(&[n, n], 0.0, 1.0)
    }

    fn symmetrize(x: &Array<f64>, uplo: Uplo) -> Array<f64> {
        let n = x.shape()[0];
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let keep = match uplo {
                    Uplo::Lower => i >= j,
                    Uplo::Upper => i <= j,
                };
                data[i * n + j] = if keep { x.get(&[i, j]).unwrap() } else { x.get(&[j, i]).unwrap() };
            }
        }
        Array::from_vec(data, &[n, n]).unwrap()
    }

    #[test]
    fn test_two_by_two_spectrum() {
        let x = Array::from_vec(vec![2.0f64, 1.0, 1.0, 2.0], &[2, 2]).unwrap();
        let out = eigh(&x, "L").unwrap();
        check_close(&out.eigenvalues, &Array::from_vec(vec![1.0, 3.0], &[2]).unwrap(), tol())
            .unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let expected = Array::from_vec(vec![h, h, h, h], &[2, 2]).unwrap();
        check_close_abs(&out.eigenvectors, &expected, tol()).unwrap();
    }

    #[test]
    fn test_tridiagonal_analytic_spectrum() {
        // tridiag(-1, 2, -1) has eigenvalues 2 - 2 cos(k pi / (n + 1))
        let n = 10;
        let mut data = vec![0.0f64; n * n];
        for i in 0..n {
            data[i * n + i] = 2.0;
            if i + 1 < n {
                data[i * n + i + 1] = -1.0;
                data[(i + 1) * n + i] = -1.0;
            }
        }
        let x = Array::from_vec(data, &[n, n]).unwrap();
        let out = eigh(&x, "U").unwrap();
        let expected: Vec<f64> = (1..=n)
            .map(|k| 2.0 - 2.0 * (k as f64 * std::f64::consts::PI / (n + 1) as f64).cos())
            .collect();
        check_close(&out.eigenvalues, &Array::from_vec(expected, &[n]).unwrap(), tol()).unwrap();

        // eigenvector k is sin(j k pi / (n + 1)), normalized
        let norm = (2.0 / (n + 1) as f64).sqrt();
        let mut vectors = vec![0.0f64; n * n];
        for j in 0..n {
            for k in 0..n {
                let angle = ((j + 1) * (k + 1)) as f64 * std::f64::consts::PI / (n + 1) as f64;
                vectors[j * n + k] = norm * angle.sin();
            }
        }
        let expected_v = Array::from_vec(vectors, &[n, n]).unwrap();
        check_close_abs(&out.eigenvectors, &expected_v, tol()).unwrap();
    }

    #[test]
    fn test_residual_and_orthonormality() {
        let n = 10;
        let x = symmetrize(&random_matrix(n, 123), Uplo::Lower);
        let out = eigh(&x, "L").unwrap();
        let v = &out.eigenvectors;

        let av = x.matmul(v).unwrap();
        for j in 0..n {
            let lambda = out.eigenvalues.get(&[j]).unwrap();
            for i in 0..n {
                let lhs = av.get(&[i, j]).unwrap();
                let rhs = lambda * v.get(&[i, j]).unwrap();
                assert!((lhs - rhs).abs() < 1e-9, "residual at ({i}, {j})");
            }
        }

        let vtv = v.transpose().unwrap().matmul(v).unwrap();
        let mut eye = Array::<f64>::zeros(&[n, n]);
        for i in 0..n {
            eye.as_mut_slice()[i * n + i] = 1.0;
        }
        check_close(&vtv, &eye, Tolerance::new(0.0, 1e-10)).unwrap();

        let values = out.eigenvalues.as_slice();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_uplo_reads_one_triangle() {
        let raw = random_matrix(6, 7);
        let lower = eigh(&raw, "L").unwrap();
        let upper = eigh(&raw, "U").unwrap();
        assert_eq!(lower, eigh(&symmetrize(&raw, Uplo::Lower), "L").unwrap());
        assert_eq!(upper, eigh(&symmetrize(&raw, Uplo::Upper), "U").unwrap());
        assert_ne!(lower.eigenvalues, upper.eigenvalues);
    }

    #[test]
    fn test_batched_input() {
        let a = symmetrize(&random_matrix(4, 1), Uplo::Lower);
        let b = symmetrize(&random_matrix(4, 2), Uplo::Lower);
        let mut data = a.to_vec();
        data.extend(b.to_vec());
        let stacked = Array::from_vec(data, &[2, 4, 4]).unwrap();
        let out = eigh(&stacked, "L").unwrap();
        assert_eq!(out.eigenvalues.shape(), &[2, 4]);
        assert_eq!(out.eigenvectors.shape(), &[2, 4, 4]);
        let second = eigh(&b, "L").unwrap();
        assert_eq!(&out.eigenvalues.as_slice()[4..], second.eigenvalues.as_slice());
    }

    #[test]
    fn test_float32_input() {
        let x = SeededRng::new(123).uniform(&[5, 5]);
        let out = eigh(&x, "L").unwrap();
        assert_eq!(out.eigenvalues.dtype(), DType::F32);
        let reference = eigh(&symmetrize(&x.cast(), Uplo::Lower), "L").unwrap();
        check_close(&out.eigenvalues.cast(), &reference.eigenvalues, Tolerance::new(1e-5, 1e-5))
            .unwrap();
    }

    #[test]
    fn test_validation_errors_in_order() {
        let one_d = Array::<f32>::zeros(&[12]);
        assert_eq!(eigh(&one_d, "R"), Err(LinalgError::NotEnoughDims { ndim: 1 }));

        let rect = Array::<f32>::zeros(&[12, 32]);
        assert_eq!(eigh(&rect, "R"), Err(LinalgError::NotSquare { rows: 12, cols: 32 }));

        let square = Array::<f32>::zeros(&[4, 4]);
        assert_eq!(eigh(&square, "R"), Err(LinalgError::InvalidUplo("R".to_string())));

        let ints = Array::<i32>::zeros(&[4, 4]);
        assert_eq!(eigh(&ints, "L"), Err(LinalgError::UnsupportedDType(DType::I32)));
    }

    #[test]
    fn test_gradient_of_eigenvalue_sum_is_identity() {
        let n = 5;
        let x = symmetrize(&random_matrix(n, 3), Uplo::Lower);
        let out = eigh(&x, "L").unwrap();
        let ones = Array::full(&[n], 1.0f64);
        let g = eigh_backward(&out.eigenvalues, &out.eigenvectors, Some(&ones), None).unwrap();
        let mut eye = Array::<f64>::zeros(&[n, n]);
        for i in 0..n {
            eye.as_mut_slice()[i * n + i] = 1.0;
        }
        check_close(&g, &eye, Tolerance::new(0.0, 1e-10)).unwrap();
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let n = 4;
        let x = symmetrize(&random_matrix(n, 11), Uplo::Lower);
        let direction = symmetrize(&random_matrix(n, 12), Uplo::Lower);
        let gw = SeededRng::new(13).uniform_f64(&[n], -1.0, 1.0);
        let gv = SeededRng::new(14).uniform_f64(&[n, n], -1.0, 1.0);

        // loss = sum(gw * w) + sum(gv * v)
        let loss = |m: &Array<f64>| {
            let o = eigh(m, "L").unwrap();
            let a: f64 = o.eigenvalues.as_slice().iter().zip(gw.as_slice()).map(|(p, q)| p * q).sum();
            let b: f64 = o.eigenvectors.as_slice().iter().zip(gv.as_slice()).map(|(p, q)| p * q).sum();
            a + b
        };
        let eps = 1e-6;
        let plus = x.add(&direction.scale(eps)).unwrap();
        let minus = x.add(&direction.scale(-eps)).unwrap();
        let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);

        let out = eigh(&x, "L").unwrap();
        let g = eigh_backward(&out.eigenvalues, &out.eigenvectors, Some(&gw), Some(&gv)).unwrap();
        let analytic: f64 = g.as_slice().iter().zip(direction.as_slice()).map(|(p, q)| p * q).sum();
        assert!((numeric - analytic).abs() < 1e-5, "{numeric} vs {analytic}");
    }

    #[test]
    fn test_gradient_is_symmetric() {
        let n = 6;
        let x = random_matrix(n, 21);
        let out = eigh(&x, "U").unwrap();
        let gv = out.eigenvectors.map(f64::signum);
        let gw = Array::full(&[n], 1.0f64);
        let g = eigh_backward(&out.eigenvalues, &out.eigenvectors, Some(&gw), Some(&gv)).unwrap();
        check_close(&g, &g.transpose().unwrap(), Tolerance::new(1e-6, 1e-6)).unwrap();
    }
}
