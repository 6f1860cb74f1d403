//! Jacobi - Cyclic Jacobi Eigen-Solver
//!
//! Works on one dense symmetric `n x n` matrix in `f64`, row-major.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tracing::trace;

use crate::error::{LinalgError, LinalgResult};

/// Sweep limit; Jacobi converges quadratically, so this is never reached on
/// finite input.
pub const MAX_SWEEPS: usize = 64;

fn off_diagonal_norm(a: &[f64], n: usize) -> f64 {
    let mut sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += a[i * n + j] * a[i * n + j];
            }
        }
    }
    sum.sqrt()
}

/// Diagonalizes a symmetric matrix.
///
/// Returns eigenvalues ascending and the matching eigenvectors as the columns
/// of a row-major `n x n` matrix. Each vector is signed so that its largest
/// component is positive.
pub fn symmetric_eigen(mut a: Vec<f64>, n: usize) -> LinalgResult<(Vec<f64>, Vec<f64>)> {
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tol = (n.max(1) as f64) * f64::EPSILON * scale.max(f64::MIN_POSITIVE);

    let mut sweeps = 0;
    loop {
        let off = off_diagonal_norm(&a, n);
        if off <= tol {
            break;
        }
        if sweeps == MAX_SWEEPS {
            return Err(LinalgError::NoConvergence {
                sweeps,
                off_norm: off,
            });
        }
        for p in 0..n {
            for q in p + 1..n {
                rotate(&mut a, &mut v, n, p, q);
            }
        }
        sweeps += 1;
    }
    trace!(n, sweeps, "jacobi converged");

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[i * n + i].total_cmp(&a[j * n + j]));

    let values = order.iter().map(|&i| a[i * n + i]).collect();
    let mut vectors = vec![0.0; n * n];
    for (col, &src) in order.iter().enumerate() {
        let mut pivot = 0.0f64;
        for row in 0..n {
            let x = v[row * n + src];
            if x.abs() > pivot.abs() {
                pivot = x;
            }
        }
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        for row in 0..n {
            vectors[row * n + col] = sign * v[row * n + src];
        }
    }
    Ok((values, vectors))
}

/// Applies the rotation that zeroes `a[p][q]`.
fn rotate(a: &mut [f64], v: &mut [f64], n: usize, p: usize, q: usize) {
    let apq = a[p * n + q];
    if apq == 0.0 {
        return;
    }
    let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
    let t = if theta.is_infinite() {
        0.0
    } else {
        theta.signum() / (theta.abs() + theta.mul_add(theta, 1.0).sqrt())
    };
    let c = 1.0 / t.mul_add(t, 1.0).sqrt();
    let s = t * c;

    for k in 0..n {
        let (akp, akq) = (a[k * n + p], a[k * n + q]);
        a[k * n + p] = c * akp - s * akq;
        a[k * n + q] = s * akp + c * akq;
    }
    for k in 0..n {
        let (apk, aqk) = (a[p * n + k], a[q * n + k]);
        a[p * n + k] = c * apk - s * aqk;
        a[q * n + k] = s * apk + c * aqk;
    }
    a[p * n + q] = 0.0;
    a[q * n + p] = 0.0;
    for k in 0..n {
        let (vkp, vkq) = (v[k * n + p], v[k * n + q]);
        v[k * n + p] = c * vkp - s * vkq;
        v[k * n + q] = s * vkp + c * vkq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_by_two() {
        let (w, v) = symmetric_eigen(vec![2.0, 1.0, 1.0, 2.0], 2).unwrap();
        assert!((w[0] - 1.0).abs() < 1e-12);
        assert!((w[1] - 3.0).abs() < 1e-12);
        let h = std::f64::consts::FRAC_1_SQRT_2;
        // second eigenvector is (1, 1)/sqrt(2)
        assert!((v[1] - h).abs() < 1e-12);
        assert!((v[3] - h).abs() < 1e-12);
    }

    #[test]
    fn test_already_diagonal() {
        let (w, v) = symmetric_eigen(vec![3.0, 0.0, 0.0, -1.0], 2).unwrap();
        assert_eq!(w, vec![-1.0, 3.0]);
        assert_eq!(v, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_empty_and_one_by_one() {
        assert_eq!(symmetric_eigen(Vec::new(), 0).unwrap().0, Vec::<f64>::new());
        let (w, v) = symmetric_eigen(vec![-4.5], 1).unwrap();
        assert_eq!(w, vec![-4.5]);
        assert_eq!(v, vec![1.0]);
    }
}
