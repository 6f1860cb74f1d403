//! Random - Seeded Array Generation
//!
//! Workers and the verifier must draw bit-identical data from the same seed,
//! so every random input in Tandem comes from a `SeededRng` wrapping
//! `StdRng::seed_from_u64`.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::array::Array;

// =============================================================================
// SeededRng
// =============================================================================

/// Deterministic random source for arrays.
#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
}

impl SeededRng {
    /// Creates a generator from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws `f32` values uniformly from `[0, 1)`.
    pub fn uniform(&mut self, shape: &[usize]) -> Array<f32> {
        let n = shape.iter().product();
        let data = (0..n).map(|_| self.rng.gen::<f32>()).collect();
        Array::from_vec(data, shape).unwrap_or_else(|_| Array::zeros(shape))
    }

    /// Draws `f64` values uniformly from `[low, high)`.
    pub fn uniform_f64(&mut self, shape: &[usize], low: f64, high: f64) -> Array<f64> {
        let n = shape.iter().product();
        let data = (0..n).map(|_| self.rng.gen_range(low..high)).collect();
        Array::from_vec(data, shape).unwrap_or_else(|_| Array::zeros(shape))
    }

    /// Draws integers uniformly from `[low, high)`.
    pub fn randint(&mut self, low: i64, high: i64, shape: &[usize]) -> Array<i64> {
        let n = shape.iter().product();
        let data = (0..n).map(|_| self.rng.gen_range(low..high)).collect();
        Array::from_vec(data, shape).unwrap_or_else(|_| Array::zeros(shape))
    }

    /// Draws a single integer from `[low, high]`.
    pub fn int_inclusive(&mut self, low: i64, high: i64) -> i64 {
        self.rng.gen_range(low..=high)
    }

    /// Picks one element of a non-empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            Some(&items[self.rng.gen_range(0..items.len())])
        }
    }
}

/// One-shot `uniform[0, 1)` draw from a fresh generator.
pub fn uniform(shape: &[usize], seed: u64) -> Array<f32> {
    SeededRng::new(seed).uniform(shape)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_data() {
        let a = uniform(&[10, 1000], 42);
        let b = uniform(&[10, 1000], 42);
        assert_eq!(a, b);
        assert_ne!(a, uniform(&[10, 1000], 43));
    }

    #[test]
    fn test_uniform_range() {
        let a = uniform(&[64], 1);
        assert!(a.as_slice().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_randint_range() {
        let mut rng = SeededRng::new(3);
        let ids = rng.randint(0, 12, &[10, 4]);
        assert_eq!(ids.shape(), &[10, 4]);
        assert!(ids.as_slice().iter().all(|&v| (0..12).contains(&v)));
    }

    #[test]
    fn test_stream_continues() {
        let mut rng = SeededRng::new(9);
        let first = rng.randint(1, 4, &[4]);
        let second = rng.uniform(&[2, 2]);

        let mut replay = SeededRng::new(9);
        assert_eq!(replay.randint(1, 4, &[4]), first);
        assert_eq!(replay.uniform(&[2, 2]), second);
    }

    #[test]
    fn test_choose() {
        let mut rng = SeededRng::new(0);
        assert!(rng.choose::<i32>(&[]).is_none());
        assert!([-1, 1].contains(rng.choose(&[-1, 1]).unwrap()));
    }
}
