//! Fused Linear Operations
//!
//! The kernel behind the `fc` op: `input @ weight + bias` in a single pass
//! over the output. Weights use the `[in, out]` layout of `mul`.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rayon::prelude::*;
use tandem_core::Array;

use crate::error::{FusionError, FusionResult};
use crate::FusedOp;

// =============================================================================
// Fused Linear Operation
// =============================================================================

/// Fused linear operation: `output = input @ weight + bias`.
#[derive(Debug, Clone)]
pub struct FusedLinear {
    /// `[in_features, out_features]`.
    weight: Array,
    /// Exactly `[out_features]` when present.
    bias: Option<Array>,
    in_features: usize,
    out_features: usize,
}

impl FusedLinear {
    /// Creates the kernel.
    ///
    /// The bias must have shape `[out_features]`; a `[1, out_features]` bias is
    /// rejected even though it holds the right number of values.
    pub fn new(weight: Array, bias: Option<Array>) -> FusionResult<Self> {
        let shape = weight.shape();
        if shape.len() != 2 {
            return Err(FusionError::InvalidConfig(format!(
                "Weight must be 2D, got shape {:?}",
                shape
            )));
        }
        let (in_features, out_features) = (shape[0], shape[1]);

        if let Some(b) = &bias {
            if b.shape() != [out_features] {
                return Err(FusionError::ShapeMismatch {
                    expected: vec![out_features],
                    actual: b.shape().to_vec(),
                });
            }
        }

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Runs the kernel on a `[batch, in_features]` input.
    pub fn forward(&self, input: &Array) -> FusionResult<Array> {
        let input_shape = input.shape();
        if input_shape.len() != 2 {
            return Err(FusionError::InvalidConfig(format!(
                "Input must be 2D, got shape {:?}",
                input_shape
            )));
        }
        let (batch_size, input_features) = (input_shape[0], input_shape[1]);
        if input_features != self.in_features {
            return Err(FusionError::ShapeMismatch {
                expected: vec![batch_size, self.in_features],
                actual: input_shape.to_vec(),
            });
        }

        let input_data = input.as_slice();
        let weight_data = self.weight.as_slice();
        let bias_data = self.bias.as_ref().map(Array::as_slice);
        let (k, n) = (self.in_features, self.out_features);

        let result: Vec<f32> = (0..batch_size)
            .into_par_iter()
            .flat_map_iter(|b| {
                let row = &input_data[b * k..(b + 1) * k];
                (0..n).map(move |o| {
                    let mut sum: f32 = row
                        .iter()
                        .enumerate()
                        .map(|(p, &x)| x * weight_data[p * n + o])
                        .sum();
                    if let Some(bias) = bias_data {
                        sum += bias[o];
                    }
                    sum
                })
            })
            .collect();

        Ok(Array::from_vec(result, &[batch_size, n])?)
    }
}

impl FusedOp for FusedLinear {
    fn execute(&self, inputs: &[&Array]) -> FusionResult<Array> {
        let input = inputs
            .first()
            .ok_or_else(|| FusionError::InvalidConfig("No input provided".to_string()))?;
        self.forward(input)
    }

    fn name(&self) -> &str {
        "FusedLinear"
    }

    fn num_ops(&self) -> usize {
        if self.bias.is_some() {
            2
        } else {
            1
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fused_linear() {
        // [3, 2] weight, columns (1, 3, 5) and (2, 4, 6)
        let weight = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
        let bias = Array::from_vec(vec![0.5, 0.5], &[2]).unwrap();
        let fused = FusedLinear::new(weight, Some(bias)).unwrap();

        let input = Array::from_vec(vec![1.0, 1.0, 1.0], &[1, 3]).unwrap();
        let result = fused.forward(&input).unwrap().to_vec();
        assert!((result[0] - 9.5).abs() < 1e-5);
        assert!((result[1] - 12.5).abs() < 1e-5);
    }

    #[test]
    fn test_fused_linear_without_bias() {
        let weight = Array::from_vec(vec![1.0, -1.0, -1.0, 1.0], &[2, 2]).unwrap();
        let fused = FusedLinear::new(weight, None).unwrap();

        let input = Array::from_vec(vec![1.0, 2.0], &[1, 2]).unwrap();
        assert_eq!(fused.forward(&input).unwrap().to_vec(), vec![-1.0, 1.0]);
        assert_eq!(fused.num_ops(), 1);
    }

    #[test]
    fn test_matches_matmul_plus_bias() {
        let mut rng = tandem_core::SeededRng::new(3);
        let weight = rng.uniform(&[7, 4]);
        let bias = rng.uniform(&[4]);
        let input = rng.uniform(&[5, 7]);
        let fused = FusedLinear::new(weight.clone(), Some(bias.clone())).unwrap();

        let mut expected = input.matmul(&weight).unwrap();
        for (i, v) in expected.as_mut_slice().iter_mut().enumerate() {
            *v += bias.as_slice()[i % 4];
        }
        let out = fused.forward(&input).unwrap();
        tandem_core::check_close(&out, &expected, tandem_core::Tolerance::default()).unwrap();
    }

    #[test]
    fn test_rejects_row_shaped_bias() {
        let weight = Array::zeros(&[3, 2]);
        let bias = Array::zeros(&[1, 2]);
        let err = FusedLinear::new(weight, Some(bias)).unwrap_err();
        assert!(matches!(err, FusionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fused_op_trait() {
        let weight = Array::from_vec(vec![1.0], &[1, 1]).unwrap();
        let bias = Array::from_vec(vec![0.5], &[1]).unwrap();
        let fused = FusedLinear::new(weight, Some(bias)).unwrap();

        assert_eq!(fused.num_ops(), 2);
        assert_eq!(fused.name(), "FusedLinear");
        let x = Array::from_vec(vec![-2.0], &[1, 1]).unwrap();
        assert_eq!(fused.execute(&[&x]).unwrap().to_vec(), vec![-1.5]);
    }
}
