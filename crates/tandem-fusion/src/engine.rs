//! Inference Engine
//!
//! A `Predictor` owns an optimized program, lowers it with the engine's own
//! passes (the `fc` kernel replaces `mul + elementwise_add`) and runs it.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use tandem_core::Array;
use tracing::debug;

use crate::error::{FusionError, FusionResult};
use crate::executor::Executor;
use crate::pass::{OptimizationStats, PassManager};
use crate::program::{Program, Scope};

// =============================================================================
// Engine Configuration
// =============================================================================

/// Settings for one predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest leading dimension accepted on any feed.
    pub max_batch_size: usize,
    /// Programs with fewer ops than this are run without lowering.
    pub min_subgraph_size: usize,
    /// Passes applied when the predictor is built.
    pub lowering_passes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            min_subgraph_size: 0,
            lowering_passes: vec!["fc_fuse_pass".to_string()],
        }
    }
}

impl EngineConfig {
    /// Configuration that runs programs exactly as given.
    pub fn reference() -> Self {
        Self {
            lowering_passes: Vec::new(),
            ..Self::default()
        }
    }
}

// =============================================================================
// Predictor
// =============================================================================

/// A lowered program ready to run.
#[derive(Debug, Clone)]
pub struct Predictor {
    program: Program,
    config: EngineConfig,
    lowering: OptimizationStats,
}

impl Predictor {
    /// Lowers `program` according to `config`.
    pub fn new(mut program: Program, config: EngineConfig) -> FusionResult<Self> {
        let lowering = if program.ops.len() >= config.min_subgraph_size {
            PassManager::from_names(&config.lowering_passes)?.run(&mut program)?
        } else {
            OptimizationStats::default()
        };
        debug!(ops = ?program.op_types(), "predictor ready");
        Ok(Self {
            program,
            config,
            lowering,
        })
    }

    /// Op types after lowering.
    pub fn lowered_op_types(&self) -> Vec<&'static str> {
        self.program.op_types()
    }

    /// Rewrites applied by lowering.
    pub fn lowering_stats(&self) -> &OptimizationStats {
        &self.lowering
    }

    /// Runs the program and returns its fetch targets.
    pub fn run(&self, feeds: &Scope) -> FusionResult<Vec<Array>> {
        for (name, value) in feeds {
            let batch = value.shape().first().copied().unwrap_or(1);
            if batch > self.config.max_batch_size {
                return Err(FusionError::InvalidConfig(format!(
                    "feed '{}' has batch {} above max_batch_size {}",
                    name, batch, self.config.max_batch_size
                )));
            }
        }
        Executor::run(&self.program, feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{OpDesc, OpKind};
    use tandem_core::SeededRng;

    fn mul_add(bias_shape: &[usize]) -> (Program, Scope) {
        let mut rng = SeededRng::new(4);
        let program = Program {
            ops: vec![
                OpDesc::new(
                    OpKind::Mul {
                        x_num_col_dims: 1,
                        y_num_col_dims: 1,
                    },
                    &["x", "w"],
                    "m",
                ),
                OpDesc::new(OpKind::ElementwiseAdd { axis: -1 }, &["m", "b"], "out"),
            ],
            weights: Scope::from([
                ("w".to_string(), rng.uniform(&[6, 3])),
                ("b".to_string(), rng.uniform(bias_shape)),
            ]),
            feeds: vec!["x".to_string()],
            fetches: vec!["out".to_string()],
        };
        let feeds = Scope::from([("x".to_string(), rng.uniform(&[2, 6]))]);
        (program, feeds)
    }

    #[test]
    fn test_lowering_to_fc() {
        let (program, feeds) = mul_add(&[3]);
        let predictor = Predictor::new(program.clone(), EngineConfig::default()).unwrap();
        assert_eq!(predictor.lowered_op_types(), vec!["fc"]);
        assert_eq!(predictor.lowering_stats().fusions_applied, 1);

        let reference = Predictor::new(program, EngineConfig::reference()).unwrap();
        assert_eq!(reference.lowered_op_types(), vec!["mul", "elementwise_add"]);
        let a = predictor.run(&feeds).unwrap();
        let b = reference.run(&feeds).unwrap();
        tandem_core::check_close(&a[0], &b[0], tandem_core::Tolerance::default()).unwrap();
    }

    #[test]
    fn test_row_shaped_bias_fails_after_lowering() {
        let (program, feeds) = mul_add(&[1, 3]);
        let reference = Predictor::new(program.clone(), EngineConfig::reference()).unwrap();
        assert!(reference.run(&feeds).is_ok());

        let predictor = Predictor::new(program, EngineConfig::default()).unwrap();
        assert!(matches!(
            predictor.run(&feeds),
            Err(FusionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_small_programs_skip_lowering() {
        let (program, _) = mul_add(&[3]);
        let config = EngineConfig {
            min_subgraph_size: 3,
            ..EngineConfig::default()
        };
        let predictor = Predictor::new(program, config).unwrap();
        assert_eq!(predictor.lowered_op_types(), vec!["mul", "elementwise_add"]);
    }

    #[test]
    fn test_batch_limit() {
        let (program, _) = mul_add(&[3]);
        let predictor = Predictor::new(program, EngineConfig::default()).unwrap();
        let feeds = Scope::from([("x".to_string(), Array::zeros(&[11, 6]))]);
        assert!(matches!(
            predictor.run(&feeds),
            Err(FusionError::InvalidConfig(_))
        ));
    }
}
