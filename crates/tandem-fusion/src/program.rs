//! Program IR
//!
//! A program is a straight-line list of ops over named variables. Weights are
//! stored with the program; inputs are fed at run time. `ProgramConfig` is the
//! shape-only description a sampler draws, turned into data by `materialize`.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tandem_core::{Array, SeededRng};

/// Named variables visible to a running program.
pub type Scope = BTreeMap<String, Array>;

// =============================================================================
// Ops
// =============================================================================

/// Operator type with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpKind {
    /// `[d0, .., dn] -> [prod(d[..axis]), prod(d[axis..])]`.
    Flatten2 {
        /// Split point.
        axis: usize,
    },
    /// `alpha * op(X) @ op(Y)` on 2-D operands.
    Matmul {
        /// Output scale.
        alpha: f32,
        /// Transpose X before multiplying.
        transpose_x: bool,
        /// Transpose Y before multiplying.
        transpose_y: bool,
    },
    /// `X + Y` where Y's dims line up with X's starting at `axis`
    /// (`-1` aligns Y with X's trailing dims).
    ElementwiseAdd {
        /// Alignment of Y inside X.
        axis: i32,
    },
    /// Matrix product of X and Y after flattening each to 2-D.
    Mul {
        /// Leading X dims folded into rows.
        x_num_col_dims: usize,
        /// Leading Y dims folded into rows.
        y_num_col_dims: usize,
    },
    /// `Input @ W + Bias` in one kernel.
    Fc {
        /// Leading input dims folded into rows.
        in_num_col_dims: usize,
    },
}

impl OpKind {
    /// Registry name of the op type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OpKind::Flatten2 { .. } => "flatten2",
            OpKind::Matmul { .. } => "matmul",
            OpKind::ElementwiseAdd { .. } => "elementwise_add",
            OpKind::Mul { .. } => "mul",
            OpKind::Fc { .. } => "fc",
        }
    }

    /// Number of positional inputs the op reads.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Flatten2 { .. } => 1,
            OpKind::Matmul { .. } | OpKind::ElementwiseAdd { .. } | OpKind::Mul { .. } => 2,
            OpKind::Fc { .. } => 3,
        }
    }
}

/// One op in a program.
///
/// Inputs are positional: `[X]` for flatten2, `[X, Y]` for matmul, mul and
/// elementwise_add, `[Input, W, Bias]` for fc. Every op has one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    /// Type and attributes.
    pub kind: OpKind,
    /// Input variable names.
    pub inputs: Vec<String>,
    /// Output variable name.
    pub output: String,
}

impl OpDesc {
    /// Creates an op.
    pub fn new(kind: OpKind, inputs: &[&str], output: &str) -> Self {
        Self {
            kind,
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            output: output.to_string(),
        }
    }

    /// Registry name of the op type.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

impl fmt::Display for OpDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}({})", self.output, self.type_name(), self.inputs.join(", "))
    }
}

// =============================================================================
// Program Config
// =============================================================================

/// Shape of a tensor a program needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorConfig {
    /// Dimensions.
    pub shape: Vec<usize>,
}

impl TensorConfig {
    /// Creates a config from a shape.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
        }
    }
}

/// Shape-only description of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Ops in execution order.
    pub ops: Vec<OpDesc>,
    /// Weights stored with the program.
    pub weights: BTreeMap<String, TensorConfig>,
    /// Inputs fed at run time.
    pub inputs: BTreeMap<String, TensorConfig>,
    /// Variables fetched after the run.
    pub outputs: Vec<String>,
}

impl ProgramConfig {
    /// Returns the op type names in order.
    pub fn op_types(&self) -> Vec<&'static str> {
        self.ops.iter().map(OpDesc::type_name).collect()
    }

    /// Draws weight values from `seed` and builds the program.
    pub fn materialize(&self, seed: u64) -> Program {
        let mut rng = SeededRng::new(seed);
        let weights = self
            .weights
            .iter()
            .map(|(name, t)| (name.clone(), rng.uniform(&t.shape)))
            .collect();
        Program {
            ops: self.ops.clone(),
            weights,
            feeds: self.inputs.keys().cloned().collect(),
            fetches: self.outputs.clone(),
        }
    }

    /// Draws input values from `seed`.
    pub fn sample_inputs(&self, seed: u64) -> Scope {
        let mut rng = SeededRng::new(seed);
        self.inputs
            .iter()
            .map(|(name, t)| (name.clone(), rng.uniform(&t.shape)))
            .collect()
    }
}

// =============================================================================
// Program
// =============================================================================

/// Ops together with their weight data.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Ops in execution order.
    pub ops: Vec<OpDesc>,
    /// Weight data by name.
    pub weights: Scope,
    /// Names that must be fed.
    pub feeds: Vec<String>,
    /// Names returned by a run, in order.
    pub fetches: Vec<String>,
}

impl Program {
    /// Returns the op type names in order.
    pub fn op_types(&self) -> Vec<&'static str> {
        self.ops.iter().map(OpDesc::type_name).collect()
    }

    /// Indices of ops that read `var`.
    pub fn consumers(&self, var: &str) -> Vec<usize> {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.inputs.iter().any(|i| i == var))
            .map(|(i, _)| i)
            .collect()
    }

    /// True when `var` is read by exactly one op and is not fetched.
    pub fn is_single_use(&self, var: &str) -> bool {
        self.consumers(var).len() == 1 && !self.fetches.iter().any(|f| f == var)
    }

    /// Shape of a weight, if `name` is one.
    pub fn weight_shape(&self, name: &str) -> Option<&[usize]> {
        self.weights.get(name).map(Array::shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProgramConfig {
        ProgramConfig {
            ops: vec![
                OpDesc::new(OpKind::Flatten2 { axis: 1 }, &["x"], "flat"),
                OpDesc::new(
                    OpKind::Matmul {
                        alpha: 1.0,
                        transpose_x: false,
                        transpose_y: false,
                    },
                    &["flat", "y"],
                    "out",
                ),
            ],
            weights: BTreeMap::from([("y".to_string(), TensorConfig::new(&[6, 3]))]),
            inputs: BTreeMap::from([("x".to_string(), TensorConfig::new(&[2, 1, 2, 3]))]),
            outputs: vec!["out".to_string()],
        }
    }

    #[test]
    fn test_materialize_is_seeded() {
        let cfg = config();
        assert_eq!(cfg.materialize(5), cfg.materialize(5));
        assert_ne!(cfg.materialize(5).weights, cfg.materialize(6).weights);
        assert_eq!(cfg.sample_inputs(1)["x"].shape(), &[2, 1, 2, 3]);
    }

    #[test]
    fn test_use_tracking() {
        let program = config().materialize(0);
        assert_eq!(program.op_types(), vec!["flatten2", "matmul"]);
        assert_eq!(program.consumers("flat"), vec![1]);
        assert!(program.is_single_use("flat"));
        assert!(!program.is_single_use("out"));
        assert_eq!(program.weight_shape("y"), Some(&[6, 3][..]));
        assert_eq!(program.weight_shape("x"), None);
    }

    #[test]
    fn test_op_display() {
        let op = OpDesc::new(OpKind::ElementwiseAdd { axis: -1 }, &["a", "b"], "c");
        assert_eq!(op.to_string(), "c = elementwise_add(a, b)");
    }
}
