//! Fuse Passes
//!
//! Graph rewrites over a [`Program`] and the manager that runs them by name.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::{FusionError, FusionResult};
use crate::program::{OpDesc, OpKind, Program};

// =============================================================================
// Pass Trait
// =============================================================================

/// A rewrite applied to a whole program.
pub trait FusePass: fmt::Debug + Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Rewrites every match in `program` and returns how many were fused.
    fn apply(&self, program: &mut Program) -> FusionResult<usize>;

    /// Ops removed by one rewrite.
    fn ops_eliminated_per_match(&self) -> usize {
        1
    }
}

// =============================================================================
// flatten2 + matmul -> mul
// =============================================================================

/// Replaces `flatten2(axis=1) -> matmul` with a single `mul`.
///
/// Matches when the matmul has `alpha == 1`, no transposes, a 2-D weight as Y,
/// and the flatten output is read by that matmul only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Flatten2MatmulFusePass;

impl Flatten2MatmulFusePass {
    fn find(program: &Program) -> Option<(usize, usize)> {
        for (fi, flatten) in program.ops.iter().enumerate() {
            if flatten.kind != (OpKind::Flatten2 { axis: 1 }) || !program.is_single_use(&flatten.output) {
                continue;
            }
            let mi = program.consumers(&flatten.output)[0];
            let matmul = &program.ops[mi];
            let plain = matches!(
                matmul.kind,
                OpKind::Matmul { alpha, transpose_x: false, transpose_y: false }
                    if (alpha - 1.0).abs() <= f32::EPSILON
            );
            let y_is_2d_weight = matmul
                .inputs
                .get(1)
                .and_then(|y| program.weight_shape(y))
                .is_some_and(|s| s.len() == 2);
            if plain && matmul.inputs[0] == flatten.output && y_is_2d_weight {
                return Some((fi, mi));
            }
        }
        None
    }
}

impl FusePass for Flatten2MatmulFusePass {
    fn name(&self) -> &'static str {
        "flatten2_matmul_fuse_pass"
    }

    fn apply(&self, program: &mut Program) -> FusionResult<usize> {
        let mut fused = 0;
        while let Some((fi, mi)) = Self::find(program) {
            let x = program.ops[fi].inputs[0].clone();
            let y = program.ops[mi].inputs[1].clone();
            let out = program.ops[mi].output.clone();
            program.ops[mi] = OpDesc::new(
                OpKind::Mul {
                    x_num_col_dims: 1,
                    y_num_col_dims: 1,
                },
                &[&x, &y],
                &out,
            );
            program.ops.remove(fi);
            fused += 1;
        }
        Ok(fused)
    }
}

// =============================================================================
// mul + elementwise_add -> fc
// =============================================================================

/// Replaces `mul -> elementwise_add(bias weight)` with `fc`.
///
/// The bias shape is not checked here; [`crate::FusedLinear`] rejects anything
/// other than `[out]` when the program runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FcFusePass;

impl FcFusePass {
    fn find(program: &Program) -> Option<(usize, usize)> {
        for (mi, mul) in program.ops.iter().enumerate() {
            let OpKind::Mul { y_num_col_dims: 1, .. } = mul.kind else {
                continue;
            };
            let w_is_2d = mul
                .inputs
                .get(1)
                .and_then(|w| program.weight_shape(w))
                .is_some_and(|s| s.len() == 2);
            if !w_is_2d || !program.is_single_use(&mul.output) {
                continue;
            }
            let ai = program.consumers(&mul.output)[0];
            let add = &program.ops[ai];
            if matches!(add.kind, OpKind::ElementwiseAdd { .. })
                && add.inputs.len() == 2
                && add.inputs[0] == mul.output
                && program.weights.contains_key(&add.inputs[1])
            {
                return Some((mi, ai));
            }
        }
        None
    }
}

impl FusePass for FcFusePass {
    fn name(&self) -> &'static str {
        "fc_fuse_pass"
    }

    fn apply(&self, program: &mut Program) -> FusionResult<usize> {
        let mut fused = 0;
        while let Some((mi, ai)) = Self::find(program) {
            let OpKind::Mul { x_num_col_dims, .. } = program.ops[mi].kind else {
                return Err(FusionError::NotFusable(program.ops[mi].to_string()));
            };
            let mul = &program.ops[mi];
            let add = &program.ops[ai];
            let fc = OpDesc::new(
                OpKind::Fc {
                    in_num_col_dims: x_num_col_dims,
                },
                &[&mul.inputs[0], &mul.inputs[1], &add.inputs[1]],
                &add.output,
            );
            program.ops[ai] = fc;
            program.ops.remove(mi);
            fused += 1;
        }
        Ok(fused)
    }
}

// =============================================================================
// Pass Manager
// =============================================================================

/// Looks up a pass by registry name.
pub fn pass_by_name(name: &str) -> FusionResult<Box<dyn FusePass>> {
    match name {
        "flatten2_matmul_fuse_pass" => Ok(Box::new(Flatten2MatmulFusePass)),
        "fc_fuse_pass" => Ok(Box::new(FcFusePass)),
        other => Err(FusionError::UnknownPass(other.to_string())),
    }
}

/// Names of every registered pass.
pub const REGISTERED_PASSES: &[&str] = &["flatten2_matmul_fuse_pass", "fc_fuse_pass"];

/// Statistics about passes applied to one program.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationStats {
    /// Number of rewrites applied.
    pub fusions_applied: usize,
    /// Number of ops removed.
    pub ops_eliminated: usize,
    /// Rewrites per pass (name, count), in run order.
    pub passes: Vec<(String, usize)>,
}

impl OptimizationStats {
    fn record(&mut self, pass: &dyn FusePass, count: usize) {
        self.fusions_applied += count;
        self.ops_eliminated += count * pass.ops_eliminated_per_match();
        if let Some(entry) = self.passes.iter_mut().find(|(p, _)| p == pass.name()) {
            entry.1 += count;
        } else {
            self.passes.push((pass.name().to_string(), count));
        }
    }
}

/// Runs an ordered list of passes.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn FusePass>>,
}

impl PassManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a manager from registry names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> FusionResult<Self> {
        let passes = names
            .iter()
            .map(|n| pass_by_name(n.as_ref()))
            .collect::<FusionResult<_>>()?;
        Ok(Self { passes })
    }

    /// Appends a pass.
    pub fn with_pass(mut self, pass: Box<dyn FusePass>) -> Self {
        self.passes.push(pass);
        self
    }

    /// Names of the passes in run order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass once, in order.
    pub fn run(&self, program: &mut Program) -> FusionResult<OptimizationStats> {
        let mut stats = OptimizationStats::default();
        for pass in &self.passes {
            let count = pass.apply(program)?;
            debug!(pass = pass.name(), count, "pass applied");
            stats.record(pass.as_ref(), count);
        }
        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================
