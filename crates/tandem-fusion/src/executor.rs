//! Executor - Reference Interpreter for Programs
//!
//! Runs ops one at a time over a [`Scope`]. Every kernel here is the plain
//! definition of its op; the fused `fc` path goes through [`FusedLinear`].
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;
use tracing::trace;

use crate::error::{FusionError, FusionResult};
use crate::linear::FusedLinear;
use crate::program::{OpDesc, OpKind, Program, Scope};

// =============================================================================
// Kernels
// =============================================================================

/// Folds dims `[..num_col_dims]` into rows and the rest into columns.
pub fn flatten_to_2d(x: &Array, num_col_dims: usize) -> FusionResult<Array> {
    let shape = x.shape();
    if num_col_dims == 0 || num_col_dims > shape.len() {
        return Err(FusionError::InvalidConfig(format!(
            "cannot flatten shape {:?} at {}",
            shape, num_col_dims
        )));
    }
    let rows: usize = shape[..num_col_dims].iter().product();
    let cols: usize = shape[num_col_dims..].iter().product();
    Ok(x.reshape(&[rows, cols])?)
}

/// `flatten2` kernel.
pub fn flatten2(x: &Array, axis: usize) -> FusionResult<Array> {
    if axis > x.ndim() {
        return Err(FusionError::InvalidConfig(format!(
            "flatten2 axis {} out of range for rank {}",
            axis,
            x.ndim()
        )));
    }
    let rows: usize = x.shape()[..axis].iter().product();
    let cols: usize = x.shape()[axis..].iter().product();
    Ok(x.reshape(&[rows, cols])?)
}

/// `matmul` kernel for 2-D operands.
pub fn matmul(
    x: &Array,
    y: &Array,
    alpha: f32,
    transpose_x: bool,
    transpose_y: bool,
) -> FusionResult<Array> {
    if x.ndim() != 2 || y.ndim() != 2 {
        return Err(FusionError::Execution(format!(
            "matmul expects 2-D operands, got {:?} and {:?}",
            x.shape(),
            y.shape()
        )));
    }
    let x = if transpose_x { x.transpose()? } else { x.clone() };
    let y = if transpose_y { y.transpose()? } else { y.clone() };
    if x.shape()[1] != y.shape()[0] {
        return Err(FusionError::ShapeMismatch {
            expected: vec![x.shape()[1], y.shape()[1]],
            actual: y.shape().to_vec(),
        });
    }
    let out = x.matmul(&y)?;
    Ok(if (alpha - 1.0).abs() > f32::EPSILON {
        out.scale(f64::from(alpha))
    } else {
        out
    })
}

/// `mul` kernel.
pub fn mul(x: &Array, y: &Array, x_num_col_dims: usize, y_num_col_dims: usize) -> FusionResult<Array> {
    let x2 = flatten_to_2d(x, x_num_col_dims)?;
    let y2 = flatten_to_2d(y, y_num_col_dims)?;
    if x2.shape()[1] != y2.shape()[0] {
        return Err(FusionError::ShapeMismatch {
            expected: vec![x2.shape()[1]],
            actual: vec![y2.shape()[0]],
        });
    }
    let mut shape = x.shape()[..x_num_col_dims].to_vec();
    shape.extend_from_slice(&y.shape()[y_num_col_dims..]);
    Ok(x2.matmul(&y2)?.reshape(&shape)?)
}

/// `elementwise_add` kernel with axis-aligned broadcasting of `y`.
///
/// Y's dims must match X's dims `[axis, axis + y.ndim)` or be 1. An axis of
/// `-1` aligns Y with X's trailing dims.
pub fn elementwise_add(x: &Array, y: &Array, axis: i32) -> FusionResult<Array> {
    let (xs, ys) = (x.shape(), y.shape());
    if ys.len() > xs.len() {
        return Err(FusionError::InvalidConfig(format!(
            "elementwise_add Y {:?} has higher rank than X {:?}",
            ys, xs
        )));
    }
    let start = match axis {
        -1 => xs.len() - ys.len(),
        a if a >= 0 => a as usize,
        a => {
            return Err(FusionError::InvalidConfig(format!(
                "elementwise_add axis {} is invalid",
                a
            )))
        }
    };
    if start + ys.len() > xs.len()
        || ys
            .iter()
            .enumerate()
            .any(|(i, &d)| d != 1 && d != xs[start + i])
    {
        return Err(FusionError::InvalidConfig(format!(
            "elementwise_add cannot align Y {:?} with X {:?} at axis {}",
            ys, xs, axis
        )));
    }

    // strides of y laid over x's dims; zero where y broadcasts
    let mut y_strides = vec![0usize; xs.len()];
    let mut stride = 1;
    for i in (0..ys.len()).rev() {
        if ys[i] != 1 {
            y_strides[start + i] = stride;
        }
        stride *= ys[i];
    }

    let yd = y.as_slice();
    let mut index = vec![0usize; xs.len()];
    let mut out = Vec::with_capacity(x.numel());
    for &v in x.as_slice() {
        let offset: usize = index.iter().zip(&y_strides).map(|(i, s)| i * s).sum();
        out.push(v + yd[offset]);
        for d in (0..xs.len()).rev() {
            index[d] += 1;
            if index[d] < xs[d] {
                break;
            }
            index[d] = 0;
        }
    }
    Ok(Array::from_vec(out, xs)?)
}

// =============================================================================
// Executor
// =============================================================================

fn input<'a>(scope: &'a Scope, op: &OpDesc, slot: usize) -> FusionResult<&'a Array> {
    let name = op.inputs.get(slot).ok_or_else(|| {
        FusionError::InvalidConfig(format!("{} is missing input {}", op.type_name(), slot))
    })?;
    scope
        .get(name)
        .ok_or_else(|| FusionError::Execution(format!("variable '{}' is not set", name)))
}

/// Runs one op, writing its output into `scope`.
pub fn run_op(op: &OpDesc, scope: &mut Scope) -> FusionResult<()> {
    if op.inputs.len() != op.kind.arity() {
        return Err(FusionError::InvalidConfig(format!(
            "{} takes {} inputs, got {}",
            op.type_name(),
            op.kind.arity(),
            op.inputs.len()
        )));
    }
    let out = match &op.kind {
        OpKind::Flatten2 { axis } => flatten2(input(scope, op, 0)?, *axis)?,
        OpKind::Matmul {
            alpha,
            transpose_x,
            transpose_y,
        } => matmul(
            input(scope, op, 0)?,
            input(scope, op, 1)?,
            *alpha,
            *transpose_x,
            *transpose_y,
        )?,
        OpKind::ElementwiseAdd { axis } => {
            elementwise_add(input(scope, op, 0)?, input(scope, op, 1)?, *axis)?
        }
        OpKind::Mul {
            x_num_col_dims,
            y_num_col_dims,
        } => mul(
            input(scope, op, 0)?,
            input(scope, op, 1)?,
            *x_num_col_dims,
            *y_num_col_dims,
        )?,
        OpKind::Fc { in_num_col_dims } => {
            let x = input(scope, op, 0)?;
            let kernel = FusedLinear::new(
                input(scope, op, 1)?.clone(),
                Some(input(scope, op, 2)?.clone()),
            )?;
            let x2 = flatten_to_2d(x, *in_num_col_dims)?;
            let mut shape = x.shape()[..*in_num_col_dims].to_vec();
            shape.push(kernel.out_features());
            kernel.forward(&x2)?.reshape(&shape)?
        }
    };
    trace!(op = %op, shape = ?out.shape(), "op done");
    scope.insert(op.output.clone(), out);
    Ok(())
}

/// Runs whole programs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    /// Runs `program` on `feeds` and returns the fetch targets in order.
    pub fn run(program: &Program, feeds: &Scope) -> FusionResult<Vec<Array>> {
        let mut scope = program.weights.clone();
        for name in &program.feeds {
            let value = feeds
                .get(name)
                .ok_or_else(|| FusionError::Execution(format!("feed '{}' is missing", name)))?;
            scope.insert(name.clone(), value.clone());
        }
        for op in &program.ops {
            run_op(op, &mut scope)?;
        }
        program
            .fetches
            .iter()
            .map(|name| {
                scope.remove(name).ok_or_else(|| {
                    FusionError::Execution(format!("fetch '{}' was never produced", name))
                })
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{check_close, SeededRng, Tolerance};

    fn arange(shape: &[usize]) -> Array {
        let n: usize = shape.iter().product();
        Array::from_vec((0..n).map(|v| v as f32).collect(), shape).unwrap()
    }

    #[test]
    fn test_flatten2_shapes() {
        let x = arange(&[2, 3, 4, 5]);
        assert_eq!(flatten2(&x, 1).unwrap().shape(), &[2, 60]);
        assert_eq!(flatten2(&x, 0).unwrap().shape(), &[1, 120]);
        assert!(flatten2(&x, 5).is_err());
    }

    #[test]
    fn test_matmul_transpose_and_alpha() {
        let x = arange(&[2, 3]);
        let y = arange(&[2, 3]);
        let out = matmul(&x, &y, 2.0, false, true).unwrap();
        let expected = x.matmul(&y.transpose().unwrap()).unwrap().scale(2.0);
        assert_eq!(out, expected);
        assert!(matmul(&x, &y, 1.0, false, false).is_err());
    }

    #[test]
    fn test_mul_matches_flatten_then_matmul() {
        let mut rng = SeededRng::new(1);
        let x = rng.uniform(&[2, 3, 2, 2]);
        let y = rng.uniform(&[12, 5]);
        let via_mul = mul(&x, &y, 1, 1).unwrap();
        let via_matmul = matmul(&flatten2(&x, 1).unwrap(), &y, 1.0, false, false).unwrap();
        assert_eq!(via_mul, via_matmul);
    }

    #[test]
    fn test_elementwise_add_axis_broadcasting() {
        let x = arange(&[2, 3]);
        let row = Array::from_vec(vec![10.0, 20.0, 30.0], &[3]).unwrap();
        let col = Array::from_vec(vec![100.0, 200.0], &[2]).unwrap();

        let by_row = elementwise_add(&x, &row, -1).unwrap();
        assert_eq!(by_row.to_vec(), vec![10.0, 21.0, 32.0, 13.0, 24.0, 35.0]);
        assert_eq!(elementwise_add(&x, &row, 1).unwrap(), by_row);

        let by_col = elementwise_add(&x, &col, 0).unwrap();
        assert_eq!(by_col.to_vec(), vec![100.0, 101.0, 102.0, 203.0, 204.0, 205.0]);

        let row_2d = Array::from_vec(vec![10.0, 20.0, 30.0], &[1, 3]).unwrap();
        assert_eq!(elementwise_add(&x, &row_2d, -1).unwrap(), by_row);
        assert!(elementwise_add(&x, &row_2d, 1).is_err());
        assert!(elementwise_add(&x, &row, 0).is_err());
    }

    #[test]
    fn test_fc_op_matches_mul_plus_add() {
        let mut rng = SeededRng::new(9);
        let mut scope = Scope::new();
        scope.insert("x".into(), rng.uniform(&[3, 2, 2]));
        scope.insert("w".into(), rng.uniform(&[4, 6]));
        scope.insert("b".into(), rng.uniform(&[6]));

        let unfused = [
            OpDesc::new(
                OpKind::Mul {
                    x_num_col_dims: 1,
                    y_num_col_dims: 1,
                },
                &["x", "w"],
                "m",
            ),
            OpDesc::new(OpKind::ElementwiseAdd { axis: -1 }, &["m", "b"], "out"),
        ];
        let fused = OpDesc::new(
            OpKind::Fc { in_num_col_dims: 1 },
            &["x", "w", "b"],
            "fc_out",
        );
        for op in &unfused {
            run_op(op, &mut scope).unwrap();
        }
        run_op(&fused, &mut scope).unwrap();
        check_close(&scope["fc_out"], &scope["out"], Tolerance::default()).unwrap();
    }

    #[test]
    fn test_executor_reports_missing_feed() {
        let program = Program {
            ops: vec![OpDesc::new(OpKind::Flatten2 { axis: 1 }, &["x"], "y")],
            weights: Scope::new(),
            feeds: vec!["x".into()],
            fetches: vec!["y".into()],
        };
        let err = Executor::run(&program, &Scope::new()).unwrap_err();
        assert!(err.to_string().contains("feed 'x'"));

        let feeds = Scope::from([("x".to_string(), arange(&[2, 2, 2]))]);
        let out = Executor::run(&program, &feeds).unwrap();
        assert_eq!(out[0].shape(), &[2, 4]);
    }
}
