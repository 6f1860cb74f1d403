//! Array - Dense Row-Major Tensor
//!
//! A small tensor: contiguous storage plus a shape. Collectives
//! move arrays as flat `f32` buffers, so most helpers here are about cutting
//! and stacking along the leading (row) dimension.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};

// =============================================================================
// Array
// =============================================================================

/// Dense, row-major n-dimensional array.
///
/// Deserializing goes through [`Array::from_vec`], so a decoded array always
/// holds exactly as many elements as its shape describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawArray<T>",
    bound(deserialize = "T: Scalar")
)]
pub struct Array<T = f32> {
    data: Vec<T>,
    shape: Vec<usize>,
}

/// Unchecked wire form of [`Array`].
#[derive(Deserialize)]
struct RawArray<T> {
    data: Vec<T>,
    shape: Vec<usize>,
}

impl<T: Scalar> TryFrom<RawArray<T>> for Array<T> {
    type Error = Error;

    fn try_from(raw: RawArray<T>) -> Result<Self> {
        Self::from_vec(raw.data, &raw.shape)
    }
}

/// Element count of `shape`, or `None` when it overflows `usize`.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl<T: Scalar> Array<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates an array from owned data and a shape.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        if checked_numel(shape) != Some(data.len()) {
            return Err(Error::InvalidShape {
                shape: shape.to_vec(),
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    /// Creates an array by copying a slice.
    pub fn from_slice(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Creates an array filled with `T::default()`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::default())
    }

    /// Creates an array filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        Self {
            data: vec![value; numel_of(shape)],
            shape: shape.to_vec(),
        }
    }

    /// Creates a zero-row array whose rows would have the given trailing shape.
    pub fn empty(trailing: &[usize]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(trailing);
        Self {
            data: Vec::new(),
            shape,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the runtime element type.
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Number of rows (size of the leading dimension, 1 for scalars).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of elements in one row.
    pub fn row_len(&self) -> usize {
        if self.shape.is_empty() {
            1
        } else {
            numel_of(&self.shape[1..])
        }
    }

    /// Borrows the flat storage.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutably borrows the flat storage.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copies the flat storage out.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }

    /// Consumes the array, returning its flat storage.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Reads one element by multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        if index.len() != self.ndim() {
            return Err(Error::InvalidDimension {
                index: index.len(),
                ndim: self.ndim(),
            });
        }
        let mut offset = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return Err(Error::IndexOutOfBounds { index: i, size: dim });
            }
            offset = offset * dim + i;
        }
        Ok(self.data[offset])
    }

    /// Borrows row `i` as a flat slice.
    pub fn row(&self, i: usize) -> Result<&[T]> {
        if i >= self.rows() {
            return Err(Error::IndexOutOfBounds {
                index: i,
                size: self.rows(),
            });
        }
        let len = self.row_len();
        Ok(&self.data[i * len..(i + 1) * len])
    }

    // =========================================================================
    // Shape Manipulation
    // =========================================================================

    /// Returns a copy with a new shape holding the same number of elements.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        Self::from_vec(self.data.clone(), shape)
    }

    fn with_rows(&self, rows: usize) -> Vec<usize> {
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(rows);
        } else {
            shape[0] = rows;
        }
        shape
    }

    /// Copies rows `range` into a new array.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.rows() {
            return Err(Error::IndexOutOfBounds {
                index: range.end,
                size: self.rows(),
            });
        }
        let len = self.row_len();
        let data = self.data[range.start * len..range.end * len].to_vec();
        Self::from_vec(data, &self.with_rows(range.len()))
    }

    /// Splits the rows into `parts` equal pieces.
    pub fn split_rows(&self, parts: usize) -> Result<Vec<Self>> {
        if parts == 0 || self.rows() % parts != 0 {
            return Err(Error::invalid(format!(
                "cannot split {} rows into {} equal parts",
                self.rows(),
                parts
            )));
        }
        let step = self.rows() / parts;
        (0..parts)
            .map(|p| self.slice_rows(p * step..(p + 1) * step))
            .collect()
    }

    /// Splits the rows into consecutive pieces of the given sizes.
    pub fn split_rows_by(&self, counts: &[usize]) -> Result<Vec<Self>> {
        let total: usize = counts.iter().sum();
        if total != self.rows() {
            return Err(Error::invalid(format!(
                "row counts sum to {} but array has {} rows",
                total,
                self.rows()
            )));
        }
        let mut start = 0;
        let mut pieces = Vec::with_capacity(counts.len());
        for &count in counts {
            pieces.push(self.slice_rows(start..start + count)?);
            start += count;
        }
        Ok(pieces)
    }

    /// Stacks arrays along the leading dimension.
    ///
    /// Zero-element parts are skipped, so an `Array::empty` placeholder can sit
    /// next to real rows.
    pub fn concat_rows(parts: &[Self]) -> Result<Self> {
        let Some(first) = parts.iter().find(|p| !p.is_empty()).or(parts.first()) else {
            return Err(Error::invalid("concat_rows needs at least one array"));
        };
        let trailing = first.shape.get(1..).unwrap_or(&[]).to_vec();
        let mut data = Vec::new();
        let mut rows = 0;
        for part in parts.iter().filter(|p| !p.is_empty()) {
            if part.shape.get(1..).unwrap_or(&[]) != trailing.as_slice() {
                return Err(Error::ShapeMismatch {
                    expected: first.shape.clone(),
                    actual: part.shape.clone(),
                });
            }
            data.extend_from_slice(&part.data);
            rows += part.rows();
        }
        let mut shape = vec![rows];
        shape.extend(trailing);
        Self::from_vec(data, &shape)
    }

    fn require_2d(&self, what: &str) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [r, c] => Ok((*r, *c)),
            _ => Err(Error::invalid(format!(
                "{} requires a 2-D array, got shape {:?}",
                what, self.shape
            ))),
        }
    }

    /// Copies columns `range` of a 2-D array.
    pub fn slice_cols(&self, range: Range<usize>) -> Result<Self> {
        let (rows, cols) = self.require_2d("slice_cols")?;
        if range.start > range.end || range.end > cols {
            return Err(Error::IndexOutOfBounds {
                index: range.end,
                size: cols,
            });
        }
        let width = range.len();
        let mut data = Vec::with_capacity(rows * width);
        for r in 0..rows {
            data.extend_from_slice(&self.data[r * cols + range.start..r * cols + range.end]);
        }
        Self::from_vec(data, &[rows, width])
    }

    /// Concatenates 2-D arrays along the column dimension.
    pub fn concat_cols(parts: &[Self]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(Error::invalid("concat_cols needs at least one array"));
        };
        let (rows, _) = first.require_2d("concat_cols")?;
        let mut widths = Vec::with_capacity(parts.len());
        for part in parts {
            let (r, c) = part.require_2d("concat_cols")?;
            if r != rows {
                return Err(Error::ShapeMismatch {
                    expected: vec![rows, c],
                    actual: part.shape.clone(),
                });
            }
            widths.push(c);
        }
        let total: usize = widths.iter().sum();
        let mut data = Vec::with_capacity(rows * total);
        for r in 0..rows {
            for (part, &w) in parts.iter().zip(&widths) {
                data.extend_from_slice(&part.data[r * w..(r + 1) * w]);
            }
        }
        Self::from_vec(data, &[rows, total])
    }

    /// Transposes a 2-D array.
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.require_2d("transpose")?;
        let mut data = Vec::with_capacity(self.numel());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c]);
            }
        }
        Self::from_vec(data, &[cols, rows])
    }

    // =========================================================================
    // Elementwise
    // =========================================================================

    /// Applies `f` to every element.
    pub fn map<U: Scalar>(&self, f: impl Fn(T) -> U) -> Array<U> {
        Array {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Converts every element to another scalar type.
    pub fn cast<U: Scalar>(&self) -> Array<U> {
        self.map(|v| U::from_f64(v.to_f64()))
    }

    /// Combines two same-shaped arrays element by element.
    pub fn zip_with(&self, other: &Self, f: impl Fn(T, T) -> T) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        Ok(Self {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Elementwise sum of two same-shaped arrays.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| T::from_f64(a.to_f64() + b.to_f64()))
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        self.map(|v| T::from_f64(v.to_f64() * factor))
    }

    /// Elementwise absolute value.
    pub fn abs(&self) -> Self {
        self.map(|v| T::from_f64(v.to_f64().abs()))
    }

    /// 2-D matrix product, accumulated in `f64`.
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        let (m, k) = self.require_2d("matmul")?;
        let (k2, n) = other.require_2d("matmul")?;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                expected: vec![k, n],
                actual: other.shape.clone(),
            });
        }
        let mut out = Vec::with_capacity(m * n);
        for i in 0..m {
            let lhs = &self.data[i * k..(i + 1) * k];
            for j in 0..n {
                let mut acc = 0.0f64;
                for (p, &a) in lhs.iter().enumerate() {
                    acc += a.to_f64() * other.data[p * n + j].to_f64();
                }
                out.push(T::from_f64(acc));
            }
        }
        Self::from_vec(out, &[m, n])
    }
}

// =============================================================================
// Tests
// =============================================================================
