//! Data Types - Tandem Type System
//!
//! Runtime `DType` tags and the `Scalar` trait implemented by every element
//! type an `Array` can hold. Operators that only make sense on floating point
//! data (eigen-decomposition, matmul) inspect `Scalar::DTYPE` to reject
//! integer input up front.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of array element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl DType {
    /// Returns the size in bytes of this data type.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    /// Returns true if this is a floating point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Returns true if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    /// Returns the name of this data type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::I32 => "int32",
            Self::I64 => "int64",
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        Self::F32
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Scalar Trait
// =============================================================================

/// Trait for all element types that can be stored in an [`crate::Array`].
///
/// Conversions go through `f64`, which is exact for every supported type
/// except `i64` values beyond 2^53.
pub trait Scalar:
    Copy + Debug + Default + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The runtime dtype for this scalar type.
    const DTYPE: DType;

    /// Widens the value to `f64`.
    fn to_f64(self) -> f64;

    /// Narrows an `f64` to this type (rounding toward zero for integers).
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_scalar {
    ($ty:ty, $dtype:expr) => {
        impl Scalar for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_scalar!(f32, DType::F32);
impl_scalar!(f64, DType::F64);
impl_scalar!(i32, DType::I32);
impl_scalar!(i64, DType::I64);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_properties() {
        assert!(DType::F32.is_float());
        assert!(DType::F64.is_float());
        assert!(!DType::I32.is_float());
        assert!(DType::I64.is_integer());
        assert_eq!(DType::F64.size_of(), 8);
        assert_eq!(DType::I32.size_of(), 4);
    }

    #[test]
    fn test_scalar_dtype() {
        assert_eq!(<f32 as Scalar>::DTYPE, DType::F32);
        assert_eq!(<i32 as Scalar>::DTYPE, DType::I32);
        assert_eq!(i64::from_f64(3.9), 3);
        assert_eq!(2.5f32.to_f64(), 2.5);
    }

    #[test]
    fn test_dtype_display() {
        assert_eq!(DType::I32.to_string(), "int32");
        assert_eq!(DType::default(), DType::F32);
    }
}
