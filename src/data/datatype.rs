//! Element datatypes and reduction combinators for the bulk operations.
//!
//! Bulk operations are written once, generic over [`Element`] and a
//! [`Reducer`]. The byte-level entry points carry a runtime [`Datatype`] and
//! dispatch to the matching Rust type exactly once per call.

use std::fmt::Debug;
use std::ops::BitOr;

use bytemuck::Pod;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::numbering_error::NumberingError;

/// Runtime tag of an element type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    /// Unset; no operation accepts it.
    Null,
    Char,
    Float,
    Double,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
}

impl Datatype {
    /// Size in bytes of one value (0 for `Null`).
    pub fn size(self) -> usize {
        match self {
            Self::Null => 0,
            Self::Char => 1,
            Self::UInt16 => 2,
            Self::Float | Self::Int32 | Self::UInt32 => 4,
            Self::Double | Self::Int64 | Self::UInt64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Null | Self::Float | Self::Double)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Numeric value type accepted by the bulk operations.
pub trait Element:
    sealed::Sealed + Pod + Zero + PartialOrd + Debug + Send + Sync + 'static
{
    const DATATYPE: Datatype;

    /// Addition with the type's own arithmetic (integers wrap).
    fn accumulate(self, other: Self) -> Self;
}

/// Integer element types, which also support bitwise-or.
pub trait BitElement: Element + BitOr<Output = Self> {}

macro_rules! impl_int_element {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl sealed::Sealed for $t {}
        impl Element for $t {
            const DATATYPE: Datatype = Datatype::$dt;
            #[inline]
            fn accumulate(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
        }
        impl BitElement for $t {}
    )*};
}

macro_rules! impl_float_element {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl sealed::Sealed for $t {}
        impl Element for $t {
            const DATATYPE: Datatype = Datatype::$dt;
            #[inline]
            fn accumulate(self, other: Self) -> Self {
                self + other
            }
        }
    )*};
}

impl_int_element!(
    i8 => Char,
    i32 => Int32,
    i64 => Int64,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
);
impl_float_element!(f32 => Float, f64 => Double);

/// Order-independent combination of two copies of a value.
pub trait Reducer<T>: Copy + Send + Sync {
    const NAME: &'static str;
    fn combine(self, acc: T, incoming: T) -> T;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SumOp;

#[derive(Copy, Clone, Debug, Default)]
pub struct MinOp;

#[derive(Copy, Clone, Debug, Default)]
pub struct MaxOp;

#[derive(Copy, Clone, Debug, Default)]
pub struct BitOrOp;

impl<T: Element> Reducer<T> for SumOp {
    const NAME: &'static str = "sum";
    #[inline]
    fn combine(self, acc: T, incoming: T) -> T {
        acc.accumulate(incoming)
    }
}

impl<T: Element> Reducer<T> for MinOp {
    const NAME: &'static str = "min";
    #[inline]
    fn combine(self, acc: T, incoming: T) -> T {
        if incoming < acc { incoming } else { acc }
    }
}

impl<T: Element> Reducer<T> for MaxOp {
    const NAME: &'static str = "max";
    #[inline]
    fn combine(self, acc: T, incoming: T) -> T {
        if incoming > acc { incoming } else { acc }
    }
}

impl<T: BitElement> Reducer<T> for BitOrOp {
    const NAME: &'static str = "inclusive_or";
    #[inline]
    fn combine(self, acc: T, incoming: T) -> T {
        acc | incoming
    }
}

/// Memory layout of `stride` values per element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// `values[elt * stride + l]`
    #[default]
    Interleaved,
    /// `values[elt + l * n_elts]`
    NonInterleaved,
}

impl Layout {
    #[inline]
    pub fn index(self, elt: usize, l: usize, stride: usize, n_elts: usize) -> usize {
        match self {
            Self::Interleaved => elt * stride + l,
            Self::NonInterleaved => elt + l * n_elts,
        }
    }
}

/// Reinterpret a byte buffer as values of `T`.
pub fn bytes_as<T: Element>(bytes: &[u8]) -> Result<&[T], NumberingError> {
    bytemuck::try_cast_slice(bytes).map_err(|_| NumberingError::BufferAlignment(T::DATATYPE))
}

/// Reinterpret a mutable byte buffer as values of `T`.
pub fn bytes_as_mut<T: Element>(bytes: &mut [u8]) -> Result<&mut [T], NumberingError> {
    bytemuck::try_cast_slice_mut(bytes).map_err(|_| NumberingError::BufferAlignment(T::DATATYPE))
}

/// Run `$body` with `$T` bound to the Rust type of `$datatype`.
macro_rules! with_element_type {
    ($datatype:expr, $op:expr, $T:ident => $body:expr) => {{
        use $crate::data::datatype::Datatype;
        match $datatype {
            Datatype::Char => {
                type $T = i8;
                $body
            }
            Datatype::Float => {
                type $T = f32;
                $body
            }
            Datatype::Double => {
                type $T = f64;
                $body
            }
            Datatype::Int32 => {
                type $T = i32;
                $body
            }
            Datatype::Int64 => {
                type $T = i64;
                $body
            }
            Datatype::UInt16 => {
                type $T = u16;
                $body
            }
            Datatype::UInt32 => {
                type $T = u32;
                $body
            }
            Datatype::UInt64 => {
                type $T = u64;
                $body
            }
            datatype @ Datatype::Null => Err($crate::numbering_error::NumberingError::UnsupportedDatatype {
                op: $op,
                datatype,
            }),
        }
    }};
}

/// Like `with_element_type!`, restricted to integer types.
macro_rules! with_integer_type {
    ($datatype:expr, $op:expr, $T:ident => $body:expr) => {{
        use $crate::data::datatype::Datatype;
        match $datatype {
            Datatype::Char => {
                type $T = i8;
                $body
            }
            Datatype::Int32 => {
                type $T = i32;
                $body
            }
            Datatype::Int64 => {
                type $T = i64;
                $body
            }
            Datatype::UInt16 => {
                type $T = u16;
                $body
            }
            Datatype::UInt32 => {
                type $T = u32;
                $body
            }
            Datatype::UInt64 => {
                type $T = u64;
                $body
            }
            datatype @ (Datatype::Null | Datatype::Float | Datatype::Double) => {
                Err($crate::numbering_error::NumberingError::UnsupportedDatatype {
                    op: $op,
                    datatype,
                })
            }
        }
    }};
}

pub(crate) use with_element_type;
pub(crate) use with_integer_type;
