use nonzero::nonzero as nz;
use serde::Serialize;
use std::fmt::{self, Display};
use std::num::NonZeroU16;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum TypeCode {
    Int,
    UInt,
    Float,
    /// An opaque address. Pointer-typed variables carry this code.
    Handle,
}

/// A scalar or vector element type.
///
/// A [DataType] is a [TypeCode], a bit width, and a number of lanes. A type with more than one
/// lane is a vector type: a single value of it packs `lanes` scalars side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DataType {
    code: TypeCode,
    bits: u8,
    lanes: NonZeroU16,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseDataTypeError {
    #[error("Unknown type code in {0:?}")]
    UnknownCode(String),
    #[error("Invalid bit width in {0:?}")]
    InvalidBits(String),
    #[error("Invalid lane count in {0:?}")]
    InvalidLanes(String),
}

impl DataType {
    pub fn new(code: TypeCode, bits: u8, lanes: NonZeroU16) -> Self {
        DataType { code, bits, lanes }
    }

    pub fn int(bits: u8) -> Self {
        DataType::new(TypeCode::Int, bits, nz!(1u16))
    }

    pub fn uint(bits: u8) -> Self {
        DataType::new(TypeCode::UInt, bits, nz!(1u16))
    }

    pub fn float(bits: u8) -> Self {
        DataType::new(TypeCode::Float, bits, nz!(1u16))
    }

    pub fn float32() -> Self {
        DataType::float(32)
    }

    pub fn int32() -> Self {
        DataType::int(32)
    }

    pub fn handle() -> Self {
        DataType::new(TypeCode::Handle, 64, nz!(1u16))
    }

    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn lanes(&self) -> u16 {
        self.lanes.get()
    }

    #[must_use]
    pub fn with_lanes(self, lanes: NonZeroU16) -> Self {
        DataType { lanes, ..self }
    }

    /// The scalar type of a single lane.
    #[must_use]
    pub fn element_of(self) -> Self {
        self.with_lanes(nz!(1u16))
    }

    pub fn is_scalar(&self) -> bool {
        self.lanes.get() == 1
    }

    pub fn is_handle(&self) -> bool {
        self.code == TypeCode::Handle
    }

    /// The bytes required to represent a value of this type, including all lanes.
    ///
    /// Sub-byte scalars are rounded up to a whole byte per lane.
    pub fn bytes(&self) -> u32 {
        u32::from(self.bits).div_ceil(8) * u32::from(self.lanes.get())
    }
}

impl Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeCode::Int => write!(f, "int"),
            TypeCode::UInt => write!(f, "uint"),
            TypeCode::Float => write!(f, "float"),
            TypeCode::Handle => write!(f, "handle"),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == TypeCode::Handle {
            return write!(f, "{}", self.code);
        }
        write!(f, "{}{}", self.code, self.bits)?;
        if self.lanes.get() != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Parses strings like `float32`, `int8x16`, `uint1`, and `handle`.
///
/// A missing bit width defaults to 32 bits.
impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "handle" {
            return Ok(DataType::handle());
        }

        // "uint" must be tried before "int".
        let (code, rest) = [
            ("uint", TypeCode::UInt),
            ("int", TypeCode::Int),
            ("float", TypeCode::Float),
        ]
        .into_iter()
        .find_map(|(prefix, code)| s.strip_prefix(prefix).map(|rest| (code, rest)))
        .ok_or_else(|| ParseDataTypeError::UnknownCode(s.to_owned()))?;

        let (bits_str, lanes_str) = match rest.split_once('x') {
            Some((b, l)) => (b, Some(l)),
            None => (rest, None),
        };
        let bits = if bits_str.is_empty() {
            32
        } else {
            bits_str
                .parse::<u8>()
                .ok()
                .filter(|&b| b != 0)
                .ok_or_else(|| ParseDataTypeError::InvalidBits(s.to_owned()))?
        };
        let lanes = match lanes_str {
            None => nz!(1u16),
            Some(l) => l
                .parse::<NonZeroU16>()
                .map_err(|_| ParseDataTypeError::InvalidLanes(s.to_owned()))?,
        };
        Ok(DataType::new(code, bits, lanes))
    }
}

#[cfg(test)]
pub(crate) fn arb_datatype() -> impl proptest::strategy::Strategy<Value = DataType> {
    use proptest::prelude::*;
    use proptest::sample::select;

    (
        any::<TypeCode>().prop_filter("handles have no bit width", |c| *c != TypeCode::Handle),
        select(&[8u8, 16, 32, 64][..]),
        select(&[1u16, 2, 4, 8, 16][..]),
    )
        .prop_map(|(code, bits, lanes)| {
            DataType::new(code, bits, NonZeroU16::new(lanes).unwrap())
        })
}
