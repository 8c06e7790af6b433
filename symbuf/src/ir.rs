use serde::Serialize;
use std::fmt;

use crate::dtype::DataType;
use crate::expr::Expr;
use crate::var::Var;

/// Reads one value of `dtype` from the buffer at `data`.
///
/// `index` counts whole `dtype` values, lanes included, so a vector `dtype` makes this a single
/// vector access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Load {
    pub dtype: DataType,
    pub data: Var,
    pub index: Expr,
}

/// Writes `value` into the buffer at `data`. `index` is in the same units as [Load::index].
///
/// `dtype` is the element type of the destination. A scalar `value` stored with a vector `dtype`
/// is broadcast to every lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Store {
    pub dtype: DataType,
    pub data: Var,
    pub value: Value,
    pub index: Expr,
}

/// A value which may be stored into a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Value {
    Scalar(Expr),
    Load(Box<Load>),
}

impl Load {
    pub fn lanes(&self) -> u16 {
        self.dtype.lanes()
    }
}

impl Store {
    pub fn lanes(&self) -> u16 {
        self.dtype.lanes()
    }
}

impl Value {
    pub fn lanes(&self) -> u16 {
        match self {
            Value::Scalar(_) => 1,
            Value::Load(load) => load.lanes(),
        }
    }
}

impl From<Expr> for Value {
    fn from(e: Expr) -> Self {
        Value::Scalar(e)
    }
}

impl From<Load> for Value {
    fn from(load: Load) -> Self {
        Value::Load(Box::new(load))
    }
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.data, self.index)?;
        if !self.dtype.is_scalar() {
            write!(f, ":{}", self.dtype)?;
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(e) => write!(f, "{e}"),
            Value::Load(load) => write!(f, "{load}"),
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.data, self.index)?;
        if !self.dtype.is_scalar() {
            write!(f, ":{}", self.dtype)?;
        }
        write!(f, " = {}", self.value)
    }
}
