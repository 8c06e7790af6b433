use serde::Serialize;
use std::fmt;

use crate::dtype::DataType;
use crate::expr::{Atom, Bounds, Expr};
use crate::opaque_symbol::OpaqueSymbol;

/// A typed symbolic variable.
///
/// Two variables are equal only if one is a clone of the other; the name is for display. Variables
/// order by creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Var {
    id: OpaqueSymbol,
    name: String,
    ty: VarType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum VarType {
    Scalar(DataType),
    /// The address of a value of the given type.
    Pointer(DataType),
}

impl Var {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Var {
            id: OpaqueSymbol::new(),
            name: name.into(),
            ty: VarType::Scalar(dtype),
        }
    }

    /// A fresh `int32` variable, the type used for symbolic dimension sizes and indices.
    pub fn index(name: impl Into<String>) -> Self {
        Var::new(name, DataType::int32())
    }

    pub fn pointer(name: impl Into<String>, pointee: DataType) -> Self {
        Var {
            id: OpaqueSymbol::new(),
            name: name.into(),
            ty: VarType::Pointer(pointee),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> VarType {
        self.ty
    }

    /// The type of the variable's value. Pointers are [DataType::handle].
    pub fn dtype(&self) -> DataType {
        match self.ty {
            VarType::Scalar(dtype) => dtype,
            VarType::Pointer(_) => DataType::handle(),
        }
    }

    pub fn pointee(&self) -> Option<DataType> {
        match self.ty {
            VarType::Scalar(_) => None,
            VarType::Pointer(dtype) => Some(dtype),
        }
    }

    pub fn to_expr(&self) -> Expr {
        Expr::from(self.clone())
    }
}

impl Bounds for Var {}

impl Atom for Var {}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Scalar(dtype) => write!(f, "{dtype}"),
            VarType::Pointer(dtype) => write!(f, "{dtype}*"),
        }
    }
}
