//! Named, ordered access to the fields of a [BufferNode].
//!
//! Tooling which needs to walk every field of a buffer (serialization, pretty-printing, attribute
//! lookup by name) goes through [BufferNode::visit_attrs], so the field names and their order are
//! defined once, by [BufferNode::FIELD_NAMES].

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;

use crate::buffer::{Buffer, BufferNode};
use crate::dtype::DataType;
use crate::expr::Expr;
use crate::utils::join_into_string;
use crate::var::Var;

/// A borrowed view of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum AttrValue<'a> {
    Var(&'a Var),
    DataType(DataType),
    Expr(&'a Expr),
    Exprs(&'a [Expr]),
    Str(&'a str),
    UInt(u32),
}

pub trait AttrVisitor<'a> {
    fn visit(&mut self, name: &'static str, value: AttrValue<'a>);
}

impl<'a, F> AttrVisitor<'a> for F
where
    F: FnMut(&'static str, AttrValue<'a>),
{
    fn visit(&mut self, name: &'static str, value: AttrValue<'a>) {
        self(name, value)
    }
}

impl BufferNode {
    pub const FIELD_NAMES: [&'static str; 8] = [
        "data",
        "dtype",
        "shape",
        "strides",
        "elem_offset",
        "name",
        "scope",
        "offset_alignment",
    ];

    /// Calls `visitor` once per field, in the order of [BufferNode::FIELD_NAMES].
    pub fn visit_attrs<'a>(&'a self, visitor: &mut impl AttrVisitor<'a>) {
        let [data, dtype, shape, strides, elem_offset, name, scope, offset_alignment] =
            Self::FIELD_NAMES;
        visitor.visit(data, AttrValue::Var(&self.data));
        visitor.visit(dtype, AttrValue::DataType(self.dtype));
        visitor.visit(shape, AttrValue::Exprs(&self.shape));
        visitor.visit(strides, AttrValue::Exprs(&self.strides));
        visitor.visit(elem_offset, AttrValue::Expr(&self.elem_offset));
        visitor.visit(name, AttrValue::Str(&self.name));
        visitor.visit(scope, AttrValue::Str(&self.scope));
        visitor.visit(offset_alignment, AttrValue::UInt(self.offset_alignment));
    }

    pub fn attrs<'a>(&'a self) -> Vec<(&'static str, AttrValue<'a>)> {
        let mut result = Vec::with_capacity(Self::FIELD_NAMES.len());
        self.visit_attrs(&mut |name: &'static str, value: AttrValue<'a>| {
            result.push((name, value))
        });
        result
    }

    pub fn get_attr<'a>(&'a self, name: &str) -> Option<AttrValue<'a>> {
        let mut found = None;
        self.visit_attrs(&mut |field: &'static str, value: AttrValue<'a>| {
            if field == name {
                found = Some(value);
            }
        });
        found
    }
}

impl fmt::Display for AttrValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Var(v) => write!(f, "{v}"),
            AttrValue::DataType(dtype) => write!(f, "{dtype}"),
            AttrValue::Expr(e) => write!(f, "{e}"),
            AttrValue::Exprs(es) => write!(f, "[{}]", join_into_string(*es, ", ")),
            AttrValue::Str(s) => write!(f, "{s:?}"),
            AttrValue::UInt(u) => write!(f, "{u}"),
        }
    }
}

struct FieldSerializer<S: SerializeStruct> {
    state: S,
    result: Result<(), S::Error>,
}

impl<'a, S: SerializeStruct> AttrVisitor<'a> for FieldSerializer<S> {
    fn visit(&mut self, name: &'static str, value: AttrValue<'a>) {
        if self.result.is_ok() {
            self.result = self.state.serialize_field(name, &value);
        }
    }
}

impl Serialize for BufferNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let state = serializer.serialize_struct("Buffer", Self::FIELD_NAMES.len())?;
        let mut fields = FieldSerializer {
            state,
            result: Ok(()),
        };
        self.visit_attrs(&mut fields);
        fields.result?;
        fields.state.end()
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BufferNode::serialize(self, serializer)
    }
}
