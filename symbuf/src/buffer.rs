use log::{debug, trace};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::dtype::DataType;
use crate::expr::Expr;
use crate::ir::{Load, Store, Value};
use crate::utils::join_into_string;
use crate::var::Var;

/// A symbolic n-dimensional array: the memory layout of a tensor, described by expressions.
///
/// A [Buffer] is a cheap, shared handle to an immutable [BufferNode]. Cloning a [Buffer] shares
/// the node; every transformation returns a new [Buffer] and leaves its input untouched. Equality
/// is structural.
#[derive(Clone)]
pub struct Buffer(Arc<BufferNode>);

/// The fields of a [Buffer].
///
/// Invariants:
///  - `strides` is either empty, meaning the buffer is row-major contiguous, or has one entry per
///    dimension of `shape`.
///  - `offset_alignment` is at least 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferNode {
    pub(crate) data: Var,
    pub(crate) dtype: DataType,
    pub(crate) shape: Vec<Expr>,
    pub(crate) strides: Vec<Expr>,
    pub(crate) elem_offset: Expr,
    pub(crate) name: String,
    pub(crate) scope: String,
    pub(crate) offset_alignment: u32,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer of rank {rank} given {strides} strides")]
    InvalidLayout { rank: usize, strides: usize },
    #[error("Expected {expected} indices, but got {got}")]
    InvalidIndex { expected: usize, got: usize },
    #[error("Offset alignment must be at least 1, but was {0}")]
    InvalidAlignment(i64),
    #[error("Stored value has {got} lanes, but the buffer's element type has {expected}")]
    LaneMismatch { expected: u16, got: u16 },
    #[error("Integer overflow while computing strides or offsets")]
    Overflow,
}

impl Buffer {
    /// Construct a [Buffer], checking its invariants.
    ///
    /// `byte_offset` is converted to an element offset by dividing by the width in bytes of
    /// `dtype`, lanes included.
    #[allow(clippy::too_many_arguments)]
    pub fn make(
        data: Var,
        dtype: DataType,
        shape: Vec<Expr>,
        strides: Vec<Expr>,
        byte_offset: Expr,
        name: impl Into<String>,
        scope: impl Into<String>,
        offset_alignment: i64,
    ) -> Result<Buffer, BufferError> {
        if !strides.is_empty() && strides.len() != shape.len() {
            return Err(BufferError::InvalidLayout {
                rank: shape.len(),
                strides: strides.len(),
            });
        }
        let offset_alignment = u32::try_from(offset_alignment)
            .ok()
            .filter(|&a| a >= 1)
            .ok_or(BufferError::InvalidAlignment(offset_alignment))?;

        let elem_offset = byte_offset / byte_width(dtype);
        let node = BufferNode {
            data,
            dtype,
            shape,
            strides,
            elem_offset,
            name: name.into(),
            scope: scope.into(),
            offset_alignment,
        };
        debug!("Made buffer {node}");
        Ok(Buffer(Arc::new(node)))
    }

    /// Returns `true` if both handles share the same node.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Build a load of the value at `index`.
    pub fn make_load(&self, index: &[Expr]) -> Result<Load, BufferError> {
        Ok(Load {
            dtype: self.dtype,
            data: self.data.clone(),
            index: self.flat_offset(index)?,
        })
    }

    /// Build a store of `value` to `index`.
    ///
    /// `value` must either be a scalar, which is broadcast across the lanes of a vector buffer, or
    /// have exactly as many lanes as the buffer's element type.
    pub fn make_store(&self, index: &[Expr], value: impl Into<Value>) -> Result<Store, BufferError> {
        let value = value.into();
        if value.lanes() != 1 && value.lanes() != self.dtype.lanes() {
            return Err(BufferError::LaneMismatch {
                expected: self.dtype.lanes(),
                got: value.lanes(),
            });
        }
        Ok(Store {
            dtype: self.dtype,
            data: self.data.clone(),
            value,
            index: self.flat_offset(index)?,
        })
    }

    /// Returns an equivalent [Buffer] whose strides are explicit.
    ///
    /// If the strides are already explicit, or the buffer has rank 0, this returns a handle to the
    /// same node.
    pub fn with_explicit_strides(&self) -> Result<Buffer, BufferError> {
        if !self.strides.is_empty() || self.shape.is_empty() {
            return Ok(self.clone());
        }
        let mut node = BufferNode::clone(self);
        node.strides = row_major_strides(&self.shape)?;
        debug!("Made strides of {} explicit: {}", self.name, join_into_string(&node.strides, ", "));
        Ok(Buffer(Arc::new(node)))
    }

    /// Returns a [Buffer] viewing the region of `extents` values starting at `begins`.
    ///
    /// The result is kept contiguous (has no explicit strides) if the receiver is contiguous and
    /// the slice spans every dimension but the outermost in full. Otherwise it carries the
    /// receiver's strides. Neither `begins` nor `extents` are checked against the receiver's shape.
    pub fn slice(&self, begins: &[Expr], extents: &[Expr]) -> Result<Buffer, BufferError> {
        self.check_rank(extents.len())?;
        let elem_offset = self.flat_offset(begins)?;

        let strides = if !self.strides.is_empty() {
            self.strides.clone()
        } else if self.slice_stays_contiguous(extents) {
            vec![]
        } else {
            row_major_strides(&self.shape)?
        };

        let node = BufferNode {
            data: self.data.clone(),
            dtype: self.dtype,
            shape: extents.to_vec(),
            strides,
            elem_offset,
            name: self.name.clone(),
            scope: self.scope.clone(),
            offset_alignment: self.offset_alignment,
        };
        debug!("Sliced {} into {node}", self.name);
        Ok(Buffer(Arc::new(node)))
    }

    /// Returns a [Buffer] with variables in its shape, strides, and offset replaced according to
    /// `bindings`. Typically used to bind symbolic dimension sizes to concrete ones.
    pub fn substitute(&self, bindings: &HashMap<Var, Expr>) -> Result<Buffer, BufferError> {
        let mut mapper = |v: &Var| bindings.get(v).cloned().unwrap_or_else(|| v.to_expr());
        let mut subs_all = |exprs: &[Expr]| -> Option<Vec<Expr>> {
            exprs
                .iter()
                .map(|e| e.checked_map_vars(&mut mapper))
                .collect()
        };
        let shape = subs_all(&self.shape).ok_or(BufferError::Overflow)?;
        let strides = subs_all(&self.strides).ok_or(BufferError::Overflow)?;
        let elem_offset = self
            .elem_offset
            .checked_map_vars(&mut mapper)
            .ok_or(BufferError::Overflow)?;
        Ok(Buffer(Arc::new(BufferNode {
            shape,
            strides,
            elem_offset,
            ..BufferNode::clone(self)
        })))
    }

    fn slice_stays_contiguous(&self, extents: &[Expr]) -> bool {
        extents
            .iter()
            .zip(&self.shape)
            .skip(1)
            .all(|(extent, dim)| extent == dim)
    }
}

impl BufferNode {
    pub fn data(&self) -> &Var {
        &self.data
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[Expr] {
        &self.shape
    }

    /// The explicit strides. Empty if the buffer is contiguous.
    pub fn strides(&self) -> &[Expr] {
        &self.strides
    }

    /// The offset of the first value, in units of `dtype` (lanes included).
    pub fn elem_offset(&self) -> &Expr {
        &self.elem_offset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The storage scope tag. Empty for the default scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The storage scope, naming the default scope `"global"`.
    pub fn storage_scope(&self) -> &str {
        if self.scope.is_empty() {
            "global"
        } else {
            &self.scope
        }
    }

    pub fn offset_alignment(&self) -> u32 {
        self.offset_alignment
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides.is_empty()
    }

    /// The strides of each dimension: the explicit strides, if any, and otherwise the row-major
    /// strides of the shape.
    pub fn effective_strides(&self) -> Result<Cow<'_, [Expr]>, BufferError> {
        if self.strides.is_empty() {
            Ok(Cow::Owned(row_major_strides(&self.shape)?))
        } else {
            Ok(Cow::Borrowed(&self.strides))
        }
    }

    /// The offset, in units of `dtype`, of the value at `index`.
    pub fn flat_offset(&self, index: &[Expr]) -> Result<Expr, BufferError> {
        self.check_rank(index.len())?;
        let mut offset = self.elem_offset.clone();
        for (idx, stride) in index.iter().zip(self.effective_strides()?.iter()) {
            offset = idx
                .clone()
                .checked_mul(stride.clone())
                .and_then(|term| offset.checked_add(term))
                .ok_or(BufferError::Overflow)?;
        }
        trace!("Offset of {} at [{}] is {offset}", self.name, join_into_string(index, ", "));
        Ok(offset)
    }

    fn check_rank(&self, got: usize) -> Result<(), BufferError> {
        if got != self.rank() {
            return Err(BufferError::InvalidIndex {
                expected: self.rank(),
                got,
            });
        }
        Ok(())
    }
}

/// Construct a contiguous [Buffer] with a fresh data pointer, no offset, and the default scope.
pub fn declare_buffer(shape: Vec<Expr>, dtype: DataType, name: impl Into<String>) -> Buffer {
    let name = name.into();
    let node = BufferNode {
        data: Var::pointer(name.clone(), dtype),
        dtype,
        shape,
        strides: vec![],
        elem_offset: Expr::zero(),
        name,
        scope: String::new(),
        offset_alignment: 1,
    };
    debug!("Declared buffer {node}");
    Buffer(Arc::new(node))
}

/// Like [declare_buffer], for a `float32` buffer named `buffer`.
pub fn declare_buffer_default(shape: Vec<Expr>) -> Buffer {
    declare_buffer(shape, DataType::float32(), "buffer")
}

/// Computes row-major strides: the last dimension has stride 1 and each other dimension's stride
/// is the product of the sizes of the dimensions after it.
///
/// Returns [BufferError::Overflow] if a constant stride does not fit in an `i64`.
pub fn row_major_strides(shape: &[Expr]) -> Result<Vec<Expr>, BufferError> {
    let mut strides = vec![Expr::constant(1); shape.len()];
    for k in (0..shape.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1]
            .clone()
            .checked_mul(shape[k + 1].clone())
            .ok_or(BufferError::Overflow)?;
    }
    Ok(strides)
}

/// The width of one `dtype` value in bytes, as an expression coefficient.
fn byte_width(dtype: DataType) -> i64 {
    i64::from(dtype.bytes()).max(1)
}

impl Deref for Buffer {
    type Target = BufferNode;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for Buffer {}

impl Hash for Buffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for BufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}[{}]",
            self.name,
            self.dtype,
            join_into_string(&self.shape, ", ")
        )?;
        if !self.strides.is_empty() {
            write!(f, " strides=[{}]", join_into_string(&self.strides, ", "))?;
        }
        if self.elem_offset != 0 {
            write!(f, " offset={}", self.elem_offset)?;
        }
        Ok(())
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

pub mod macros {
    pub mod internal {
        use crate::expr::Expr;
        use crate::var::Var;

        pub trait IntoExpr {
            fn into_expr(self) -> Expr;
        }
        impl IntoExpr for Expr {
            fn into_expr(self) -> Expr {
                self
            }
        }
        impl IntoExpr for &Expr {
            fn into_expr(self) -> Expr {
                self.clone()
            }
        }
        impl IntoExpr for i64 {
            fn into_expr(self) -> Expr {
                Expr::constant(self)
            }
        }
        impl IntoExpr for Var {
            fn into_expr(self) -> Expr {
                Expr::from(self)
            }
        }
        impl IntoExpr for &Var {
            fn into_expr(self) -> Expr {
                self.to_expr()
            }
        }
    }

    /// Builds a `Vec<Expr>` from integers, [Var](crate::var::Var)s, and
    /// [Expr](crate::expr::Expr)s.
    #[macro_export]
    macro_rules! exprs {
        ($($e:expr),*$(,)*) => {{
            #[allow(unused_imports)]
            use $crate::buffer::macros::internal::IntoExpr;
            // Bind to a variable with an explicit type to help out type inference.
            let v: Vec<$crate::expr::Expr> = vec![ $( ($e).into_expr() ),* ];
            v
        }};
    }
}
