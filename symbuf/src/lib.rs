pub mod attrs;
pub mod buffer;
pub mod dtype;
pub mod expr;
pub mod ir;
pub mod opaque_symbol;
pub mod pprint;
pub mod utils;
pub mod var;

pub use buffer::{declare_buffer, declare_buffer_default, Buffer, BufferError, BufferNode};
pub use dtype::DataType;
pub use expr::Expr;
pub use var::Var;
