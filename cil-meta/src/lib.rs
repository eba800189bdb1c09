//! Reader for the PE/CLI assembly format: PE headers, ECMA-335 metadata tables,
//! and the method-body/IL opcode stream.

pub mod raw;
pub mod schema;
pub(crate) mod utilities;

pub use schema::assembly::Assembly;
pub use schema::method::{Method, MethodBody};
pub use schema::r#type::{PrimitiveType, Type, TypeKind};
pub use schema::{DataPool, ReadError};
