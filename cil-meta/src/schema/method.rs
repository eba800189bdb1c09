use std::cell::Cell;

use crate::raw::heaps::table::{MethodAttributes, MethodImplAttributes};
use crate::raw::indices::metadata_token::MethodDef;
use crate::schema::heaps::{InternedBlob, InternedString};
use crate::schema::r#type::Type;

/// Mirrors `raw::il::ExceptionClauseFlags`, collapsed to the four mutually-exclusive kinds
/// a method body's data section actually distinguishes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExceptionRegionKind {
	Catch,
	Filter,
	Finally,
	Fault,
}

#[derive(Debug)]
pub struct ExceptionRegion<'l> {
	pub kind: ExceptionRegionKind,
	pub try_offset: u32,
	pub try_length: u32,
	pub handler_offset: u32,
	pub handler_length: u32,
	/// Only set for `Filter` regions; offset of the filter's own instruction block.
	pub filter_offset: Option<u32>,
	/// Only set for `Catch` regions whose class token resolves to a `TypeDef` row.
	/// A catch clause backed by a `TypeRef` (a type imported from another assembly) is left `None`.
	pub catch_type: Option<&'l Type<'l>>,
}

#[derive(Debug)]
pub struct Method<'l> {
	pub(crate) metadata_token: MethodDef,
	pub(crate) name: InternedString<'l>,
	pub(crate) rva: u32,
	pub(crate) flags: MethodAttributes,
	pub(crate) impl_flags: MethodImplAttributes,
	pub(crate) parameter_count: usize,
	pub(crate) has_return_value: bool,
	pub(crate) has_this: bool,
	pub(crate) declaring_type: Cell<Option<&'l Type<'l>>>,
	pub(crate) body: Option<MethodBody<'l>>,
}

impl<'l> Method<'l> {
	pub fn name(&self) -> &'l str {
		self.name.as_str()
	}

	pub fn metadata_token(&self) -> MethodDef {
		self.metadata_token
	}

	pub fn rva(&self) -> u32 {
		self.rva
	}

	pub fn body(&self) -> Option<&MethodBody<'l>> {
		self.body.as_ref()
	}

	pub fn declaring_type(&self) -> Option<&'l Type<'l>> {
		self.declaring_type.get()
	}

	pub fn is_static(&self) -> bool {
		self.flags.contains(MethodAttributes::STATIC)
	}

	pub fn is_virtual(&self) -> bool {
		self.flags.contains(MethodAttributes::VIRTUAL)
	}

	pub fn parameter_count(&self) -> usize {
		self.parameter_count
	}

	pub fn has_return_value(&self) -> bool {
		self.has_return_value
	}

	pub fn has_this(&self) -> bool {
		self.has_this
	}

	/// A method with no RVA and no `InternalCall`/`Runtime` impl flag is an abstract
	/// or interface declaration; it never has a body and is never directly invoked.
	pub fn is_internal_call(&self) -> bool {
		self.impl_flags.contains(MethodImplAttributes::INTERNAL_CALL)
	}

	pub fn is_implemented_by_runtime(&self) -> bool {
		self.impl_flags & MethodImplAttributes::CODE_TYPE_MASK == MethodImplAttributes::RUNTIME
	}
}

#[derive(Debug)]
pub struct MethodBody<'l> {
	pub max_stack_size: u16,
	pub init_locals: bool,
	pub locals: &'l [&'l Type<'l>],
	pub code: InternedBlob<'l>,
	pub exception_regions: &'l [ExceptionRegion<'l>],
}
