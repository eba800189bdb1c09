//! Owned, arena-allocated descriptors the interpreter actually runs against.
//!
//! `cil-meta`'s schema types are tied to the metadata arena's lifetime and their fields are
//! crate-private (they're a loader's *output*, not a construction API), so end-to-end tests
//! that hand-assemble a method body (§8) cannot build a `cil_meta::Method` directly. `loader`
//! translates a parsed `cil_meta::Assembly` into the descriptors below once, at load time;
//! everything downstream -- the resolver, the interpreter, the internal-method registry --
//! only ever sees this representation. Identity (two descriptors of the same entity are
//! reference-equal) falls out of arena interning, the same trick `cil-meta` uses for `Type`.

use std::cell::Cell;
use bumpalo::Bump;
use crate::value::ValueKind;

/// Owns every descriptor and instruction array produced while loading one run's assemblies.
pub struct Arena<'l> {
	bump: Box<Bump>,
	_marker: std::marker::PhantomData<&'l ()>,
}

impl<'l> Default for Arena<'l> {
	fn default() -> Self {
		Self::new()
	}
}

impl<'l> Arena<'l> {
	pub fn new() -> Self {
		Self { bump: Box::new(Bump::new()), _marker: std::marker::PhantomData }
	}

	/// SAFETY: the returned reference is bound to `'l`, not to the call's own borrow of
	/// `self`; this is sound because `self.bump` is heap-allocated and moves with `self`,
	/// so its address (and everything allocated out of it) is stable for `Arena`'s lifetime.
	pub fn bump(&self) -> &'l Bump {
		unsafe { std::mem::transmute::<&Bump, &'l Bump>(&self.bump) }
	}

	pub fn alloc<T>(&self, value: T) -> &'l T {
		self.bump().alloc(value)
	}

	pub fn alloc_str(&self, s: &str) -> &'l str {
		self.bump().alloc_str(s)
	}

	pub fn alloc_slice<T: Copy>(&self, items: &[T]) -> &'l [T] {
		self.bump().alloc_slice_copy(items)
	}

	pub fn alloc_slice_from_iter<T, I: IntoIterator<Item = T, IntoIter: ExactSizeIterator>>(&self, items: I) -> &'l [T] {
		self.bump().alloc_slice_fill_iter(items)
	}
}

#[derive(Debug)]
pub struct TypeDesc<'l> {
	pub(crate) name: &'l str,
	pub(crate) namespace: &'l str,
	pub(crate) is_interface: bool,
	pub(crate) is_value_type: bool,
	pub(crate) assembly: &'l str,
	pub(crate) fields: Cell<&'l [&'l FieldDesc<'l>]>,
	pub(crate) methods: Cell<&'l [&'l MethodDesc<'l>]>,
	pub(crate) base: Cell<Option<&'l TypeDesc<'l>>>,
}

impl<'l> TypeDesc<'l> {
	pub fn name(&self) -> &'l str {
		self.name
	}

	pub fn namespace(&self) -> &'l str {
		self.namespace
	}

	pub fn full_name(&self) -> String {
		match self.namespace.is_empty() {
			true => self.name.to_string(),
			false => format!("{}.{}", self.namespace, self.name),
		}
	}

	pub fn is_interface(&self) -> bool {
		self.is_interface
	}

	pub fn is_value_type(&self) -> bool {
		self.is_value_type
	}

	pub fn assembly(&self) -> &'l str {
		self.assembly
	}

	pub fn fields(&self) -> &'l [&'l FieldDesc<'l>] {
		self.fields.get()
	}

	pub fn methods(&self) -> &'l [&'l MethodDesc<'l>] {
		self.methods.get()
	}

	pub fn base(&self) -> Option<&'l TypeDesc<'l>> {
		self.base.get()
	}

	pub fn field(&self, name: &str) -> Option<&'l FieldDesc<'l>> {
		self.fields.get().iter().find(|f| f.name == name).copied()
	}

	pub fn method(&self, name: &str) -> Option<&'l MethodDesc<'l>> {
		self.methods.get().iter().find(|m| m.name == name).copied()
	}

	/// Identity comparison: two descriptors of the same underlying entity are the same allocation.
	pub fn is_same(&self, other: &TypeDesc<'l>) -> bool {
		std::ptr::eq(self, other)
	}
}

#[derive(Debug)]
pub struct FieldDesc<'l> {
	pub(crate) name: &'l str,
	pub(crate) ordinal: usize,
	pub(crate) kind: ValueKind,
	pub(crate) class: Option<&'l TypeDesc<'l>>,
	pub(crate) declaring_type: Cell<Option<&'l TypeDesc<'l>>>,
	pub(crate) is_static: bool,
}

impl<'l> FieldDesc<'l> {
	pub fn name(&self) -> &'l str {
		self.name
	}

	pub fn ordinal(&self) -> usize {
		self.ordinal
	}

	pub fn kind(&self) -> ValueKind {
		self.kind
	}

	pub fn class(&self) -> Option<&'l TypeDesc<'l>> {
		self.class
	}

	pub fn declaring_type(&self) -> Option<&'l TypeDesc<'l>> {
		self.declaring_type.get()
	}

	pub fn is_static(&self) -> bool {
		self.is_static
	}
}

#[derive(Debug)]
pub struct MethodDesc<'l> {
	pub(crate) name: &'l str,
	pub(crate) declaring_type: Cell<Option<&'l TypeDesc<'l>>>,
	pub(crate) param_kinds: &'l [ValueKind],
	pub(crate) return_kind: Option<ValueKind>,
	pub(crate) has_this: bool,
	pub(crate) is_static: bool,
	pub(crate) rva: u32,
	pub(crate) is_internal_call: bool,
	pub(crate) is_implemented_by_runtime: bool,
	pub(crate) body: Cell<Option<&'l MethodBody<'l>>>,
}

impl<'l> MethodDesc<'l> {
	pub fn name(&self) -> &'l str {
		self.name
	}

	pub fn declaring_type(&self) -> Option<&'l TypeDesc<'l>> {
		self.declaring_type.get()
	}

	pub fn parameter_count(&self) -> usize {
		self.param_kinds.len()
	}

	pub fn param_kinds(&self) -> &'l [ValueKind] {
		self.param_kinds
	}

	pub fn has_return_value(&self) -> bool {
		self.return_kind.is_some()
	}

	pub fn has_this(&self) -> bool {
		self.has_this
	}

	pub fn is_static(&self) -> bool {
		self.is_static
	}

	pub fn rva(&self) -> u32 {
		self.rva
	}

	pub fn is_internal_call(&self) -> bool {
		self.is_internal_call
	}

	pub fn is_implemented_by_runtime(&self) -> bool {
		self.is_implemented_by_runtime
	}

	pub fn body(&self) -> Option<&'l MethodBody<'l>> {
		self.body.get()
	}

	pub fn is_same(&self, other: &MethodDesc<'l>) -> bool {
		std::ptr::eq(self, other)
	}

	/// The canonical internal-method name: `MethodName` for `isInternalCall`, or
	/// `DeclaringType.Replace('.', '_') + "." + MethodName + "_impl"` for runtime-implemented.
	pub fn internal_name(&self) -> String {
		if self.is_internal_call {
			return self.name.to_string();
		}
		let declaring = self.declaring_type.get().map(|t| t.full_name()).unwrap_or_default();
		format!("{}.{}_impl", declaring.replace('.', "_"), self.name)
	}
}

#[derive(Debug)]
pub struct MethodBody<'l> {
	pub max_stack_size: u16,
	pub locals: &'l [ValueKind],
	pub instructions: &'l [Instruction<'l>],
	pub exception_regions: &'l [ExceptionRegion<'l>],
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExceptionRegionKind {
	Catch,
	Finally,
	Fault,
}

#[derive(Debug)]
pub struct ExceptionRegion<'l> {
	pub kind: ExceptionRegionKind,
	/// Instruction index (not byte offset) of the first instruction of the protected region.
	pub try_start: u32,
	pub try_end: u32,
	pub handler_start: u32,
	pub handler_end: u32,
	/// Matched against the thrown object's declared type by simple name (§4.5).
	pub catch_type: Option<&'l TypeDesc<'l>>,
}

#[derive(Debug)]
pub struct Instruction<'l> {
	pub op: Op<'l>,
	/// Byte position in the original method body; `0` for hand-assembled bodies that don't track it.
	pub position: u32,
}

/// Every opcode this engine dispatches, pre-decoded: branch operands are already resolved to
/// instruction indices (the "byte-offset-to-instruction-index map" of §4.5) so the interpreter
/// never re-derives control flow from raw byte offsets.
#[derive(Debug)]
pub enum Op<'l> {
	Nop,
	Dup,
	Pop,

	LdcI4(i32),
	LdcI8(i64),
	LdcR4(f32),
	LdcR8(f64),
	LdStr(&'l str),
	LdNull,

	LdLoc(u16),
	LdLocA(u16),
	StLoc(u16),
	LdArg(u16),
	LdArgA(u16),
	StArg(u16),

	Add,
	Sub,
	Mul,
	Div,
	DivUn,
	Rem,
	RemUn,
	Neg,
	And,
	Or,
	Xor,
	Not,
	Shl,
	Shr,
	ShrUn,

	Ceq,
	Cgt,
	CgtUn,
	Clt,
	CltUn,

	ConvI1,
	ConvI2,
	ConvI4,
	ConvI8,
	ConvU1,
	ConvU2,
	ConvU4,
	ConvU8,
	ConvR4,
	ConvR8,
	ConvRUn,

	Br(u32),
	BrTrue(u32),
	BrFalse(u32),
	Beq(u32),
	Bge(u32),
	Bgt(u32),
	Ble(u32),
	Blt(u32),
	BgeUn(u32),
	BgtUn(u32),
	BleUn(u32),
	BltUn(u32),
	BneUn(u32),
	Switch(&'l [u32]),

	LdFld(&'l FieldDesc<'l>),
	StFld(&'l FieldDesc<'l>),
	LdSFld(&'l FieldDesc<'l>),
	StSFld(&'l FieldDesc<'l>),

	NewArr(ValueKind),
	LdLen,
	LdElem(ValueKind),
	StElem(ValueKind),

	Call(&'l MethodDesc<'l>),
	CallVirt(&'l MethodDesc<'l>),
	NewObj(&'l MethodDesc<'l>),
	Ret,
	LdFtn(&'l MethodDesc<'l>),

	LdToken(&'l TypeDesc<'l>),

	Throw,
	Leave(u32),
	EndFinally,

	InitObj,
	Box,
	Unbox,
	UnboxAny,
	LdObj,
	StObj,
	CpObj,
	LdInd(ValueKind),
	StInd(ValueKind),
}
