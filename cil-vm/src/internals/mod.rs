//! Internal-method registry (§4.6): canonical name -> host-implemented callback, standing in
//! for the managed body of `isInternalCall`/`isImplementedByRuntime` methods.

mod array;
mod console;
mod exception;
mod numeric;
mod object;
mod string;
mod r#type;

use fxhash::FxHashMap;

use crate::descriptors::{MethodDesc, TypeDesc};
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::value::Value;

/// A handful of base-library types this engine synthesises itself, since the supported test
/// corpus runs without a real `mscorlib` assembly (§1). Allocated once at engine construction.
pub struct WellKnownTypes<'l> {
	pub object: &'l TypeDesc<'l>,
	pub string: &'l TypeDesc<'l>,
	pub exception: &'l TypeDesc<'l>,
	pub type_: &'l TypeDesc<'l>,
	pub runtime_type_handle: &'l TypeDesc<'l>,
	pub int_ptr: &'l TypeDesc<'l>,
}

impl<'l> WellKnownTypes<'l> {
	pub fn new(arena: &crate::descriptors::Arena<'l>) -> Self {
		use crate::descriptors::FieldDesc;
		use crate::value::ValueKind;
		use std::cell::Cell;

		let make_type = |name: &'l str, namespace: &'l str, field_names: &[&'l str], field_kind: ValueKind| -> &'l TypeDesc<'l> {
			let ty: &'l TypeDesc<'l> = arena.alloc(TypeDesc {
				name,
				namespace,
				is_interface: false,
				is_value_type: false,
				assembly: "mscorlib",
				fields: Cell::new(&[]),
				methods: Cell::new(&[]),
				base: Cell::new(None),
			});
			let fields: Vec<&'l FieldDesc<'l>> = field_names
				.iter()
				.enumerate()
				.map(|(ordinal, name)| {
					let field: &'l FieldDesc<'l> = arena.alloc(FieldDesc {
						name,
						ordinal,
						kind: field_kind,
						class: None,
						declaring_type: Cell::new(Some(ty)),
						is_static: false,
					});
					field
				})
				.collect();
			ty.fields.set(arena.alloc_slice_from_iter(fields));
			ty
		};

		Self {
			object: make_type("Object", "System", &[], ValueKind::Null),
			string: make_type("String", "System", &[], ValueKind::Null),
			exception: make_type("Exception", "System", &["_message"], ValueKind::String),
			type_: make_type("Type", "System", &["_name", "_namespace"], ValueKind::String),
			runtime_type_handle: make_type("RuntimeTypeHandle", "System", &["_name", "_namespace"], ValueKind::String),
			int_ptr: make_type("IntPtr", "System", &["PtrToMethod"], ValueKind::MethodPtr),
		}
	}
}

/// The callback contract of §4.5: parameter slice, the resolved method descriptor (so a
/// canonical name shared by several overloads -- `Parse`, `get_Length` -- can disambiguate by
/// declaring type or by the receiver's own runtime kind), and the well-known type set used to
/// box return values (`GetType`, `ldtoken`, ...).
pub type InternalFn<'l> = fn(&mut Heap<'l>, &WellKnownTypes<'l>, &'l MethodDesc<'l>, &[Value]) -> Result<Value, ClrError>;

pub struct InternalRegistry<'l> {
	callbacks: FxHashMap<String, InternalFn<'l>>,
}

impl<'l> InternalRegistry<'l> {
	pub fn new() -> Self {
		let mut registry = Self { callbacks: FxHashMap::default() };
		console::register(&mut registry);
		string::register(&mut registry);
		numeric::register(&mut registry);
		array::register(&mut registry);
		object::register(&mut registry);
		exception::register(&mut registry);
		r#type::register(&mut registry);
		registry
	}

	pub fn register(&mut self, canonical_name: impl Into<String>, callback: InternalFn<'l>) {
		self.callbacks.insert(canonical_name.into(), callback);
	}

	pub fn invoke(
		&self,
		canonical_name: &str,
		heap: &mut Heap<'l>,
		well_known: &WellKnownTypes<'l>,
		method: &'l MethodDesc<'l>,
		params: &[Value],
	) -> Result<Value, ClrError> {
		let callback = self
			.callbacks
			.get(canonical_name)
			.ok_or_else(|| ClrError::Internal(format!("missing internal method '{canonical_name}'")))?;
		callback(heap, well_known, method, params)
	}
}

impl<'l> Default for InternalRegistry<'l> {
	fn default() -> Self {
		Self::new()
	}
}

/// Shared by every internal callback: the CLR's own `Object.ToString()` default.
pub(crate) fn display_value(heap: &Heap, value: &Value) -> String {
	match value {
		Value::None | Value::Null => String::new(),
		Value::Int32(v) => v.to_string(),
		Value::Int64(v) => v.to_string(),
		Value::Float32(v) => v.to_string(),
		Value::Float64(v) => v.to_string(),
		Value::Boolean(v) => v.to_string(),
		Value::String(s) => s.to_string(),
		Value::IntPtr(v) => v.to_string(),
		Value::Object(handle) => match heap.object(*handle) {
			Ok(obj) => obj.ty.full_name(),
			Err(_) => String::new(),
		},
		Value::Array(_) | Value::ObjectRef | Value::MethodPtr(_) => String::new(),
	}
}
