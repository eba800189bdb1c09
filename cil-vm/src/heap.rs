//! Object store and array store. Both are append-only; handles are the allocation index and
//! are never reused, so dangling references cannot arise (§3.2).

use fxhash::FxHashMap;

use crate::descriptors::TypeDesc;
use crate::errors::ClrError;
use crate::value::{Handle, Value, ValueKind};

pub struct Object<'l> {
	pub ty: &'l TypeDesc<'l>,
	fields: FxHashMap<&'l str, Value>,
}

impl<'l> Object<'l> {
	fn new(ty: &'l TypeDesc<'l>) -> Self {
		let mut fields = FxHashMap::default();
		for field in ty.fields() {
			fields.insert(field.name(), Value::default_for(field.kind()));
		}
		Self { ty, fields }
	}

	pub fn get(&self, name: &str) -> Result<&Value, ClrError> {
		self.fields.get(name).ok_or_else(|| ClrError::Internal(format!("missing field '{name}'")))
	}

	pub fn set(&mut self, name: &str, value: Value) -> Result<(), ClrError> {
		match self.fields.get_mut(name) {
			Some(slot) => {
				*slot = value;
				Ok(())
			}
			None => Err(ClrError::Internal(format!("missing field '{name}'"))),
		}
	}
}

pub struct ArrayObject {
	pub element_kind: ValueKind,
	elements: Vec<Value>,
}

impl ArrayObject {
	pub fn len(&self) -> usize {
		self.elements.len()
	}

	pub fn is_empty(&self) -> bool {
		self.elements.is_empty()
	}

	pub fn get(&self, index: i32) -> Result<&Value, ClrError> {
		usize::try_from(index).ok().and_then(|i| self.elements.get(i)).ok_or(ClrError::IndexOutOfRange)
	}

	pub fn set(&mut self, index: i32, value: Value) -> Result<(), ClrError> {
		let slot = usize::try_from(index).ok().and_then(|i| self.elements.get_mut(i)).ok_or(ClrError::IndexOutOfRange)?;
		*slot = value;
		Ok(())
	}

	pub fn as_slice(&self) -> &[Value] {
		&self.elements
	}
}

#[derive(Default)]
pub struct Heap<'l> {
	objects: Vec<Object<'l>>,
	arrays: Vec<ArrayObject>,
}

impl<'l> Heap<'l> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every field is created with its kind-appropriate zero; the caller populates it via a
	/// constructor call.
	pub fn alloc_object(&mut self, ty: &'l TypeDesc<'l>) -> Handle {
		self.objects.push(Object::new(ty));
		(self.objects.len() - 1) as Handle
	}

	pub fn alloc_array(&mut self, len: usize, element_kind: ValueKind) -> Handle {
		self.arrays.push(ArrayObject { element_kind, elements: vec![Value::default_for(element_kind); len] });
		(self.arrays.len() - 1) as Handle
	}

	/// Allocates an array pre-populated with `elements`, e.g. the result of `String.Split`.
	pub fn alloc_array_from(&mut self, elements: Vec<Value>, element_kind: ValueKind) -> Handle {
		self.arrays.push(ArrayObject { element_kind, elements });
		(self.arrays.len() - 1) as Handle
	}

	pub fn object(&self, handle: Handle) -> Result<&Object<'l>, ClrError> {
		self.objects.get(handle as usize).ok_or(ClrError::NullReference)
	}

	pub fn object_mut(&mut self, handle: Handle) -> Result<&mut Object<'l>, ClrError> {
		self.objects.get_mut(handle as usize).ok_or(ClrError::NullReference)
	}

	pub fn array(&self, handle: Handle) -> Result<&ArrayObject, ClrError> {
		self.arrays.get(handle as usize).ok_or(ClrError::NullReference)
	}

	pub fn array_mut(&mut self, handle: Handle) -> Result<&mut ArrayObject, ClrError> {
		self.arrays.get_mut(handle as usize).ok_or(ClrError::NullReference)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leaf_type<'l>(arena: &'l crate::descriptors::Arena<'l>) -> &'l TypeDesc<'l> {
		arena.alloc(TypeDesc {
			name: "Foo",
			namespace: "",
			is_interface: false,
			is_value_type: false,
			assembly: "test",
			fields: std::cell::Cell::new(&[]),
			methods: std::cell::Cell::new(&[]),
			base: std::cell::Cell::new(None),
		})
	}

	#[test]
	fn handles_are_strictly_increasing() {
		let arena = crate::descriptors::Arena::new();
		let ty = leaf_type(&arena);
		let mut heap = Heap::new();
		let a = heap.alloc_object(ty);
		let b = heap.alloc_object(ty);
		let c = heap.alloc_array(4, ValueKind::Int32);
		assert!(a < b);
		assert_eq!(c, 0);
	}

	#[test]
	fn array_bounds_are_checked() {
		let mut heap = Heap::new();
		let h = heap.alloc_array(2, ValueKind::Int32);
		let arr = heap.array_mut(h).unwrap();
		assert!(arr.set(5, Value::Int32(1)).is_err());
		assert!(arr.set(0, Value::Int32(1)).is_ok());
	}
}
