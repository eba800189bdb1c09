//! The per-call frame (§3.4): parameters, a fixed-capacity local slot array, and a private
//! evaluation stack. No frame observes another frame's stack.

use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::value::Value;

/// Sufficient for the supported test corpus; a method with more locals than this is out of scope.
pub const MAX_LOCALS: usize = 256;

pub struct Frame<'l> {
	pub method: &'l MethodDesc<'l>,
	params: Vec<Value>,
	locals: Vec<Value>,
	stack: Vec<Value>,
	pub pc: u32,
}

impl<'l> Frame<'l> {
	pub fn new(method: &'l MethodDesc<'l>, params: Vec<Value>, local_count: usize) -> Self {
		Self {
			method,
			params,
			locals: vec![Value::None; local_count.min(MAX_LOCALS)],
			stack: Vec::new(),
			pc: 0,
		}
	}

	pub fn push(&mut self, value: Value) {
		self.stack.push(value);
	}

	pub fn pop(&mut self) -> Result<Value, ClrError> {
		self.stack.pop().ok_or_else(|| ClrError::Internal("evaluation stack underflow".into()))
	}

	pub fn peek(&self) -> Result<&Value, ClrError> {
		self.stack.last().ok_or_else(|| ClrError::Internal("evaluation stack underflow".into()))
	}

	pub fn depth(&self) -> usize {
		self.stack.len()
	}

	/// Drops every value currently on the stack; used when unwinding into a handler (§4.5).
	pub fn clear_stack(&mut self) {
		self.stack.clear();
	}

	pub fn local(&self, index: u16) -> Result<&Value, ClrError> {
		self.locals.get(index as usize).ok_or_else(|| ClrError::Internal(format!("local index {index} out of range")))
	}

	/// `ldloca.s` on an uninitialised slot materialises a `Null` and stores it back first.
	pub fn local_for_address(&mut self, index: u16) -> Result<&mut Value, ClrError> {
		let slot = self.locals.get_mut(index as usize).ok_or_else(|| ClrError::Internal(format!("local index {index} out of range")))?;
		if matches!(slot, Value::None) {
			*slot = Value::Null;
		}
		Ok(slot)
	}

	pub fn set_local(&mut self, index: u16, value: Value) -> Result<(), ClrError> {
		let slot = self.locals.get_mut(index as usize).ok_or_else(|| ClrError::Internal(format!("local index {index} out of range")))?;
		*slot = value;
		Ok(())
	}

	pub fn arg(&self, index: u16) -> Result<&Value, ClrError> {
		self.params.get(index as usize).ok_or_else(|| ClrError::Internal(format!("argument index {index} out of range")))
	}

	pub fn arg_mut(&mut self, index: u16) -> Result<&mut Value, ClrError> {
		self.params.get_mut(index as usize).ok_or_else(|| ClrError::Internal(format!("argument index {index} out of range")))
	}

	pub fn set_arg(&mut self, index: u16, value: Value) -> Result<(), ClrError> {
		*self.arg_mut(index)? = value;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::descriptors::Arena;
	use std::cell::Cell;

	#[test]
	fn ldloca_on_uninitialised_slot_materialises_null() {
		let arena = Arena::new();
		let method = arena.alloc(MethodDesc {
			name: "M",
			declaring_type: Cell::new(None),
			param_kinds: &[],
			return_kind: None,
			has_this: false,
			is_static: true,
			rva: 1,
			is_internal_call: false,
			is_implemented_by_runtime: false,
			body: Cell::new(None),
		});
		let mut frame = Frame::new(method, vec![], 1);
		assert!(matches!(frame.local(0).unwrap(), Value::None));
		let addr = frame.local_for_address(0).unwrap();
		assert!(matches!(addr, Value::Null));
		assert!(matches!(frame.local(0).unwrap(), Value::Null));
	}
}
