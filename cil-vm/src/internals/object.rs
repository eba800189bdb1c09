use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::string::str_of;
use crate::internals::{display_value, WellKnownTypes};
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("ToString", to_string);
	registry.register("Equals", equals);
	registry.register("GetHashCode", get_hash_code);
	registry.register("GetType", get_type);
}

/// Every `ToString` override in the supported surface (`Int32`, `Int64`, `Double`, `Object`,
/// `Exception`) reduces to the same formatting, so one callback serves the bare name `ToString`.
fn to_string(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let receiver = params.first().ok_or_else(|| ClrError::Internal("missing receiver".into()))?;
	Ok(Value::String(display_value(heap, receiver).into()))
}

/// `String.Equals` compares text; everything else (the `Object.Equals` default) is reference
/// equality, which a handle comparison already gives us for `Object`/`Array`/`String` receivers.
fn equals(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [a, b] = params else {
		return Err(ClrError::Internal("Equals requires two operands".into()));
	};
	if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
		return Ok(Value::Boolean(str_of(heap, a)? == str_of(heap, b)?));
	}
	Ok(Value::Boolean(a == b))
}

/// Stable per object: derived from the handle, which never changes once allocated (§3.2).
fn get_hash_code(_: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let code = match params.first() {
		Some(Value::Object(h)) => *h as i32,
		Some(Value::Array(h)) => *h as i32,
		Some(Value::Int32(v)) => *v,
		Some(Value::Int64(v)) => *v as i32 ^ ((*v >> 32) as i32),
		Some(Value::String(s)) => {
			let mut hash: i32 = 0;
			for byte in s.as_bytes() {
				hash = hash.wrapping_mul(31).wrapping_add(*byte as i32);
			}
			hash
		}
		_ => 0,
	};
	Ok(Value::Int32(code))
}

fn get_type(heap: &mut Heap, well_known: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let Some(Value::Object(handle)) = params.first() else {
		return Err(ClrError::NullReference);
	};
	let ty = heap.object(*handle)?.ty;
	let handle = heap.alloc_object(well_known.type_);
	let obj = heap.object_mut(handle)?;
	obj.set("_name", Value::String(ty.name().into()))?;
	obj.set("_namespace", Value::String(ty.namespace().into()))?;
	Ok(Value::Object(handle))
}
