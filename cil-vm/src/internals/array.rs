use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::WellKnownTypes;
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("get_Length", get_length);
}

/// Shared by `System.Array.get_Length` and `System.String.get_Length` (§4.6): both share the
/// canonical name `get_Length`, disambiguated here by the receiver's own runtime kind rather
/// than by the declaring type, since a plain length query needs no other context.
fn get_length(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	match params.first() {
		Some(Value::Array(handle)) => Ok(Value::Int32(heap.array(*handle)?.len() as i32)),
		Some(Value::String(s)) => Ok(Value::Int32(s.chars().count() as i32)),
		_ => Err(ClrError::Internal("get_Length requires an Array or String receiver".into())),
	}
}
