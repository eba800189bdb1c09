use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::string::str_of;
use crate::internals::WellKnownTypes;
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("get_Message", get_message);
	registry.register(".ctor", ctor);
}

fn get_message(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let Some(Value::Object(handle)) = params.first() else {
		return Err(ClrError::NullReference);
	};
	Ok(heap.object(*handle)?.get("_message")?.clone())
}

/// `Exception(string message)`: the only `.ctor` reaching the internal-method registry, since
/// `System.Object..ctor` is intercepted as a resolver-level no-op before dispatch (§4.4).
fn ctor(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [receiver, message] = params else {
		return Err(ClrError::Internal("Exception..ctor requires a message".into()));
	};
	let Value::Object(handle) = receiver else {
		return Err(ClrError::NullReference);
	};
	let message = str_of(heap, message)?;
	heap.object_mut(*handle)?.set("_message", Value::String(message.into()))?;
	Ok(Value::None)
}
