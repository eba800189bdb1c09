use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::WellKnownTypes;
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("get_Name", get_name);
	registry.register("get_FullName", get_full_name);
}

fn get_name(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let Some(Value::Object(handle)) = params.first() else {
		return Err(ClrError::NullReference);
	};
	Ok(heap.object(*handle)?.get("_name")?.clone())
}

fn get_full_name(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let Some(Value::Object(handle)) = params.first() else {
		return Err(ClrError::NullReference);
	};
	let obj = heap.object(*handle)?;
	let namespace = match obj.get("_namespace")? {
		Value::String(s) => s.to_string(),
		_ => String::new(),
	};
	let name = match obj.get("_name")? {
		Value::String(s) => s.to_string(),
		_ => String::new(),
	};
	let full = match namespace.is_empty() {
		true => name,
		false => format!("{namespace}.{name}"),
	};
	Ok(Value::String(full.into()))
}
