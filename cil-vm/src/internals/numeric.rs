use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::{display_value, WellKnownTypes};
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("Parse", parse);
}

fn text_of(heap: &Heap, value: &Value) -> Result<String, ClrError> {
	match value {
		Value::String(s) => Ok(s.to_string()),
		other => Ok(display_value(heap, other)),
	}
}

/// `Int32`/`Int64`/`Double.Parse` share the canonical name `Parse` (§4.5): the declaring type
/// on the resolved method descriptor tells us which numeric kind to parse into.
fn parse(heap: &mut Heap, _: &WellKnownTypes, method: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let text = text_of(heap, params.first().ok_or_else(|| ClrError::Internal("Parse requires a string".into()))?)?;
	let type_name = method.declaring_type().map(|t| t.name()).unwrap_or_default();
	match type_name {
		"Int32" => text.trim().parse::<i32>().map(Value::Int32).map_err(|_| ClrError::InvalidCast(format!("'{text}' is not a valid Int32"))),
		"Int64" => text.trim().parse::<i64>().map(Value::Int64).map_err(|_| ClrError::InvalidCast(format!("'{text}' is not a valid Int64"))),
		"Double" => text.trim().parse::<f64>().map(Value::Float64).map_err(|_| ClrError::InvalidCast(format!("'{text}' is not a valid Double"))),
		other => Err(ClrError::Internal(format!("Parse is not implemented for {other}"))),
	}
}
