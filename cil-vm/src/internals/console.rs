use super::{display_value, InternalRegistry};
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::WellKnownTypes;
use crate::value::Value;

pub fn register(registry: &mut InternalRegistry) {
	registry.register("Write", write);
	registry.register("WriteLine", write_line);
	registry.register("ReadLine", read_line);
}

fn write(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	match params.first() {
		Some(v) => print!("{}", display_value(heap, v)),
		None => {}
	}
	Ok(Value::None)
}

fn write_line(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	match params.first() {
		Some(v) => println!("{}", display_value(heap, v)),
		None => println!(),
	}
	Ok(Value::None)
}

fn read_line(_: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, _: &[Value]) -> Result<Value, ClrError> {
	let mut line = String::new();
	match std::io::stdin().read_line(&mut line) {
		Ok(0) => Ok(Value::Null),
		Ok(_) => Ok(Value::String(line.trim_end_matches(['\r', '\n']).into())),
		Err(e) => Err(ClrError::Internal(format!("stdin read failed: {e}"))),
	}
}
