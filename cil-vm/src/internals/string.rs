use super::InternalRegistry;
use crate::descriptors::MethodDesc;
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::{display_value, WellKnownTypes};
use crate::value::{Value, ValueKind};

pub fn register(registry: &mut InternalRegistry) {
	registry.register("Concat", concat);
	registry.register("Substring", substring);
	registry.register("ToUpper", to_upper);
	registry.register("ToLower", to_lower);
	registry.register("IndexOf", index_of);
	registry.register("Split", split);
	registry.register("Trim", trim);
	registry.register("get_Chars", get_chars);
}

pub(crate) fn str_of(heap: &Heap, value: &Value) -> Result<String, ClrError> {
	match value {
		Value::String(s) => Ok(s.to_string()),
		Value::Null => Ok(String::new()),
		other => Ok(display_value(heap, other)),
	}
}

fn concat(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let mut out = String::new();
	for p in params {
		out.push_str(&str_of(heap, p)?);
	}
	Ok(Value::String(out.into()))
}

fn substring(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [receiver, rest @ ..] = params else {
		return Err(ClrError::Internal("String.Substring requires a receiver".into()));
	};
	let s = str_of(heap, receiver)?;
	let chars: Vec<char> = s.chars().collect();
	let start = match rest.first() {
		Some(Value::Int32(i)) => *i as usize,
		_ => return Err(ClrError::Internal("String.Substring expects an Int32 start index".into())),
	};
	let len = match rest.get(1) {
		Some(Value::Int32(i)) => *i as usize,
		_ => chars.len().saturating_sub(start),
	};
	if start > chars.len() || start + len > chars.len() {
		return Err(ClrError::IndexOutOfRange);
	}
	let out: String = chars[start..start + len].iter().collect();
	Ok(Value::String(out.into()))
}

fn to_upper(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let s = str_of(heap, params.first().ok_or_else(|| ClrError::Internal("missing receiver".into()))?)?;
	Ok(Value::String(s.to_uppercase().into()))
}

fn to_lower(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let s = str_of(heap, params.first().ok_or_else(|| ClrError::Internal("missing receiver".into()))?)?;
	Ok(Value::String(s.to_lowercase().into()))
}

fn index_of(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [receiver, needle] = params else {
		return Err(ClrError::Internal("String.IndexOf requires a needle".into()));
	};
	let s = str_of(heap, receiver)?;
	let needle = str_of(heap, needle)?;
	Ok(Value::Int32(match s.find(&needle) {
		Some(byte_idx) => s[..byte_idx].chars().count() as i32,
		None => -1,
	}))
}

fn split(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [receiver, separator] = params else {
		return Err(ClrError::Internal("String.Split requires a separator".into()));
	};
	let s = str_of(heap, receiver)?;
	let sep = str_of(heap, separator)?;
	let sep_char = sep.chars().next().ok_or_else(|| ClrError::Internal("String.Split separator must be non-empty".into()))?;
	let parts: Vec<Value> = s.split(sep_char).map(|p| Value::String(p.into())).collect();
	let handle = heap.alloc_array_from(parts, ValueKind::String);
	Ok(Value::Array(handle))
}

fn trim(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let s = str_of(heap, params.first().ok_or_else(|| ClrError::Internal("missing receiver".into()))?)?;
	Ok(Value::String(s.trim().into()))
}

fn get_chars(heap: &mut Heap, _: &WellKnownTypes, _: &MethodDesc, params: &[Value]) -> Result<Value, ClrError> {
	let [receiver, index] = params else {
		return Err(ClrError::Internal("String.get_Chars requires an index".into()));
	};
	let s = str_of(heap, receiver)?;
	let Value::Int32(index) = index else {
		return Err(ClrError::Internal("String.get_Chars expects an Int32 index".into()));
	};
	let ch = s.chars().nth(*index as usize).ok_or(ClrError::IndexOutOfRange)?;
	Ok(Value::Int32(ch as i32))
}
