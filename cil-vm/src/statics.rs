//! Process-wide static-field store: (declaring-type full name, field name) -> Value (§4.3).

use fxhash::FxHashMap;

use crate::value::{Value, ValueKind};

#[derive(Default)]
pub struct StaticFields {
	values: FxHashMap<(String, String), Value>,
}

impl StaticFields {
	pub fn new() -> Self {
		Self::default()
	}

	/// A read with no prior write returns the kind-appropriate default rather than erroring.
	pub fn load(&self, declaring_type: &str, field: &str, kind: ValueKind) -> Value {
		match self.values.get(&(declaring_type.to_string(), field.to_string())) {
			Some(v) => v.clone(),
			None => Value::default_for(kind),
		}
	}

	pub fn store(&mut self, declaring_type: &str, field: &str, value: Value) {
		self.values.insert((declaring_type.to_string(), field.to_string()), value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn read_before_write_yields_default() {
		let statics = StaticFields::new();
		assert_eq!(statics.load("Foo", "bar", ValueKind::Int32), Value::Int32(0));
		assert_eq!(statics.load("Foo", "bar", ValueKind::String), Value::Null);
	}

	#[test]
	fn read_after_write_returns_latest_value() {
		let mut statics = StaticFields::new();
		statics.store("Foo", "bar", Value::Int32(1));
		statics.store("Foo", "bar", Value::Int32(2));
		assert_eq!(statics.load("Foo", "bar", ValueKind::Int32), Value::Int32(2));
	}
}
