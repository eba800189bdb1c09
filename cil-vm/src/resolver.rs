//! Method resolver (§4.4). `call`/`newobj` targets are already bound to a concrete
//! [`MethodDesc`] at load/build time (the hand-assembled `Instruction`s and the real loader
//! both embed the resolved descriptor directly in the opcode, mirroring a real call site's
//! metadata token). What remains a *runtime* decision is virtual dispatch: `callvirt`'s
//! statically-bound target must be redirected to the receiver's actual override.
//!
//! The redirection table is a hash index (declaring-type full name, method name) -> candidates,
//! built once per loaded assembly rather than scanned linearly, per the redesign in §9.

use fxhash::FxHashMap;

use crate::descriptors::{MethodDesc, TypeDesc};

pub struct Resolver<'l> {
	by_type_and_name: FxHashMap<(String, &'l str), Vec<&'l MethodDesc<'l>>>,
}

impl<'l> Resolver<'l> {
	pub fn build(types: &[&'l TypeDesc<'l>]) -> Self {
		let mut by_type_and_name: FxHashMap<(String, &'l str), Vec<&'l MethodDesc<'l>>> = FxHashMap::default();
		for ty in types {
			for method in ty.methods() {
				by_type_and_name.entry((ty.full_name(), method.name())).or_default().push(method);
			}
		}
		Self { by_type_and_name }
	}

	/// `true` for the one resolver-level no-op in §4.4: an RVA-less call to `System.Object..ctor`.
	pub fn is_object_ctor_noop(target: &MethodDesc) -> bool {
		target.rva() == 0
			&& target.name() == ".ctor"
			&& target.declaring_type().map(|t| t.full_name()) == Some("System.Object".to_string())
	}

	/// Redirects a statically-bound `callvirt` target to the override declared (directly, or
	/// inherited) on the receiver's actual runtime type. Falls back to the static target when
	/// the receiver's type hierarchy doesn't declare an override of the same name -- this
	/// subsumes the narrower "interface redirects to a concrete method" case the CLR's own
	/// vtable layout would otherwise require, since every lookup here is already by name.
	pub fn resolve_virtual(&self, target: &'l MethodDesc<'l>, receiver_type: &'l TypeDesc<'l>) -> &'l MethodDesc<'l> {
		let mut cursor = Some(receiver_type);
		while let Some(ty) = cursor {
			if let Some(candidates) = self.by_type_and_name.get(&(ty.full_name(), target.name())) {
				if let Some(candidate) = candidates.iter().find(|c| c.parameter_count() == target.parameter_count()) {
					return candidate;
				}
			}
			cursor = ty.base();
		}
		target
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::descriptors::Arena;
	use std::cell::Cell;

	fn make_type<'l>(arena: &'l Arena<'l>, name: &'l str, base: Option<&'l TypeDesc<'l>>) -> &'l TypeDesc<'l> {
		arena.alloc(TypeDesc {
			name,
			namespace: "",
			is_interface: false,
			is_value_type: false,
			assembly: "test",
			fields: Cell::new(&[]),
			methods: Cell::new(&[]),
			base: Cell::new(base),
		})
	}

	fn make_method<'l>(arena: &'l Arena<'l>, name: &'l str, declaring: &'l TypeDesc<'l>) -> &'l MethodDesc<'l> {
		let method = arena.alloc(MethodDesc {
			name,
			declaring_type: Cell::new(Some(declaring)),
			param_kinds: &[],
			return_kind: None,
			has_this: true,
			is_static: false,
			rva: 1,
			is_internal_call: false,
			is_implemented_by_runtime: false,
			body: Cell::new(None),
		});
		declaring.methods.set(arena.alloc_slice(&[method]));
		method
	}

	#[test]
	fn virtual_call_redirects_to_receiver_override() {
		let arena = Arena::new();
		let animal = make_type(&arena, "Animal", None);
		let speak_on_animal = make_method(&arena, "Speak", animal);
		let dog = make_type(&arena, "Dog", Some(animal));
		let speak_on_dog = make_method(&arena, "Speak", dog);

		let resolver = Resolver::build(&[animal, dog]);
		let resolved = resolver.resolve_virtual(speak_on_animal, dog);
		assert!(resolved.is_same(speak_on_dog));
	}

	#[test]
	fn virtual_call_without_override_falls_back_to_static_target() {
		let arena = Arena::new();
		let animal = make_type(&arena, "Animal", None);
		let speak = make_method(&arena, "Speak", animal);
		let cat = make_type(&arena, "Cat", Some(animal));

		let resolver = Resolver::build(&[animal, cat]);
		let resolved = resolver.resolve_virtual(speak, cat);
		assert!(resolved.is_same(speak));
	}
}
