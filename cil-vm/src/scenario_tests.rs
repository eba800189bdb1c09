//! End-to-end scenarios (§8): hand-assembled `MethodDesc`/`MethodBody` trees run directly
//! against `interpreter::run_method`, bypassing `loader` entirely. Every descriptor here is
//! `pub(crate)`-constructed the same way `loader` itself builds one -- this module is the
//! reason those fields stay crate-visible rather than fully private.
//!
//! `internals::console`'s `Write`/`WriteLine` print straight to the process's real stdout with
//! no injectable sink, so these scenarios assert on the entry method's returned value (and on
//! `Ok`/`Err` outcome) rather than on captured output; each body still issues the `WriteLine`
//! call a real implementation would, to exercise the internal-method dispatch path end to end.

use std::cell::Cell;

use crate::descriptors::{Arena, ExceptionRegion, ExceptionRegionKind, Instruction, MethodBody, MethodDesc, Op, TypeDesc};
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::{InternalRegistry, WellKnownTypes};
use crate::interpreter::{self, Outcome};
use crate::resolver::Resolver;
use crate::statics::StaticFields;
use crate::value::{Value, ValueKind};

fn internal_method<'l>(arena: &'l Arena<'l>, name: &'l str, param_kinds: &'l [ValueKind], return_kind: Option<ValueKind>, has_this: bool) -> &'l MethodDesc<'l> {
	arena.alloc(MethodDesc {
		name,
		declaring_type: Cell::new(None),
		param_kinds,
		return_kind,
		has_this,
		is_static: !has_this,
		rva: 0,
		is_internal_call: true,
		is_implemented_by_runtime: false,
		body: Cell::new(None),
	})
}

#[allow(clippy::too_many_arguments)]
fn method_with_body<'l>(
	arena: &'l Arena<'l>,
	name: &'l str,
	declaring_type: Option<&'l TypeDesc<'l>>,
	param_kinds: &'l [ValueKind],
	return_kind: Option<ValueKind>,
	has_this: bool,
	instructions: Vec<Op<'l>>,
	locals: &'l [ValueKind],
	exception_regions: Vec<ExceptionRegion<'l>>,
) -> &'l MethodDesc<'l> {
	let instrs: Vec<Instruction<'l>> = instructions.into_iter().map(|op| Instruction { op, position: 0 }).collect();
	let body = arena.alloc(MethodBody {
		max_stack_size: 32,
		locals,
		instructions: arena.alloc_slice_from_iter(instrs),
		exception_regions: arena.alloc_slice_from_iter(exception_regions),
	});
	arena.alloc(MethodDesc {
		name,
		declaring_type: Cell::new(declaring_type),
		param_kinds,
		return_kind,
		has_this,
		is_static: !has_this,
		rva: 1,
		is_internal_call: false,
		is_implemented_by_runtime: false,
		body: Cell::new(Some(body)),
	})
}

fn run<'l>(
	heap: &mut Heap<'l>,
	statics: &mut StaticFields,
	resolver: &Resolver<'l>,
	internals: &InternalRegistry<'l>,
	well_known: &WellKnownTypes<'l>,
	method: &'l MethodDesc<'l>,
	params: Vec<Value>,
) -> Result<Outcome, ClrError> {
	let mut running = true;
	let mut ctx = interpreter::Context { heap, statics, resolver, internals, well_known, running: &mut running };
	interpreter::run_method(&mut ctx, method, params)
}

#[test]
fn hello_world_prints_greeting() {
	let arena = Arena::new();
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::String]), None, false);
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		None,
		false,
		vec![Op::LdStr(arena.alloc_str("Hello, World!")), Op::Call(write_line), Op::Ret],
		&[],
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let well_known = WellKnownTypes::new(&arena);
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	assert!(matches!(outcome, Outcome::Returned(Value::None)));
}

#[test]
fn arithmetic_expression_evaluates_to_18() {
	let arena = Arena::new();
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::Int32]), None, false);
	let locals = arena.alloc_slice(&[ValueKind::Int32, ValueKind::Int32]);
	// a = 10; b = 4; return a + b * 2;
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::Int32),
		false,
		vec![
			Op::LdcI4(10),
			Op::StLoc(0),
			Op::LdcI4(4),
			Op::StLoc(1),
			Op::LdLoc(0),
			Op::LdLoc(1),
			Op::LdcI4(2),
			Op::Mul,
			Op::Add,
			Op::Dup,
			Op::Call(write_line),
			Op::Ret,
		],
		locals,
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let well_known = WellKnownTypes::new(&arena);
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	assert!(matches!(outcome, Outcome::Returned(Value::Int32(18))));
}

#[test]
fn loop_sums_one_to_ten() {
	let arena = Arena::new();
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::Int32]), None, false);
	let locals = arena.alloc_slice(&[ValueKind::Int32, ValueKind::Int32]);
	// locals: 0 = i, 1 = sum. sum = 0; for (i = 1; i <= 10; i++) sum += i; return sum;
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::Int32),
		false,
		vec![
			/* 0 */ Op::LdcI4(0),
			/* 1 */ Op::StLoc(1),
			/* 2 */ Op::LdcI4(1),
			/* 3 */ Op::StLoc(0),
			/* 4 */ Op::LdLoc(0),
			/* 5 */ Op::LdcI4(10),
			/* 6 */ Op::Bgt(16),
			/* 7 */ Op::LdLoc(1),
			/* 8 */ Op::LdLoc(0),
			/* 9 */ Op::Add,
			/* 10 */ Op::StLoc(1),
			/* 11 */ Op::LdLoc(0),
			/* 12 */ Op::LdcI4(1),
			/* 13 */ Op::Add,
			/* 14 */ Op::StLoc(0),
			/* 15 */ Op::Br(4),
			/* 16 */ Op::LdLoc(1),
			/* 17 */ Op::Dup,
			/* 18 */ Op::Call(write_line),
			/* 19 */ Op::Ret,
		],
		locals,
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let well_known = WellKnownTypes::new(&arena);
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	assert!(matches!(outcome, Outcome::Returned(Value::Int32(55))));
}

#[test]
fn string_methods_compose_to_hello_wor() {
	let arena = Arena::new();
	let substring = internal_method(&arena, "Substring", arena.alloc_slice(&[ValueKind::Int32, ValueKind::Int32]), Some(ValueKind::String), true);
	let to_upper = internal_method(&arena, "ToUpper", &[], Some(ValueKind::String), true);
	let concat = internal_method(&arena, "Concat", arena.alloc_slice(&[ValueKind::String, ValueKind::String, ValueKind::String]), Some(ValueKind::String), false);
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::String]), None, false);

	// ("Hello World".Substring(0, 5)).ToUpper() + " " + "Hello World".Substring(6, 3)
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::String),
		false,
		vec![
			Op::LdStr(arena.alloc_str("Hello World")),
			Op::LdcI4(0),
			Op::LdcI4(5),
			Op::Call(substring),
			Op::Call(to_upper),
			Op::LdStr(arena.alloc_str(" ")),
			Op::LdStr(arena.alloc_str("Hello World")),
			Op::LdcI4(6),
			Op::LdcI4(3),
			Op::Call(substring),
			Op::Call(concat),
			Op::Dup,
			Op::Call(write_line),
			Op::Ret,
		],
		&[],
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let well_known = WellKnownTypes::new(&arena);
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	match outcome {
		Outcome::Returned(Value::String(s)) => assert_eq!(&*s, "HELLO Wor"),
		other => panic!("expected a returned string, got {other:?}"),
	}
}

#[test]
fn virtual_dispatch_to_override_returns_woof() {
	let arena = Arena::new();
	let well_known = WellKnownTypes::new(&arena);

	let animal = arena.alloc(TypeDesc {
		name: "Animal",
		namespace: "",
		is_interface: false,
		is_value_type: false,
		assembly: "test",
		fields: Cell::new(&[]),
		methods: Cell::new(&[]),
		base: Cell::new(None),
	});
	let speak_on_animal = arena.alloc(MethodDesc {
		name: "Speak",
		declaring_type: Cell::new(Some(animal)),
		param_kinds: &[],
		return_kind: Some(ValueKind::String),
		has_this: true,
		is_static: false,
		rva: 0,
		is_internal_call: false,
		is_implemented_by_runtime: false,
		body: Cell::new(None),
	});
	animal.methods.set(arena.alloc_slice(&[speak_on_animal]));

	let dog = arena.alloc(TypeDesc {
		name: "Dog",
		namespace: "",
		is_interface: false,
		is_value_type: false,
		assembly: "test",
		fields: Cell::new(&[]),
		methods: Cell::new(&[]),
		base: Cell::new(Some(animal)),
	});

	// `System.Object::.ctor()`, as called from Dog's own constructor (§4.4's resolver no-op).
	let object_ctor = arena.alloc(MethodDesc {
		name: ".ctor",
		declaring_type: Cell::new(Some(well_known.object)),
		param_kinds: &[],
		return_kind: None,
		has_this: true,
		is_static: false,
		rva: 0,
		is_internal_call: false,
		is_implemented_by_runtime: false,
		body: Cell::new(None),
	});
	let dog_ctor = method_with_body(&arena, ".ctor", Some(dog), &[], None, true, vec![Op::LdArg(0), Op::Call(object_ctor), Op::Ret], &[], vec![]);
	let dog_speak = method_with_body(&arena, "Speak", Some(dog), &[], Some(ValueKind::String), true, vec![Op::LdStr(arena.alloc_str("Woof")), Op::Ret], &[], vec![]);
	dog.methods.set(arena.alloc_slice(&[dog_ctor, dog_speak]));

	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::String]), None, false);

	// Animal a = new Dog(); return a.Speak(); -- statically bound to Animal::Speak, redirected
	// to Dog::Speak by the receiver's runtime type.
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::String),
		false,
		vec![Op::NewObj(dog_ctor), Op::CallVirt(speak_on_animal), Op::Dup, Op::Call(write_line), Op::Ret],
		&[],
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let resolver = Resolver::build(&[animal, dog]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	match outcome {
		Outcome::Returned(Value::String(s)) => assert_eq!(&*s, "Woof"),
		other => panic!("expected a returned string, got {other:?}"),
	}
}

#[test]
fn array_elements_sum_to_60() {
	let arena = Arena::new();
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::Int32]), None, false);
	let locals = arena.alloc_slice(&[ValueKind::Array]);

	// var arr = new int[3] { 10, 20, 30 }; return arr[0] + arr[1] + arr[2];
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::Int32),
		false,
		vec![
			Op::LdcI4(3),
			Op::NewArr(ValueKind::Int32),
			Op::StLoc(0),
			Op::LdLoc(0),
			Op::LdcI4(0),
			Op::LdcI4(10),
			Op::StElem(ValueKind::Int32),
			Op::LdLoc(0),
			Op::LdcI4(1),
			Op::LdcI4(20),
			Op::StElem(ValueKind::Int32),
			Op::LdLoc(0),
			Op::LdcI4(2),
			Op::LdcI4(30),
			Op::StElem(ValueKind::Int32),
			Op::LdLoc(0),
			Op::LdcI4(0),
			Op::LdElem(ValueKind::Int32),
			Op::LdLoc(0),
			Op::LdcI4(1),
			Op::LdElem(ValueKind::Int32),
			Op::Add,
			Op::LdLoc(0),
			Op::LdcI4(2),
			Op::LdElem(ValueKind::Int32),
			Op::Add,
			Op::Dup,
			Op::Call(write_line),
			Op::Ret,
		],
		locals,
		vec![],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let well_known = WellKnownTypes::new(&arena);
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	assert!(matches!(outcome, Outcome::Returned(Value::Int32(60))));
}

#[test]
fn catch_region_recovers_from_divide_by_zero() {
	let arena = Arena::new();
	let well_known = WellKnownTypes::new(&arena);
	let write_line = internal_method(&arena, "WriteLine", arena.alloc_slice(&[ValueKind::String]), None, false);

	let arithmetic_exception = arena.alloc(TypeDesc {
		name: "ArithmeticException",
		namespace: "System",
		is_interface: false,
		is_value_type: false,
		assembly: "test",
		fields: Cell::new(&[]),
		methods: Cell::new(&[]),
		base: Cell::new(None),
	});
	let message_field = well_known.exception.field("_message").expect("well-known Exception carries _message");

	// try { int x = 10 / 0; } catch (ArithmeticException e) { return e.Message; }
	let main = method_with_body(
		&arena,
		"Main",
		None,
		&[],
		Some(ValueKind::String),
		false,
		vec![
			/* 0 */ Op::LdcI4(10),
			/* 1 */ Op::LdcI4(0),
			/* 2 */ Op::Div,
			/* 3 */ Op::Leave(8),
			/* 4 */ Op::LdFld(message_field),
			/* 5 */ Op::Dup,
			/* 6 */ Op::Call(write_line),
			/* 7 */ Op::Ret,
		],
		&[],
		vec![ExceptionRegion { kind: ExceptionRegionKind::Catch, try_start: 0, try_end: 4, handler_start: 4, handler_end: 8, catch_type: Some(arithmetic_exception) }],
	);

	let mut heap = Heap::new();
	let mut statics = StaticFields::new();
	let internals = InternalRegistry::new();
	let resolver = Resolver::build(&[]);

	let outcome = run(&mut heap, &mut statics, &resolver, &internals, &well_known, main, vec![]).unwrap();
	match outcome {
		Outcome::Returned(Value::String(s)) => assert_eq!(&*s, "Attempted to divide by zero."),
		other => panic!("expected a returned string, got {other:?}"),
	}
}
