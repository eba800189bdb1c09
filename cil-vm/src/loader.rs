//! Bridges a parsed [`cil_meta::Assembly`] into the interpreter's own owned descriptors.
//!
//! `cil-meta`'s schema types are an arena-bound reader's *output*; nothing here mutates them.
//! Everything downstream of `load` only ever sees the descriptors produced below.

use std::cell::Cell;

use fxhash::FxHashMap;

use cil_meta::raw::il::{CompoundOpCode, OpCode, OpCodeIterator};
use cil_meta::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};
use cil_meta::schema::method::ExceptionRegionKind as MetaRegionKind;
use cil_meta::schema::r#type::{Type, TypeKind};
use cil_meta::Assembly;

use crate::descriptors::{Arena, ExceptionRegion, ExceptionRegionKind, FieldDesc, Instruction, MethodBody, MethodDesc, Op, TypeDesc};
use crate::errors::ClrError;
use crate::internals::WellKnownTypes;
use crate::value::ValueKind;

/// Everything produced from one or more loaded assemblies: the interned type/method/field
/// descriptors the interpreter dispatches against, plus the entry point if one was found.
pub struct LoadedProgram<'l> {
	pub types: Vec<&'l TypeDesc<'l>>,
	pub entry_point: Option<&'l MethodDesc<'l>>,
}

/// Translates every type in `assembly` into the owned descriptor representation, decoding
/// each method's IL into a pre-resolved [`Op`] sequence in the same pass.
///
/// `known_types` are every type already loaded from an earlier assembly in this run (§4.4):
/// a `call`/`callvirt`/`newobj` target encoded as a `MemberRef` is resolved against them before
/// falling back to the internal-method registry, so a real cross-assembly call binds to the
/// actual loaded method when one exists.
pub fn load<'l>(
	arena: &Arena<'l>,
	assembly: &Assembly,
	assembly_name: &'l str,
	well_known: &WellKnownTypes<'l>,
	known_types: &[&'l TypeDesc<'l>],
) -> Result<LoadedProgram<'l>, ClrError> {
	let source_types = assembly.types();

	// Pass 1: allocate every TypeDesc/FieldDesc up front so method bodies can reference
	// sibling types (field/call targets) regardless of declaration order.
	let mut type_map: FxHashMap<*const Type<'l>, &'l TypeDesc<'l>> = FxHashMap::default();
	let mut type_by_token: FxHashMap<MetadataToken, &'l TypeDesc<'l>> = FxHashMap::default();
	for ty in source_types {
		let desc = arena.alloc(TypeDesc {
			name: arena.alloc_str(ty.name()),
			namespace: arena.alloc_str(ty.namespace()),
			is_interface: ty.is_interface(),
			is_value_type: ty.is_value_type(),
			assembly: assembly_name,
			fields: Cell::new(&[]),
			methods: Cell::new(&[]),
			base: Cell::new(None),
		});
		type_map.insert(*ty as *const Type, desc);
		if let Some(token) = ty.metadata_token() {
			type_by_token.insert(token, desc);
		}
	}

	let mut field_map: FxHashMap<MetadataToken, &'l FieldDesc<'l>> = FxHashMap::default();
	for ty in source_types {
		let desc = type_map[&(*ty as *const Type)];
		let mut fields = Vec::with_capacity(ty.fields().len());
		for (ordinal, field) in ty.fields().iter().enumerate() {
			let field_desc = arena.alloc(FieldDesc {
				name: arena.alloc_str(field.name()),
				ordinal,
				kind: type_to_kind(field.ty()),
				class: Some(desc),
				declaring_type: Cell::new(Some(desc)),
				is_static: field.is_static(),
			});
			field_map.insert(field.metadata_token(), field_desc);
			fields.push(field_desc);
		}
		desc.fields.set(arena.alloc_slice_from_iter(fields));
	}

	// Pass 2: MethodDesc shells, so call targets within any method body can resolve forward
	// and backward references across the whole assembly.
	let mut method_map: FxHashMap<MetadataToken, &'l MethodDesc<'l>> = FxHashMap::default();
	let mut methods_by_type: FxHashMap<*const Type<'l>, Vec<&'l MethodDesc<'l>>> = FxHashMap::default();
	for method in assembly.methods() {
		let declaring = method.declaring_type().map(|t| type_map[&(t as *const Type)]);
		let desc = arena.alloc(MethodDesc {
			name: arena.alloc_str(method.name()),
			declaring_type: Cell::new(declaring),
			param_kinds: arena.alloc_slice(&vec![ValueKind::Object; method.parameter_count()]),
			return_kind: method.has_return_value().then_some(ValueKind::Object),
			has_this: method.has_this(),
			is_static: method.is_static(),
			rva: method.rva(),
			is_internal_call: method.is_internal_call(),
			is_implemented_by_runtime: method.is_implemented_by_runtime(),
			body: Cell::new(None),
		});
		let token: MetadataToken = method.metadata_token().into();
		method_map.insert(token, desc);
		if let Some(ty) = method.declaring_type() {
			methods_by_type.entry(ty as *const Type).or_default().push(desc);
		}
	}
	for ty in source_types {
		let desc = type_map[&(*ty as *const Type)];
		if let Some(methods) = methods_by_type.remove(&(*ty as *const Type)) {
			desc.methods.set(arena.alloc_slice_from_iter(methods));
		}
	}

	// Pass 3: decode each method's IL now that every token it might reference resolves.
	// `synthetic_types` caches the field-less type stand-ins minted for `MemberRef` targets
	// whose declaring type matches neither a loaded type nor a well-known one (e.g. `Int32`),
	// so repeated references to the same external type share one descriptor.
	let mut synthetic_types: FxHashMap<(String, String), &'l TypeDesc<'l>> = FxHashMap::default();
	for method in assembly.methods() {
		let Some(raw_body) = method.body() else { continue };
		let token: MetadataToken = method.metadata_token().into();
		let desc = method_map[&token];
		let body = decode_body(
			arena,
			assembly,
			raw_body,
			&method_map,
			&field_map,
			&type_map,
			&type_by_token,
			well_known,
			known_types,
			&mut synthetic_types,
		)?;
		desc.body.set(Some(arena.alloc(body)));
	}

	let types: Vec<&'l TypeDesc<'l>> = source_types.iter().map(|t| type_map[&(*t as *const Type)]).collect();
	let entry_point = assembly.methods().iter().find(|m| m.name() == "Main" && m.is_static()).and_then(|m| {
		let token: MetadataToken = m.metadata_token().into();
		method_map.get(&token).copied()
	});

	Ok(LoadedProgram { types, entry_point })
}

fn type_to_kind(ty: &Type) -> ValueKind {
	match (ty.namespace(), ty.name()) {
		("System", "Int32") | ("System", "UInt32") => ValueKind::Int32,
		("System", "Int64") | ("System", "UInt64") => ValueKind::Int64,
		("System", "Single") | ("System", "Float") => ValueKind::Float32,
		("System", "Double") => ValueKind::Float64,
		("System", "Boolean") => ValueKind::Boolean,
		("System", "String") => ValueKind::String,
		("System", "IntPtr") => ValueKind::IntPtr,
		_ if ty.kind() == TypeKind::Array => ValueKind::Array,
		_ => ValueKind::Object,
	}
}

struct RawInstr<'c> {
	offset: u32,
	end: u32,
	op: OpCode<'c>,
}

fn decode_body<'l>(
	arena: &Arena<'l>,
	assembly: &Assembly,
	raw_body: &cil_meta::schema::method::MethodBody<'l>,
	methods: &FxHashMap<MetadataToken, &'l MethodDesc<'l>>,
	fields: &FxHashMap<MetadataToken, &'l FieldDesc<'l>>,
	types: &FxHashMap<*const Type<'l>, &'l TypeDesc<'l>>,
	type_by_token: &FxHashMap<MetadataToken, &'l TypeDesc<'l>>,
	well_known: &WellKnownTypes<'l>,
	known_types: &[&'l TypeDesc<'l>],
	synthetic_types: &mut FxHashMap<(String, String), &'l TypeDesc<'l>>,
) -> Result<MethodBody<'l>, ClrError> {
	// The raw opcode stream only needs to live for this decode pass: every `Op` produced
	// below stores resolved indices/descriptors, never a borrow into `raw_body.code`.
	let code: &[u8] = &raw_body.code;

	let mut raw_instrs = Vec::new();
	for (offset, opcode) in OpCodeIterator::new(code) {
		let opcode = opcode.map_err(|e| ClrError::Internal(format!("malformed IL: {e}")))?;
		raw_instrs.push((offset as u32, opcode));
	}
	let mut instrs = Vec::with_capacity(raw_instrs.len());
	for (i, (offset, op)) in raw_instrs.iter().enumerate() {
		let end = raw_instrs.get(i + 1).map(|(next, _)| *next).unwrap_or(code.len() as u32);
		instrs.push(RawInstr { offset: *offset, end, op: op.clone() });
	}

	let offset_to_index = |target: i64, instrs: &[RawInstr]| -> Result<u32, ClrError> {
		instrs
			.iter()
			.position(|i| i.offset as i64 == target)
			.map(|i| i as u32)
			.ok_or_else(|| ClrError::Internal(format!("branch target {target} does not land on an instruction boundary")))
	};

	let mut ops = Vec::with_capacity(instrs.len());
	for instr in &instrs {
		let branch_target = |rel: i64| offset_to_index(instr.end as i64 + rel, &instrs);
		let op = translate_opcode(
			arena,
			assembly,
			&instr.op,
			branch_target,
			methods,
			fields,
			types,
			type_by_token,
			well_known,
			known_types,
			synthetic_types,
		)?;
		ops.push(Instruction { op, position: instr.offset });
	}

	let mut exception_regions = Vec::with_capacity(raw_body.exception_regions.len());
	for region in raw_body.exception_regions {
		let kind = match region.kind {
			MetaRegionKind::Catch => ExceptionRegionKind::Catch,
			MetaRegionKind::Finally => ExceptionRegionKind::Finally,
			MetaRegionKind::Fault => ExceptionRegionKind::Fault,
			// Filters aren't modelled by the interpreter's exception-region kind; skip them.
			MetaRegionKind::Filter => continue,
		};
		let catch_type = region.catch_type.and_then(|t| types.get(&(t as *const Type)).copied());
		exception_regions.push(ExceptionRegion {
			kind,
			try_start: offset_to_index(region.try_offset as i64, &instrs)?,
			try_end: offset_to_index((region.try_offset + region.try_length) as i64, &instrs)?,
			handler_start: offset_to_index(region.handler_offset as i64, &instrs)?,
			handler_end: offset_to_index((region.handler_offset + region.handler_length) as i64, &instrs)?,
			catch_type,
		});
	}

	let locals: Vec<ValueKind> = raw_body.locals.iter().map(|t| type_to_kind(t)).collect();

	Ok(MethodBody {
		max_stack_size: raw_body.max_stack_size,
		locals: arena.alloc_slice(&locals),
		instructions: arena.alloc_slice_from_iter(ops),
		exception_regions: arena.alloc_slice_from_iter(exception_regions),
	})
}

/// Resolves a `call`/`callvirt`/`newobj`/`ldftn`/`ldvirtftn` operand to a method descriptor.
///
/// A `MethodDef` token resolves directly out of `methods`. A `MemberRef` token (the normal
/// encoding for a call into another assembly, e.g. `System.Console.WriteLine`) is resolved by
/// declaring-type namespace, simple name, and parameter count against every type already loaded
/// in this run (§4.4), the same name-based matching `resolver.rs::Resolver` uses for virtual
/// redirection; failing that, it falls back to a synthetic internal-call descriptor routed
/// through the internal-method registry by canonical name (§4.6).
fn resolve_call_target<'l>(
	arena: &Arena<'l>,
	assembly: &Assembly,
	token: MetadataToken,
	methods: &FxHashMap<MetadataToken, &'l MethodDesc<'l>>,
	well_known: &WellKnownTypes<'l>,
	known_types: &[&'l TypeDesc<'l>],
	synthetic_types: &mut FxHashMap<(String, String), &'l TypeDesc<'l>>,
) -> Result<&'l MethodDesc<'l>, ClrError> {
	if let Some(desc) = methods.get(&token) {
		return Ok(*desc);
	}
	if token.kind() != MetadataTokenKind::MemberRef {
		return Err(ClrError::Internal(format!("unresolved method token {token:?}")));
	}
	let member = assembly
		.member_ref(token)
		.ok_or_else(|| ClrError::Internal(format!("unresolved method token {token:?}")))?;

	for ty in known_types {
		if ty.namespace() != member.declaring_namespace || ty.name() != member.declaring_name {
			continue;
		}
		if let Some(found) = ty.methods().iter().find(|m| m.name() == member.name && m.parameter_count() == member.parameter_count) {
			return Ok(*found);
		}
	}

	let declaring = well_known_type_named(well_known, member.declaring_namespace, member.declaring_name)
		.or_else(|| synthetic_types.get(&(member.declaring_namespace.to_string(), member.declaring_name.to_string())).copied())
		.unwrap_or_else(|| {
			let ty = arena.alloc(TypeDesc {
				name: arena.alloc_str(member.declaring_name),
				namespace: arena.alloc_str(member.declaring_namespace),
				is_interface: false,
				is_value_type: false,
				assembly: arena.alloc_str("mscorlib"),
				fields: Cell::new(&[]),
				methods: Cell::new(&[]),
				base: Cell::new(None),
			});
			synthetic_types.insert((member.declaring_namespace.to_string(), member.declaring_name.to_string()), ty);
			ty
		});

	Ok(arena.alloc(MethodDesc {
		name: arena.alloc_str(member.name),
		declaring_type: Cell::new(Some(declaring)),
		param_kinds: arena.alloc_slice(&vec![ValueKind::Object; member.parameter_count]),
		return_kind: member.has_return_value.then_some(ValueKind::Object),
		has_this: member.has_this,
		is_static: !member.has_this,
		rva: 0,
		is_internal_call: true,
		is_implemented_by_runtime: false,
		body: Cell::new(None),
	}))
}

/// Matches a `MemberRef`'s declaring type against the six base types synthesized up front
/// ([`WellKnownTypes`]), so a resolved constructor/method shares their exact identity instead of
/// a fresh field-less stand-in -- load-bearing for `newobj` targets like `System.Exception`,
/// whose internal `.ctor` callback expects the `_message` field `WellKnownTypes` pre-populates.
fn well_known_type_named<'l>(well_known: &WellKnownTypes<'l>, namespace: &str, name: &str) -> Option<&'l TypeDesc<'l>> {
	if namespace != "System" {
		return None;
	}
	[well_known.object, well_known.string, well_known.exception, well_known.type_, well_known.runtime_type_handle, well_known.int_ptr]
		.into_iter()
		.find(|t| t.name() == name)
}

fn resolve_field<'l>(token: MetadataToken, fields: &FxHashMap<MetadataToken, &'l FieldDesc<'l>>) -> Result<&'l FieldDesc<'l>, ClrError> {
	fields.get(&token).copied().ok_or_else(|| ClrError::Internal(format!("unresolved field token {token:?}")))
}

/// Translates one raw opcode into the interpreter's pre-decoded form. `branch_target` resolves
/// a relative branch operand (already added to the *end* of this instruction, per §4.5's
/// byte-offset-to-instruction-index convention) to an instruction index.
fn translate_opcode<'l, 'c>(
	arena: &Arena<'l>,
	assembly: &Assembly,
	op: &OpCode<'c>,
	branch_target: impl Fn(i64) -> Result<u32, ClrError>,
	methods: &FxHashMap<MetadataToken, &'l MethodDesc<'l>>,
	fields: &FxHashMap<MetadataToken, &'l FieldDesc<'l>>,
	types: &FxHashMap<*const Type<'l>, &'l TypeDesc<'l>>,
	type_by_token: &FxHashMap<MetadataToken, &'l TypeDesc<'l>>,
	well_known: &WellKnownTypes<'l>,
	known_types: &[&'l TypeDesc<'l>],
	synthetic_types: &mut FxHashMap<(String, String), &'l TypeDesc<'l>>,
) -> Result<Op<'l>, ClrError> {
	use OpCode::*;

	Ok(match op {
		nop => Op::Nop,
		dup => Op::Dup,
		pop => Op::Pop,

		ldnull => Op::LdNull,
		ldc_i4_m1 => Op::LdcI4(-1),
		ldc_i4_0 => Op::LdcI4(0),
		ldc_i4_1 => Op::LdcI4(1),
		ldc_i4_2 => Op::LdcI4(2),
		ldc_i4_3 => Op::LdcI4(3),
		ldc_i4_4 => Op::LdcI4(4),
		ldc_i4_5 => Op::LdcI4(5),
		ldc_i4_6 => Op::LdcI4(6),
		ldc_i4_7 => Op::LdcI4(7),
		ldc_i4_8 => Op::LdcI4(8),
		ldc_i4_s(v) => Op::LdcI4(*v as i8 as i32),
		ldc_i4(v) => Op::LdcI4(*v),
		ldc_i8(v) => Op::LdcI8(*v),
		ldc_r4(v) => Op::LdcR4(*v),
		ldc_r8(v) => Op::LdcR8(*v),

		ldarg_0 => Op::LdArg(0),
		ldarg_1 => Op::LdArg(1),
		ldarg_2 => Op::LdArg(2),
		ldarg_3 => Op::LdArg(3),
		ldarg_s(i) => Op::LdArg(*i as u16),
		ldarga_s(i) => Op::LdArgA(*i as u16),
		starg_s(i) => Op::StArg(*i as u16),
		ldloc_0 => Op::LdLoc(0),
		ldloc_1 => Op::LdLoc(1),
		ldloc_2 => Op::LdLoc(2),
		ldloc_3 => Op::LdLoc(3),
		ldloc_s(i) => Op::LdLoc(*i as u16),
		ldloca_s(i) => Op::LdLocA(*i as u16),
		stloc_0 => Op::StLoc(0),
		stloc_1 => Op::StLoc(1),
		stloc_2 => Op::StLoc(2),
		stloc_3 => Op::StLoc(3),
		stloc_s(i) => Op::StLoc(*i as u16),

		add => Op::Add,
		sub => Op::Sub,
		mul => Op::Mul,
		div => Op::Div,
		div_un => Op::DivUn,
		rem => Op::Rem,
		rem_un => Op::RemUn,
		neg => Op::Neg,
		and => Op::And,
		or => Op::Or,
		xor => Op::Xor,
		not => Op::Not,
		shl => Op::Shl,
		shr => Op::Shr,
		shr_un => Op::ShrUn,

		conv_i1 => Op::ConvI1,
		conv_i2 => Op::ConvI2,
		conv_i4 => Op::ConvI4,
		conv_i8 => Op::ConvI8,
		conv_u1 => Op::ConvU1,
		conv_u2 => Op::ConvU2,
		conv_u4 => Op::ConvU4,
		conv_u8 => Op::ConvU8,
		conv_r4 => Op::ConvR4,
		conv_r8 => Op::ConvR8,
		conv_r_un => Op::ConvRUn,
		conv_i => Op::ConvI8,
		conv_u => Op::ConvU8,

		br_s(rel) => Op::Br(branch_target(*rel as i64)?),
		brfalse_s(rel) => Op::BrFalse(branch_target(*rel as i64)?),
		brtrue_s(rel) => Op::BrTrue(branch_target(*rel as i64)?),
		beq_s(rel) => Op::Beq(branch_target(*rel as i64)?),
		bge_s(rel) => Op::Bge(branch_target(*rel as i64)?),
		bgt_s(rel) => Op::Bgt(branch_target(*rel as i64)?),
		ble_s(rel) => Op::Ble(branch_target(*rel as i64)?),
		blt_s(rel) => Op::Blt(branch_target(*rel as i64)?),
		bne_un_s(rel) => Op::BneUn(branch_target(*rel as i64)?),
		bge_un_s(rel) => Op::BgeUn(branch_target(*rel as i64)?),
		bgt_un_s(rel) => Op::BgtUn(branch_target(*rel as i64)?),
		ble_un_s(rel) => Op::BleUn(branch_target(*rel as i64)?),
		blt_un_s(rel) => Op::BltUn(branch_target(*rel as i64)?),
		br(rel) => Op::Br(branch_target(*rel as i64)?),
		brfalse(rel) => Op::BrFalse(branch_target(*rel as i64)?),
		brtrue(rel) => Op::BrTrue(branch_target(*rel as i64)?),
		beq(rel) => Op::Beq(branch_target(*rel as i64)?),
		bge(rel) => Op::Bge(branch_target(*rel as i64)?),
		bgt(rel) => Op::Bgt(branch_target(*rel as i64)?),
		ble(rel) => Op::Ble(branch_target(*rel as i64)?),
		blt(rel) => Op::Blt(branch_target(*rel as i64)?),
		bne_un(rel) => Op::BneUn(branch_target(*rel as i64)?),
		bge_un(rel) => Op::BgeUn(branch_target(*rel as i64)?),
		bgt_un(rel) => Op::BgtUn(branch_target(*rel as i64)?),
		ble_un(rel) => Op::BleUn(branch_target(*rel as i64)?),
		blt_un(rel) => Op::BltUn(branch_target(*rel as i64)?),
		switch(table) => {
			let targets: Vec<u32> = table.variants().map(|rel| branch_target(rel as i64)).collect::<Result<_, _>>()?;
			Op::Switch(arena.alloc_slice(&targets))
		}

		ldind_i1 | ldind_u1 => Op::LdInd(ValueKind::Int32),
		ldind_i2 | ldind_u2 => Op::LdInd(ValueKind::Int32),
		ldind_i4 | ldind_u4 => Op::LdInd(ValueKind::Int32),
		ldind_i8 | ldind_i => Op::LdInd(ValueKind::Int64),
		ldind_r4 => Op::LdInd(ValueKind::Float32),
		ldind_r8 => Op::LdInd(ValueKind::Float64),
		ldind_ref => Op::LdInd(ValueKind::Object),
		stind_ref => Op::StInd(ValueKind::Object),
		stind_i1 | stind_i2 | stind_i4 | stind_i => Op::StInd(ValueKind::Int32),
		stind_i8 => Op::StInd(ValueKind::Int64),
		stind_r4 => Op::StInd(ValueKind::Float32),
		stind_r8 => Op::StInd(ValueKind::Float64),

		ldfld(token) => Op::LdFld(resolve_field(*token, fields)?),
		ldflda(token) => Op::LdFld(resolve_field(*token, fields)?),
		stfld(token) => Op::StFld(resolve_field(*token, fields)?),
		ldsfld(token) => Op::LdSFld(resolve_field(*token, fields)?),
		ldsflda(token) => Op::LdSFld(resolve_field(*token, fields)?),
		stsfld(token) => Op::StSFld(resolve_field(*token, fields)?),

		newarr(_) => Op::NewArr(ValueKind::Object),
		ldlen => Op::LdLen,
		ldelem_i1 | ldelem_u1 | ldelem_i2 | ldelem_u2 | ldelem_i4 | ldelem_u4 => Op::LdElem(ValueKind::Int32),
		ldelem_i8 | ldelem_i => Op::LdElem(ValueKind::Int64),
		ldelem_r4 => Op::LdElem(ValueKind::Float32),
		ldelem_r8 => Op::LdElem(ValueKind::Float64),
		ldelem_ref => Op::LdElem(ValueKind::Object),
		ldelem(_) => Op::LdElem(ValueKind::Object),
		stelem_i | stelem_i1 | stelem_i2 | stelem_i4 => Op::StElem(ValueKind::Int32),
		stelem_i8 => Op::StElem(ValueKind::Int64),
		stelem_r4 => Op::StElem(ValueKind::Float32),
		stelem_r8 => Op::StElem(ValueKind::Float64),
		stelem_ref => Op::StElem(ValueKind::Object),
		stelem(_) => Op::StElem(ValueKind::Object),
		ldelema(_) => Op::LdElem(ValueKind::Object),

		call(token) => Op::Call(resolve_call_target(arena, assembly, *token, methods, well_known, known_types, synthetic_types)?),
		callvirt(token) => Op::CallVirt(resolve_call_target(arena, assembly, *token, methods, well_known, known_types, synthetic_types)?),
		newobj(token) => Op::NewObj(resolve_call_target(arena, assembly, *token, methods, well_known, known_types, synthetic_types)?),
		ret => Op::Ret,

		ldstr(token) => {
			let text = assembly.user_string(*token).unwrap_or_default();
			Op::LdStr(arena.alloc_str(&text))
		}

		throw => Op::Throw,
		leave(rel) => Op::Leave(branch_target(*rel as i64)?),
		leave_s(rel) => Op::Leave(branch_target(*rel as i64)?),

		box_val(_) => Op::Box,
		unbox(_) => Op::Unbox,
		unbox_any(_) => Op::UnboxAny,
		ldobj(_) => Op::LdObj,
		stobj(_) => Op::StObj,
		cpobj(_) => Op::CpObj,

		compound(c) => match c {
			CompoundOpCode::ceq => Op::Ceq,
			CompoundOpCode::cgt => Op::Cgt,
			CompoundOpCode::cgt_un => Op::CgtUn,
			CompoundOpCode::clt => Op::Clt,
			CompoundOpCode::clt_un => Op::CltUn,
			CompoundOpCode::ldarg(i) => Op::LdArg(*i),
			CompoundOpCode::ldarga(i) => Op::LdArgA(*i),
			CompoundOpCode::starg(i) => Op::StArg(*i),
			CompoundOpCode::ldloc(i) => Op::LdLoc(*i),
			CompoundOpCode::ldloca(i) => Op::LdLocA(*i),
			CompoundOpCode::stloc(i) => Op::StLoc(*i),
			CompoundOpCode::endfinally => Op::EndFinally,
			CompoundOpCode::initobj(_) => Op::InitObj,
			CompoundOpCode::ldftn(token) => Op::LdFtn(resolve_call_target(arena, assembly, *token, methods, well_known, known_types, synthetic_types)?),
			CompoundOpCode::ldvirtftn(token) => Op::LdFtn(resolve_call_target(arena, assembly, *token, methods, well_known, known_types, synthetic_types)?),
			other => return Err(ClrError::Internal(format!("unsupported opcode: {other:?}"))),
		},

		ldtoken(token) => {
			let resolved = type_by_token
				.get(token)
				.copied()
				.ok_or_else(|| ClrError::Internal(format!("unresolved type token for ldtoken: {token:?}")))?;
			Op::LdToken(resolved)
		}

		other => return Err(ClrError::Internal(format!("unsupported opcode: {other:?}"))),
	})
}
