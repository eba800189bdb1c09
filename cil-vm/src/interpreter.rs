//! Opcode dispatch (§4.5): one step of the interpreter loop against a single [`Frame`].

use crate::descriptors::{ExceptionRegionKind, MethodBody, MethodDesc, Op};
use crate::errors::ClrError;
use crate::frame::Frame;
use crate::heap::Heap;
use crate::internals::{InternalRegistry, WellKnownTypes};
use crate::resolver::Resolver;
use crate::statics::StaticFields;
use crate::value::{self, ArithOp, CmpOp, Value};

/// Everything a running method body needs besides its own frame. Borrowed for the duration of
/// one `run_method` call; never retained past it (no re-entrant internal-method callback holds it).
pub struct Context<'a, 'l> {
	pub heap: &'a mut Heap<'l>,
	pub statics: &'a mut StaticFields,
	pub resolver: &'a Resolver<'l>,
	pub internals: &'a InternalRegistry<'l>,
	pub well_known: &'a WellKnownTypes<'l>,
	pub running: &'a mut bool,
}

/// What happened at the end of a method's interpreter loop.
pub enum Outcome {
	Returned(Value),
	/// Cooperative cancellation observed mid-frame (§5): every enclosing frame also unwinds.
	Cancelled,
}

/// The result of executing a single instruction.
enum StepOutcome {
	/// Fall through to the next instruction in sequence.
	Continue,
	/// Branch/leave/switch: resume at this (already-resolved) instruction index.
	Jump(u32),
	/// The frame is finished (`ret` or cooperative cancellation).
	Done(Outcome),
}

/// Runs `method`'s body to completion, recursing into `call`/`callvirt`/`newobj` targets.
pub fn run_method<'l>(ctx: &mut Context<'_, 'l>, method: &'l MethodDesc<'l>, params: Vec<Value>) -> Result<Outcome, ClrError> {
	if method.is_internal_call() || method.is_implemented_by_runtime() {
		let name = method.internal_name();
		let result = ctx.internals.invoke(&name, ctx.heap, ctx.well_known, method, &params)?;
		return Ok(Outcome::Returned(result));
	}

	let body = method.body().ok_or_else(|| ClrError::Internal(format!("method '{}' has no body", method.name())))?;
	let mut frame = Frame::new(method, params, body.locals.len());

	loop {
		if !*ctx.running {
			return Ok(Outcome::Cancelled);
		}

		let Some(instr) = body.instructions.get(frame.pc as usize) else {
			return Err(ClrError::Internal(format!("fell off the end of '{}'", method.name())));
		};

		match step(ctx, &mut frame, &instr.op) {
			Ok(StepOutcome::Continue) => frame.pc += 1,
			Ok(StepOutcome::Jump(target)) => frame.pc = target,
			Ok(StepOutcome::Done(outcome)) => return Ok(outcome),
			Err(e) if e.is_catchable() => {
				let kind = e.kind().to_string();
				let message = e.to_string();
				match unwind(&mut frame, body, &kind, &message, ctx)? {
					Some(next_pc) => frame.pc = next_pc,
					None => return Err(e),
				}
			}
			Err(other) => return Err(other),
		}
	}
}

/// Finds the innermost enclosing `catch` region whose type matches (by simple name) and resumes
/// there with a fresh, cleared stack holding only the exception object (§4.5).
fn unwind<'l>(frame: &mut Frame<'l>, body: &MethodBody<'l>, kind: &str, message: &str, ctx: &mut Context<'_, 'l>) -> Result<Option<u32>, ClrError> {
	for region in body.exception_regions {
		if region.kind != ExceptionRegionKind::Catch {
			continue;
		}
		if frame.pc < region.try_start || frame.pc >= region.try_end {
			continue;
		}
		let matches = match region.catch_type {
			Some(catch_type) => catch_type.name() == kind,
			None => false,
		};
		if !matches {
			continue;
		}

		let handle = ctx.heap.alloc_object(ctx.well_known.exception);
		ctx.heap.object_mut(handle)?.set("_message", Value::String(message.to_string().into()))?;
		frame.clear_stack();
		frame.push(Value::Object(handle));
		return Ok(Some(region.handler_start));
	}
	Ok(None)
}

/// Executes one instruction.
fn step<'l>(ctx: &mut Context<'_, 'l>, frame: &mut Frame<'l>, op: &Op<'l>) -> Result<StepOutcome, ClrError> {
	match op {
		Op::Nop => {}
		Op::Dup => {
			let top = frame.peek()?.clone();
			frame.push(top);
		}
		Op::Pop => {
			frame.pop()?;
		}

		Op::LdcI4(v) => frame.push(Value::Int32(*v)),
		Op::LdcI8(v) => frame.push(Value::Int64(*v)),
		Op::LdcR4(v) => frame.push(Value::Float32(*v)),
		Op::LdcR8(v) => frame.push(Value::Float64(*v)),
		Op::LdStr(s) => frame.push(Value::String((*s).into())),
		Op::LdNull => frame.push(Value::Null),

		Op::LdLoc(i) => frame.push(frame.local(*i)?.clone()),
		Op::LdLocA(i) => frame.push(frame.local_for_address(*i)?.clone()),
		Op::StLoc(i) => {
			let v = frame.pop()?;
			frame.set_local(*i, v)?;
		}
		Op::LdArg(i) => frame.push(frame.arg(*i)?.clone()),
		Op::LdArgA(i) => frame.push(frame.arg(*i)?.clone()),
		Op::StArg(i) => {
			let v = frame.pop()?;
			frame.set_arg(*i, v)?;
		}

		Op::Add | Op::Sub | Op::Mul | Op::Div | Op::DivUn | Op::Rem | Op::RemUn => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(arith(op, &lhs, &rhs)?);
		}
		Op::Neg => {
			let v = frame.pop()?;
			frame.push(value::neg(&v)?);
		}
		Op::And | Op::Or | Op::Xor | Op::Shl | Op::Shr | Op::ShrUn => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bitwise(op, &lhs, &rhs)?);
		}
		Op::Not => {
			let v = frame.pop()?;
			frame.push(bitwise_not(&v)?);
		}

		Op::Ceq => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bool_i32(value::compare(CmpOp::Eq, &lhs, &rhs)?));
		}
		Op::Cgt => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bool_i32(value::compare(CmpOp::Gt, &lhs, &rhs)?));
		}
		Op::CgtUn => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bool_i32(value::compare_unsigned(CmpOp::Gt, &lhs, &rhs)?));
		}
		Op::Clt => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bool_i32(value::compare(CmpOp::Lt, &lhs, &rhs)?));
		}
		Op::CltUn => {
			let rhs = frame.pop()?;
			let lhs = frame.pop()?;
			frame.push(bool_i32(value::compare_unsigned(CmpOp::Lt, &lhs, &rhs)?));
		}

		Op::ConvI1 => conv_int(frame, |v| v as i8 as i32)?,
		Op::ConvI2 => conv_int(frame, |v| v as i16 as i32)?,
		Op::ConvI4 => conv_int(frame, |v| v as i32)?,
		Op::ConvU1 => conv_int(frame, |v| v as u8 as i32)?,
		Op::ConvU2 => conv_int(frame, |v| v as u16 as i32)?,
		Op::ConvU4 => conv_int(frame, |v| v as u32 as i32)?,
		Op::ConvI8 => {
			let v = frame.pop()?;
			frame.push(Value::Int64(to_i64(&v)?));
		}
		Op::ConvU8 => {
			let v = frame.pop()?;
			frame.push(Value::Int64(to_i64(&v)? as u64 as i64));
		}
		Op::ConvR4 => {
			let v = frame.pop()?;
			frame.push(Value::Float32(to_f64(&v)? as f32));
		}
		Op::ConvR8 | Op::ConvRUn => {
			let v = frame.pop()?;
			frame.push(Value::Float64(to_f64(&v)?));
		}

		Op::Br(target) => return Ok(StepOutcome::Jump(*target)),
		Op::BrTrue(target) => {
			let v = frame.pop()?;
			if v.is_truthy() {
				return Ok(StepOutcome::Jump(*target));
			}
		}
		Op::BrFalse(target) => {
			let v = frame.pop()?;
			if !v.is_truthy() {
				return Ok(StepOutcome::Jump(*target));
			}
		}
		Op::Beq(t) => return cond_branch(frame, CmpOp::Eq, false, *t),
		Op::Bge(t) => return cond_branch(frame, CmpOp::Ge, false, *t),
		Op::Bgt(t) => return cond_branch(frame, CmpOp::Gt, false, *t),
		Op::Ble(t) => return cond_branch(frame, CmpOp::Le, false, *t),
		Op::Blt(t) => return cond_branch(frame, CmpOp::Lt, false, *t),
		Op::BgeUn(t) => return cond_branch(frame, CmpOp::Ge, true, *t),
		Op::BgtUn(t) => return cond_branch(frame, CmpOp::Gt, true, *t),
		Op::BleUn(t) => return cond_branch(frame, CmpOp::Le, true, *t),
		Op::BltUn(t) => return cond_branch(frame, CmpOp::Lt, true, *t),
		Op::BneUn(t) => return cond_branch(frame, CmpOp::Ne, true, *t),
		Op::Switch(targets) => {
			let selector = frame.pop()?;
			if let Value::Int32(i) = selector {
				if let Ok(idx) = usize::try_from(i) {
					if let Some(target) = targets.get(idx) {
						return Ok(StepOutcome::Jump(*target));
					}
				}
			}
		}

		Op::LdFld(field) => {
			let Value::Object(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			frame.push(ctx.heap.object(handle)?.get(field.name())?.clone());
		}
		Op::StFld(field) => {
			let value = frame.pop()?;
			let Value::Object(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			ctx.heap.object_mut(handle)?.set(field.name(), value)?;
		}
		Op::LdSFld(field) => {
			let declaring = field.declaring_type().map(|t| t.full_name()).unwrap_or_default();
			frame.push(ctx.statics.load(&declaring, field.name(), field.kind()));
		}
		Op::StSFld(field) => {
			let value = frame.pop()?;
			let declaring = field.declaring_type().map(|t| t.full_name()).unwrap_or_default();
			ctx.statics.store(&declaring, field.name(), value);
		}

		Op::NewArr(element_kind) => {
			let len = frame.pop()?;
			let Value::Int32(len) = len else {
				return Err(ClrError::Internal("newarr expects an Int32 length".into()));
			};
			let handle = ctx.heap.alloc_array(len.max(0) as usize, *element_kind);
			frame.push(Value::Array(handle));
		}
		Op::LdLen => {
			let Value::Array(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			frame.push(Value::Int32(ctx.heap.array(handle)?.len() as i32));
		}
		Op::LdElem(_) => {
			let Value::Int32(index) = frame.pop()? else {
				return Err(ClrError::Internal("ldelem expects an Int32 index".into()));
			};
			let Value::Array(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			frame.push(ctx.heap.array(handle)?.get(index)?.clone());
		}
		Op::StElem(_) => {
			let value = frame.pop()?;
			let Value::Int32(index) = frame.pop()? else {
				return Err(ClrError::Internal("stelem expects an Int32 index".into()));
			};
			let Value::Array(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			ctx.heap.array_mut(handle)?.set(index, value)?;
		}

		Op::Call(target) => return dispatch_call(ctx, frame, target, false),
		Op::CallVirt(target) => return dispatch_call(ctx, frame, target, true),
		Op::NewObj(ctor) => return dispatch_newobj(ctx, frame, ctor),
		Op::Ret => {
			let value = match frame.method.has_return_value() {
				true => frame.pop()?,
				false => Value::None,
			};
			return Ok(StepOutcome::Done(Outcome::Returned(value)));
		}
		Op::LdFtn(target) => {
			let handle = ctx.heap.alloc_object(ctx.well_known.int_ptr);
			ctx.heap.object_mut(handle)?.set("PtrToMethod", Value::MethodPtr(method_handle(*target)))?;
			frame.push(Value::Object(handle));
		}

		Op::LdToken(ty) => {
			let handle = ctx.heap.alloc_object(ctx.well_known.runtime_type_handle);
			ctx.heap.object_mut(handle)?.set("_name", Value::String(ty.name().into()))?;
			ctx.heap.object_mut(handle)?.set("_namespace", Value::String(ty.namespace().into()))?;
			frame.push(Value::Object(handle));
		}

		Op::Throw => {
			let Value::Object(handle) = frame.pop()? else {
				return Err(ClrError::NullReference);
			};
			let obj = ctx.heap.object(handle)?;
			let kind = obj.ty.name().to_string();
			let message = match obj.get("_message") {
				Ok(Value::String(s)) => s.to_string(),
				_ => String::new(),
			};
			return Err(ClrError::Unhandled { kind, message });
		}
		Op::Leave(target) => {
			frame.clear_stack();
			return Ok(StepOutcome::Jump(*target));
		}
		Op::EndFinally => {}

		Op::InitObj => {
			frame.pop()?;
			frame.push(Value::Null);
		}
		Op::Box | Op::Unbox | Op::UnboxAny => {
			// Value and reference kinds share the same `Value` tagging; these are no-ops (§4.5).
		}
		Op::LdObj | Op::CpObj => {
			let top = frame.peek()?.clone();
			frame.push(top);
		}
		Op::StObj => {
			frame.pop()?;
		}
		Op::LdInd(_) => {
			let top = frame.peek()?.clone();
			frame.push(top);
		}
		Op::StInd(_) => {
			let value = frame.pop()?;
			frame.pop()?;
			frame.push(value);
		}
	}

	Ok(StepOutcome::Continue)
}

fn method_handle(method: &MethodDesc) -> u32 {
	method as *const MethodDesc as usize as u32
}

fn bool_i32(b: bool) -> Value {
	Value::Int32(if b { 1 } else { 0 })
}

fn arith(op: &Op, lhs: &Value, rhs: &Value) -> Result<Value, ClrError> {
	match op {
		Op::Add => value::arith(ArithOp::Add, lhs, rhs),
		Op::Sub => value::arith(ArithOp::Sub, lhs, rhs),
		Op::Mul => value::arith(ArithOp::Mul, lhs, rhs),
		Op::Div => value::arith(ArithOp::Div, lhs, rhs),
		Op::DivUn => arith_unsigned(ArithOp::Div, lhs, rhs),
		Op::Rem => value::arith(ArithOp::Rem, lhs, rhs),
		Op::RemUn => arith_unsigned(ArithOp::Rem, lhs, rhs),
		_ => unreachable!(),
	}
}

/// `div.un`/`rem.un` reinterpret Int32/Int64 operands as unsigned before the operation.
fn arith_unsigned(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, ClrError> {
	match (lhs, rhs) {
		(Value::Int32(a), Value::Int32(b)) => {
			let (a, b) = (*a as u32, *b as u32);
			if b == 0 {
				return Err(ClrError::ArithmeticError("Attempted to divide by zero.".into()));
			}
			Ok(Value::Int32(match op {
				ArithOp::Div => (a / b) as i32,
				ArithOp::Rem => (a % b) as i32,
				_ => unreachable!(),
			}))
		}
		(Value::Int64(a), Value::Int64(b)) => {
			let (a, b) = (*a as u64, *b as u64);
			if b == 0 {
				return Err(ClrError::ArithmeticError("Attempted to divide by zero.".into()));
			}
			Ok(Value::Int64(match op {
				ArithOp::Div => (a / b) as i64,
				ArithOp::Rem => (a % b) as i64,
				_ => unreachable!(),
			}))
		}
		_ => value::arith(op, lhs, rhs),
	}
}

fn bitwise(op: &Op, lhs: &Value, rhs: &Value) -> Result<Value, ClrError> {
	match (lhs, rhs) {
		(Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(match op {
			Op::And => a & b,
			Op::Or => a | b,
			Op::Xor => a ^ b,
			Op::Shl => a.wrapping_shl(*b as u32),
			Op::Shr => a.wrapping_shr(*b as u32),
			Op::ShrUn => ((*a as u32).wrapping_shr(*b as u32)) as i32,
			_ => unreachable!(),
		})),
		(Value::Int64(a), Value::Int64(b)) => Ok(Value::Int64(match op {
			Op::And => a & b,
			Op::Or => a | b,
			Op::Xor => a ^ b,
			Op::Shl => a.wrapping_shl(*b as u32),
			Op::Shr => a.wrapping_shr(*b as u32),
			Op::ShrUn => ((*a as u64).wrapping_shr(*b as u32)) as i64,
			_ => unreachable!(),
		})),
		(Value::Int64(a), Value::Int32(b)) => bitwise(op, &Value::Int64(*a), &Value::Int64(*b as i64)),
		_ => Err(ClrError::Internal(format!("bitwise op requires Int32 or Int64 operands: {lhs:?} / {rhs:?}"))),
	}
}

fn bitwise_not(v: &Value) -> Result<Value, ClrError> {
	match v {
		Value::Int32(a) => Ok(Value::Int32(!a)),
		Value::Int64(a) => Ok(Value::Int64(!a)),
		_ => Err(ClrError::Internal(format!("'not' requires an Int32 or Int64 operand: {v:?}"))),
	}
}

fn to_i64(v: &Value) -> Result<i64, ClrError> {
	match v {
		Value::Int32(a) => Ok(*a as i64),
		Value::Int64(a) => Ok(*a),
		Value::Float32(a) => Ok(*a as i64),
		Value::Float64(a) => Ok(*a as i64),
		_ => Err(ClrError::Internal(format!("cannot convert {v:?} to an integer"))),
	}
}

fn to_f64(v: &Value) -> Result<f64, ClrError> {
	match v {
		Value::Int32(a) => Ok(*a as f64),
		Value::Int64(a) => Ok(*a as f64),
		Value::Float32(a) => Ok(*a as f64),
		Value::Float64(a) => Ok(*a),
		_ => Err(ClrError::Internal(format!("cannot convert {v:?} to a float"))),
	}
}

fn conv_int(frame: &mut Frame, f: impl Fn(i64) -> i32) -> Result<(), ClrError> {
	let v = frame.pop()?;
	frame.push(Value::Int32(f(to_i64(&v)?)));
	Ok(())
}

fn cond_branch(frame: &mut Frame, op: CmpOp, unsigned: bool, target: u32) -> Result<StepOutcome, ClrError> {
	let rhs = frame.pop()?;
	let lhs = frame.pop()?;
	let taken = match unsigned {
		true => value::compare_unsigned(op, &lhs, &rhs)?,
		false => value::compare(op, &lhs, &rhs)?,
	};
	Ok(match taken {
		true => StepOutcome::Jump(target),
		false => StepOutcome::Continue,
	})
}

fn dispatch_call<'l>(ctx: &mut Context<'_, 'l>, frame: &mut Frame<'l>, target: &'l MethodDesc<'l>, virtual_call: bool) -> Result<StepOutcome, ClrError> {
	let n = target.parameter_count();
	let mut params = Vec::with_capacity(n);
	for _ in 0..n {
		params.insert(0, frame.pop()?);
	}

	let mut receiver = None;
	if target.has_this() && !target.is_static() {
		receiver = Some(frame.pop()?);
	}

	if Resolver::is_object_ctor_noop(target) {
		return Ok(StepOutcome::Continue);
	}

	let resolved = match (virtual_call, &receiver) {
		(true, Some(Value::Object(handle))) => {
			let receiver_type = ctx.heap.object(*handle)?.ty;
			ctx.resolver.resolve_virtual(target, receiver_type)
		}
		_ => target,
	};

	let mut call_params = Vec::with_capacity(params.len() + 1);
	if let Some(receiver) = receiver {
		call_params.push(receiver);
	}
	call_params.extend(params);

	match run_method(ctx, resolved, call_params)? {
		Outcome::Returned(value) => {
			if resolved.has_return_value() {
				frame.push(value);
			}
			Ok(StepOutcome::Continue)
		}
		Outcome::Cancelled => Ok(StepOutcome::Done(Outcome::Cancelled)),
	}
}

fn dispatch_newobj<'l>(ctx: &mut Context<'_, 'l>, frame: &mut Frame<'l>, ctor: &'l MethodDesc<'l>) -> Result<StepOutcome, ClrError> {
	let n = ctor.parameter_count();
	let mut params = Vec::with_capacity(n);
	for _ in 0..n {
		params.insert(0, frame.pop()?);
	}

	let declaring = ctor.declaring_type().ok_or_else(|| ClrError::Internal("newobj target has no declaring type".into()))?;
	let handle = ctx.heap.alloc_object(declaring);

	if !Resolver::is_object_ctor_noop(ctor) {
		let mut call_params = Vec::with_capacity(params.len() + 1);
		call_params.push(Value::Object(handle));
		call_params.extend(params);
		run_method(ctx, ctor, call_params)?;
	}

	frame.push(Value::Object(handle));
	Ok(StepOutcome::Continue)
}
