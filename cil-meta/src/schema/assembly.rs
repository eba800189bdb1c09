use std::cell::Cell;
use std::fmt::Debug;
use std::io::{Cursor, Error, ErrorKind};
use std::path::Path;

use bumpalo::Bump;
use derivative::Derivative;

use crate::raw::assembly::Assembly as RawAssembly;
use crate::raw::FromByteStream;
use crate::raw::heaps::{BlobHeap as RawBlobHeap, StringHeap as RawStringHeap, UserStringHeap as RawUserStringHeap};
use crate::raw::heaps::table::{FieldAttributes, FieldTable, MemberRefTable, MethodDefTable, StandAloneSigTable, TableHeap, TypeAttributes, TypeDefTable, TypeRefTable};
use crate::raw::il::{CallingConvention, ExceptionClauseFlags, MethodBody as RawMethodBody, MethodSignature, OpCodeIterator, TypeSignature, TypeSignatureTag};
use crate::raw::indices::metadata_token;
use crate::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};
use crate::raw::pe::PEFile;
use crate::schema::errors::ReadError;
use crate::schema::heaps::{BlobHeap, DataPool, StringHeap};
use crate::schema::method::{ExceptionRegion, ExceptionRegionKind, Method, MethodBody};
use crate::schema::r#type::{Field, GenericTypeInstantiationError, PrimitiveType, Type, TypeData, TypeKind, TypePool};
use crate::utilities::get_string_from_heap;

/// A `MemberRef` row resolved down to the bits a caller needs to match it against a loaded
/// method: the declaring type's namespace/simple name (from its `TypeRef` or `TypeDef` target,
/// per the `class` coded index) and the member's own name and signature shape. Neither the
/// declaring type nor the member need exist in *this* assembly -- that's the point of a
/// `MemberRef` -- so this carries names, not descriptors, leaving resolution to the caller.
#[derive(Debug, Copy, Clone)]
pub struct MemberRefDesc<'l> {
	pub name: &'l str,
	pub declaring_namespace: &'l str,
	pub declaring_name: &'l str,
	pub parameter_count: usize,
	pub has_this: bool,
	pub has_return_value: bool,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Assembly<'l> {
	#[derivative(Debug="ignore")]
	data_pool: &'l DataPool<'l>,
	string_heap: StringHeap<'l>,
	method_defs: &'l [Method<'l>],
	type_defs: &'l [&'l Type<'l>],
	member_refs: &'l [MemberRefDesc<'l>],
	#[derivative(Debug="ignore")]
	user_strings: Option<&'l [u8]>,
}

impl<'l> Assembly<'l> {
	pub fn types(&self) -> &'l [&'l Type<'l>] {
		self.type_defs
	}

	pub fn methods(&self) -> &'l [Method<'l>] {
		self.method_defs
	}

	/// Decodes the `#US` (user string) heap entry a `ldstr` token points at (§3.3).
	pub fn user_string(&self, token: MetadataToken) -> Option<String> {
		let bytes = self.user_strings?;
		crate::raw::heaps::UserStringHeap::from(bytes).get(token.index())
	}

	/// Resolves a `MemberRef` token (the normal encoding for a call into another assembly, e.g.
	/// `System.Console.WriteLine`) to its declaring type's name and the member's own shape (§4.4).
	pub fn member_ref(&self, token: MetadataToken) -> Option<&'l MemberRefDesc<'l>> {
		if token.kind() != MetadataTokenKind::MemberRef {
			return None;
		}
		let member_refs: &'l [MemberRefDesc<'l>] = self.member_refs;
		member_refs.get(token.index().checked_sub(1)?)
	}
}

impl<'l> Assembly<'l> {
	#[cfg(feature = "memmap2")]
	pub fn from_path(pool: &'l DataPool<'l>, path: impl AsRef<Path>) -> Result<Self, ReadError> {
		let file = std::fs::File::open(path)?;
		let bytes = unsafe { memmap2::Mmap::map(&file) }?;
		Self::from_bytes(pool, bytes.as_ref())
	}

	#[cfg(not(feature = "memmap2"))]
	pub fn from_path(pool: &'l DataPool<'l>, path: impl AsRef<Path>) -> Result<Self, ReadError> {
		let bytes = std::fs::read(path)?;
		Self::from_bytes(pool, bytes.as_slice())
	}

	#[inline]
	pub fn from_bytes(pool: &'l DataPool<'l>, bytes: &[u8]) -> Result<Self, ReadError> {
		let mut cursor = Cursor::new(bytes);
		let pe = PEFile::read(&mut cursor, &())?;
		let raw = RawAssembly::try_from(pe)?;
		Self::from_raw_assembly(pool, &raw)
	}

	#[inline(never)]
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn from_raw_assembly(data_pool: &'l DataPool<'l>, raw: &RawAssembly) -> Result<Self, ReadError> {
		let bump = data_pool.bump();

		let tables = raw
			.metadata_root()
			.get_heap::<TableHeap>()
			.ok_or(ReadError::MissingMetadataHeap("#~"))?;

		let blobs = raw
			.metadata_root()
			.get_heap::<RawBlobHeap>()
			.ok_or(ReadError::MissingMetadataHeap("#Blob"))?;

		let strings = raw
			.metadata_root()
			.get_heap::<RawStringHeap>()
			.ok_or(ReadError::MissingMetadataHeap("#String"))?;

		// The raw `#US` heap borrows from the caller's byte buffer, which does not outlive this
		// call, so its bytes are copied into the bump arena the same way `BlobHeap`/`StringHeap`
		// intern their own entries, giving `user_strings` the `'l` lifetime `Assembly` needs.
		let user_strings: Option<&'l [u8]> = raw.metadata_root().get_heap::<RawUserStringHeap>().map(|heap| bump.alloc_slice_copy(heap.bytes()));

		let mut blob_heap = BlobHeap::new(bump);
		let mut string_heap = StringHeap::new(bump);

		let types = read_types(ReadTypesDependencies {
			pool: data_pool,
			tables,
			blobs,
			strings,
			string_heap: &mut string_heap,
		})?;

		let methods = read_methods(ReadMethodsDependencies {
			pool: data_pool,
			pe_file: raw.pe_file(),
			tables,
			blobs,
			strings,
			blob_heap: &mut blob_heap,
			string_heap: &mut string_heap,
			types,
		})?;

		let member_refs = read_member_refs(ReadMemberRefsDependencies {
			pool: data_pool,
			tables,
			blobs,
			strings,
			string_heap: &mut string_heap,
		})?;

		Ok(Self { data_pool, string_heap, method_defs: methods, type_defs: types, member_refs, user_strings })
	}
}

struct ReadTypesDependencies<'l, 'r> {
	pool: &'l DataPool<'l>,
	tables: &'r TableHeap,
	blobs: &'r RawBlobHeap,
	strings: &'r RawStringHeap,
	string_heap: &'r mut StringHeap<'l>,
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
fn read_types<'l, 'r>(
	ReadTypesDependencies {
  		pool, tables, blobs, strings, string_heap
	}: ReadTypesDependencies<'l, 'r>
) -> Result<&'l [&'l Type<'l>], ReadError> {
	let Some(type_defs) = tables.get_table::<TypeDefTable>() else {
		return Ok(&[]);
	};

	let type_defs = type_defs.rows();
	let types = pool.types().declare_types(type_defs, strings, string_heap)?;

	for i in 0..types.len() {
		let ty = &mut types[i];

		match ty.kind {
			TypeKind::Class | TypeKind::Interface => {
				ty.data.set(TypeData::Init {
					metadata_token: metadata_token::TypeDef(i + 1).into(),
					name: ty.name(),
					namespace: ty.namespace(),
					fields: &[],
					methods: &[],
					is_value_type: false,
					element_type: None,
				});
			}
			_ => unreachable!(),
		}
	}

	// This is fine, it's just the typesystem being iffy
	let types: &'l [&'l Type<'l>] = unsafe { std::mem::transmute(types) };

	if let Some(field_table) = tables.get_table::<FieldTable>() {
		let field_defs = field_table.rows();
		for (i, def) in type_defs.iter().enumerate() {
			let Some(start) = def.field_list.idx() else { continue };
			let end = match type_defs.get(i + 1).and_then(|next| next.field_list.idx()) {
				Some(end) => end,
				None => field_defs.len(),
			};

			let Some(ty) = types.get(i) else { continue };
			let slice = &field_defs[start..end.min(field_defs.len())];

			let mut fields = Vec::with_capacity(slice.len());
			for (j, field_def) in slice.iter().enumerate() {
				let name = get_string_from_heap(strings, field_def.name)?;
				let Some(sig_blob) = blobs.get(field_def.signature) else {
					return Err(ReadError::InvalidFieldSignature(field_def.signature.0));
				};

				let mut cursor = Cursor::new(sig_blob);
				let _calling_convention = CallingConvention::read(&mut cursor, &())?;
				let signature = TypeSignature::read(&mut cursor, tables.index_sizes())?;
				let field_type = resolve_type_signature(&signature, types, pool.types())?;

				fields.push(Field {
					name: string_heap.intern(name).as_str(),
					declaring_type: Cell::new(Some(*ty)),
					ty: field_type,
					is_static: field_def.flags.contains(FieldAttributes::STATIC),
					metadata_token: metadata_token::Field(start + j + 1).into(),
				});
			}

			let fields: &'l [Field<'l>] = pool.bump().alloc_slice_fill_iter(fields);
			ty.set_fields(fields);
		}
	}

	Ok(types)
}

struct ReadMethodsDependencies<'l, 'r> {
	pool: &'l DataPool<'l>,
	pe_file: &'r PEFile,
	tables: &'r TableHeap,
	blobs: &'r RawBlobHeap,
	strings: &'r RawStringHeap,
	blob_heap: &'r mut BlobHeap<'l>,
	string_heap: &'r mut StringHeap<'l>,
	types: &'l [&'l Type<'l>]
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
fn read_methods<'l, 'r>(
	ReadMethodsDependencies {
		pool, pe_file, blobs, strings, string_heap, blob_heap, tables, types, ..
	}: ReadMethodsDependencies<'l, 'r>,
) -> Result<&'l [Method<'l>], ReadError> {
	let method_defs = match tables.get_table::<MethodDefTable>() {
		None => return Ok(&[]),
		Some(fields) => fields.rows(),
	};

	let signatures = match tables.get_table::<StandAloneSigTable>() {
		Some(fields) => fields,
		None => return Err(ReadError::MissingMetadataTable("StandAloneSig")),
	};

	let mut methods = Vec::with_capacity(method_defs.len());
	for (i, def) in method_defs.iter().enumerate() {
		let name = get_string_from_heap(strings, def.name)?;
		let metadata_token = metadata_token::MethodDef(i + 1);
		let mut body = None;

		let Some(sig_blob) = blobs.get(def.signature) else {
			return Err(ReadError::InvalidMethodCode(metadata_token.into(), Error::from(ErrorKind::InvalidData)));
		};
		let mut sig_cursor = Cursor::new(sig_blob);
		let signature = MethodSignature::read(&mut sig_cursor, tables.index_sizes())?;
		let has_this = signature.calling_convention().contains(CallingConvention::HAS_THIS);
		let has_return_value = !matches!(signature.return_type().as_tags_tree(), TypeSignatureTag::Void);
		let parameter_count = signature.parameter_types().len();

		if def.rva != 0 {
			let Some((_, data, _)) = pe_file.resolve_rva(def.rva) else {
				return Err(ReadError::InvalidMethodRVA(def.rva))
			};

			let mut cursor = Cursor::new(data.as_ref());
			let raw_body = RawMethodBody::read(&mut cursor, blobs, signatures, tables.index_sizes())?;
			if let Some(err) = OpCodeIterator::new(raw_body.code).find_map(|(_, v)| v.err()) {
				return Err(ReadError::InvalidMethodCode(metadata_token.into(), err.into()));
			}

			let locals = pool.bump().alloc_slice_fill_copy(
				raw_body.locals.len(),
				pool.types().get_primitive(PrimitiveType::Void)
			);
			for (i, local_sig) in raw_body.locals.iter().enumerate() {
				locals[i] = resolve_type_signature(local_sig, types, pool.types())?;
			}

			let mut exception_regions = Vec::with_capacity(raw_body.exception_clauses.len());
			for clause in &raw_body.exception_clauses {
				let kind = if clause.flags.contains(ExceptionClauseFlags::FINALLY) {
					ExceptionRegionKind::Finally
				} else if clause.flags.contains(ExceptionClauseFlags::FAULT) {
					ExceptionRegionKind::Fault
				} else if clause.flags.contains(ExceptionClauseFlags::FILTER) {
					ExceptionRegionKind::Filter
				} else {
					ExceptionRegionKind::Catch
				};

				let mut filter_offset = None;
				let mut catch_type = None;
				match kind {
					ExceptionRegionKind::Filter => {
						filter_offset = Some(clause.class_token_or_filter_offset);
					}
					ExceptionRegionKind::Catch => {
						catch_type = MetadataToken::try_from(clause.class_token_or_filter_offset)
							.ok()
							.and_then(|token| metadata_token::TypeDef::try_from(token).ok())
							.and_then(|type_def| match type_def.0 {
								0 => None,
								n => types.get(n).copied(),
							});
					}
					_ => {}
				}

				exception_regions.push(ExceptionRegion {
					kind,
					try_offset: clause.try_offset,
					try_length: clause.try_length,
					handler_offset: clause.handler_offset,
					handler_length: clause.handler_length,
					filter_offset,
					catch_type,
				});
			}
			let exception_regions = pool.bump().alloc_slice_fill_iter(exception_regions);

			body = Some(
				MethodBody {
					max_stack_size: raw_body.max_stack_size,
					init_locals: raw_body.init_locals,
					code: blob_heap.intern(raw_body.code),
					locals,
					exception_regions,
				}
			);
		}

		methods.push(Method {
			body,
			metadata_token,
			rva: def.rva,
			flags: def.flags,
			impl_flags: def.impl_flags,
			parameter_count,
			has_return_value,
			has_this,
			declaring_type: Cell::new(None),
			name: string_heap.intern(name),
		});
	}

	let methods: &'l [Method<'l>] = pool.bump().alloc_slice_fill_iter(methods);

	if let Some(type_defs) = tables.get_table::<TypeDefTable>() {
		let type_def_rows = type_defs.rows();
		for (i, def) in type_def_rows.iter().enumerate() {
			let Some(start) = def.method_list.idx() else { continue };
			let end = match type_def_rows.get(i + 1).and_then(|next| next.method_list.idx()) {
				Some(end) => end,
				None => methods.len(),
			};

			let Some(ty) = types.get(i) else { continue };
			let slice = &methods[start..end.min(methods.len())];
			for method in slice.iter() {
				method.declaring_type.set(Some(*ty));
			}
			ty.set_methods(slice);
		}
	}

	Ok(methods)
}

struct ReadMemberRefsDependencies<'l, 'r> {
	pool: &'l DataPool<'l>,
	tables: &'r TableHeap,
	blobs: &'r RawBlobHeap,
	strings: &'r RawStringHeap,
	string_heap: &'r mut StringHeap<'l>,
}

/// Decodes the `MemberRef` table (§4.4): every row names a member of some other type, most
/// commonly one reached via a `TypeRef` (the "called into another assembly" case), occasionally
/// a `TypeDef` in this same assembly. Only the name and signature shape are needed here --
/// `loader` matches these against already-loaded methods or the internal-method registry by
/// name, so there's no need to resolve parameter types the way `read_methods` does for locals.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
fn read_member_refs<'l, 'r>(
	ReadMemberRefsDependencies { pool, tables, blobs, strings, string_heap }: ReadMemberRefsDependencies<'l, 'r>,
) -> Result<&'l [MemberRefDesc<'l>], ReadError> {
	let Some(member_refs) = tables.get_table::<MemberRefTable>() else {
		return Ok(&[]);
	};
	let type_refs = tables.get_table::<TypeRefTable>();
	let type_defs = tables.get_table::<TypeDefTable>();

	let mut out = Vec::with_capacity(member_refs.rows().len());
	for row in member_refs.rows() {
		let name = get_string_from_heap(strings, row.name)?;

		let class: MetadataToken = row.class.into();
		let (namespace, simple_name): (&str, &str) = match class.kind() {
			MetadataTokenKind::TypeRef => match type_refs.as_ref().and_then(|t| t.rows().get(class.index().wrapping_sub(1))) {
				Some(type_ref) => (get_string_from_heap(strings, type_ref.type_namespace)?, get_string_from_heap(strings, type_ref.type_name)?),
				None => ("", ""),
			},
			MetadataTokenKind::TypeDef => match type_defs.as_ref().and_then(|t| t.rows().get(class.index().wrapping_sub(1))) {
				Some(type_def) => (get_string_from_heap(strings, type_def.type_namespace)?, get_string_from_heap(strings, type_def.type_name)?),
				None => ("", ""),
			},
			// ModuleRef/MethodDef/TypeSpec parents are rare for the calls this engine services
			// (BCL-style static/instance methods); name-only resolution still applies.
			_ => ("", ""),
		};

		let Some(sig_blob) = blobs.get(row.signature) else {
			return Err(ReadError::InvalidMemberRefSignature(row.signature.0));
		};
		let mut cursor = Cursor::new(sig_blob);
		let signature = MethodSignature::read(&mut cursor, tables.index_sizes())?;

		out.push(MemberRefDesc {
			name: string_heap.intern(name).as_str(),
			declaring_namespace: string_heap.intern(namespace).as_str(),
			declaring_name: string_heap.intern(simple_name).as_str(),
			parameter_count: signature.parameter_types().len(),
			has_this: signature.calling_convention().contains(CallingConvention::HAS_THIS),
			has_return_value: !matches!(signature.return_type().as_tags_tree(), TypeSignatureTag::Void),
		});
	}

	Ok(pool.bump().alloc_slice_fill_iter(out))
}

fn resolve_type_signature<'l>(
	sig: &TypeSignature,
	type_defs: &[&'l Type<'l>],
	pool: &'l TypePool<'l>,
) -> Result<&'l Type<'l>, ReadError> {
	resolve_type_signature_tag(&sig.as_tags_tree(), type_defs, pool)
}

fn resolve_type_signature_tag<'l>(
	sig: &TypeSignatureTag,
	type_defs: &[&'l Type<'l>],
	pool: &'l TypePool<'l>,
) -> Result<&'l Type<'l>, ReadError> {
	match sig {
		TypeSignatureTag::Void => Ok(pool.get_primitive(PrimitiveType::Void)),
		TypeSignatureTag::Char => Ok(pool.get_primitive(PrimitiveType::Char)),
		TypeSignatureTag::Bool => Ok(pool.get_primitive(PrimitiveType::Boolean)),
		TypeSignatureTag::Int1 => Ok(pool.get_primitive(PrimitiveType::Int8)),
		TypeSignatureTag::Int2 => Ok(pool.get_primitive(PrimitiveType::Int16)),
		TypeSignatureTag::Int4 => Ok(pool.get_primitive(PrimitiveType::Int32)),
		TypeSignatureTag::Int8 => Ok(pool.get_primitive(PrimitiveType::Int64)),
		TypeSignatureTag::UInt1 => Ok(pool.get_primitive(PrimitiveType::UInt8)),
		TypeSignatureTag::UInt2 => Ok(pool.get_primitive(PrimitiveType::UInt16)),
		TypeSignatureTag::UInt4 => Ok(pool.get_primitive(PrimitiveType::UInt32)),
		TypeSignatureTag::UInt8 => Ok(pool.get_primitive(PrimitiveType::UInt64)),
		TypeSignatureTag::Float => Ok(pool.get_primitive(PrimitiveType::Float)),
		TypeSignatureTag::Double => Ok(pool.get_primitive(PrimitiveType::Double)),
		TypeSignatureTag::String => Ok(pool.get_primitive(PrimitiveType::String)),
		TypeSignatureTag::IntPtr => Ok(pool.get_primitive(PrimitiveType::IntPtr)),
		TypeSignatureTag::UIntPtr => Ok(pool.get_primitive(PrimitiveType::UIntPtr)),
		TypeSignatureTag::Object => Ok(pool.get_primitive(PrimitiveType::Object)),
		TypeSignatureTag::TypedByRef => Ok(pool.get_primitive(PrimitiveType::TypedByRef)),

		TypeSignatureTag::Pointer(base) => {
			let base = resolve_type_signature(base, type_defs, pool)?;
			Ok(pool.get_pointer(base))
		},
		TypeSignatureTag::Reference(base) => {
			let base = resolve_type_signature(base, type_defs, pool)?;
			Ok(pool.get_reference(base))
		},

		TypeSignatureTag::ValueType(token) | TypeSignatureTag::ClassType(token) => {
			if let Ok(type_def) = TryInto::<metadata_token::TypeDef>::try_into(*token) {
				return match type_def.0 {
					0 => Err(ReadError::InvalidTypeSignature),
					_ => type_defs
						.get(type_def.0)
						.cloned()
						.ok_or(ReadError::InvalidTypeSignature),
				}
			}
			if let Ok(type_ref) = TryInto::<metadata_token::TypeRef>::try_into(*token) {
				unimplemented!()
			}
			unreachable!()
		},

		TypeSignatureTag::GenericInst(inst) => unsafe {
			// IDK what the hell is happening here, wonky borrow checker.
			let ty: &Type = std::mem::transmute(resolve_type_signature(inst.ty(), type_defs, pool)?);
			let mut params = Vec::with_capacity(inst.params_count());
			for sig in inst.params() {
				let ty = resolve_type_signature_tag(&sig, type_defs, pool)?;
				params.push(ty);
			}
			if !matches!(ty.kind, TypeKind::Class | TypeKind::Interface) {
				return Err(ReadError::InvalidTypeSignature);
			}
			match pool.get_generic_instantiation(ty, &params) {
				Ok(ty) => Ok(ty),
				Err(err) => match err {
					GenericTypeInstantiationError::TypeIsNotLoaded => Err(ReadError::InvalidTypeSignature),
					GenericTypeInstantiationError::TypeIsNotGeneric => Err(ReadError::InvalidTypeSignature),
					GenericTypeInstantiationError::InvalidGenericParameterCount => Err(ReadError::InvalidTypeSignature),
				}
			}
		},

		// TODO Make function pointer
		TypeSignatureTag::FnPointer(_) => {
			Ok(pool.get_primitive(PrimitiveType::Unimplemented))
		}

		// TODO Return variable signature flags
		TypeSignatureTag::SzArray(sig) => {
			let ty = resolve_type_signature(sig, type_defs, pool)?;
			Ok(pool.get_array(ty))
		},

		TypeSignatureTag::GenericParam(idx) => {
			// TODO Validate index
			Ok(pool.get_generic_type_param(*idx))
		}

		TypeSignatureTag::MethodGenericParam(idx) => {
			// TODO Validate index
			Ok(pool.get_generic_method_param(*idx))
		}

		// TODO Return variable signature flags
		TypeSignatureTag::Pinned(sig) => {
			resolve_type_signature(sig, type_defs, pool)
		},

		_ => unimplemented!("Unimplemented TypeSignatureTag {sig:#X?}"),
	}
}
