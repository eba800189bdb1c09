//! The per-run engine (§5/§6/§9): owns every shared store, resolves and loads referenced
//! assemblies by simple name, runs each type's `.cctor` exactly once in load order, and drives
//! the entry point. Constructed once per run -- never a global `static`.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use fxhash::FxHashSet;

use cil_meta::{Assembly, DataPool};

use crate::descriptors::{Arena, MethodDesc, TypeDesc};
use crate::errors::ClrError;
use crate::heap::Heap;
use crate::internals::{InternalRegistry, WellKnownTypes};
use crate::interpreter::{self, Outcome};
use crate::loader::{self, LoadedProgram};
use crate::resolver::Resolver;
use crate::statics::StaticFields;
use crate::value::{Value, ValueKind};

/// One loaded assembly's contribution to the engine's type universe.
struct LoadedAssembly<'l> {
	name: String,
	types: Vec<&'l TypeDesc<'l>>,
}

pub struct Engine<'l> {
	arena: Arena<'l>,
	pools: Vec<Pin<Box<DataPool<'l>>>>,
	heap: Heap<'l>,
	statics: StaticFields,
	internals: InternalRegistry<'l>,
	well_known: WellKnownTypes<'l>,
	resolver: Resolver<'l>,
	assemblies: Vec<LoadedAssembly<'l>>,
	initialized_cctors: FxHashSet<*const TypeDesc<'l>>,
	entry_point: Option<&'l MethodDesc<'l>>,
	main_module: String,
	search_dir: PathBuf,
	running: bool,
}

impl<'l> Engine<'l> {
	/// Loads `main_assembly_path`, then probes for and loads `mscorlib` (falling back to the
	/// synthesised [`WellKnownTypes`] when no real `mscorlib` is found under `search_dir`, since
	/// the supported test corpus runs without one -- see `internals`).
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn new(main_assembly_path: impl AsRef<Path>, search_dir: impl AsRef<Path>) -> Result<Self, ClrError> {
		let arena = Arena::new();
		let well_known = WellKnownTypes::new(&arena);

		let main_module = main_assembly_path
			.as_ref()
			.file_stem()
			.and_then(|s| s.to_str())
			.unwrap_or("main")
			.to_string();

		let mut engine = Engine {
			arena,
			pools: Vec::new(),
			heap: Heap::new(),
			statics: StaticFields::new(),
			internals: InternalRegistry::new(),
			well_known,
			resolver: Resolver::build(&[]),
			assemblies: Vec::new(),
			initialized_cctors: FxHashSet::default(),
			entry_point: None,
			main_module,
			search_dir: search_dir.as_ref().to_path_buf(),
			running: false,
		};

		// `mscorlib` is always resolved first (§4.7); its absence is not fatal here, since
		// `WellKnownTypes` already covers the handful of base types this engine needs.
		match engine.probe("mscorlib") {
			Some(path) => {
				engine.load_assembly_from_path("mscorlib", &path)?;
			}
			None => {
				#[cfg(feature = "tracing")]
				tracing::debug!("mscorlib not found under search directories; using synthesised well-known types");
			}
		}

		let main_name = engine.main_module.clone();
		let program = engine.load_assembly_from_path(&main_name, main_assembly_path.as_ref())?;
		engine.entry_point = program.entry_point;
		engine.rebuild_resolver();

		Ok(engine)
	}

	/// Runs every loaded type's `.cctor` (in load order, each exactly once) and then invokes
	/// the entry point, packaging `args` as a `String[]` if it takes one (§6).
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn start(&mut self, args: &[String]) -> Result<Value, ClrError> {
		self.running = true;
		if let Err(e) = self.run_all_cctors() {
			self.report(&e);
			return Err(e);
		}

		let Some(entry) = self.entry_point else {
			let e = ClrError::EntryPointNotFound(self.main_module.clone());
			self.report(&e);
			return Err(e);
		};

		let params = match entry.parameter_count() {
			0 => Vec::new(),
			_ => {
				let elements: Vec<Value> = args.iter().map(|a| Value::String(a.as_str().into())).collect();
				let handle = self.heap.alloc_array_from(elements, ValueKind::String);
				vec![Value::Array(handle)]
			}
		};

		match self.run(entry, params) {
			Ok(Outcome::Returned(v)) => Ok(v),
			Ok(Outcome::Cancelled) => Ok(Value::Null),
			Err(e) => {
				self.report(&e);
				Err(e)
			}
		}
	}

	/// Invokes a named, zero-argument method in any loaded assembly (§6).
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn run_method_in_dll(&mut self, namespace: &str, type_name: &str, method_name: &str) -> Result<Value, ClrError> {
		let method = self
			.all_types()
			.iter()
			.find(|t| t.namespace() == namespace && t.name() == type_name)
			.and_then(|t| t.method(method_name))
			.ok_or_else(|| ClrError::MethodNotFound { name: format!("{namespace}.{type_name}::{method_name}"), signature: "()".into() })?;

		match self.run(method, Vec::new())? {
			Outcome::Returned(v) => Ok(v),
			Outcome::Cancelled => Ok(Value::Null),
		}
	}

	/// Cooperative cancellation (§5): observed between instructions, unwinds every frame clean.
	pub fn stop(&mut self) {
		self.running = false;
	}

	fn run(&mut self, method: &'l MethodDesc<'l>, params: Vec<Value>) -> Result<Outcome, ClrError> {
		let mut ctx = interpreter::Context {
			heap: &mut self.heap,
			statics: &mut self.statics,
			resolver: &self.resolver,
			internals: &self.internals,
			well_known: &self.well_known,
			running: &mut self.running,
		};
		interpreter::run_method(&mut ctx, method, params)
	}

	fn all_types(&self) -> Vec<&'l TypeDesc<'l>> {
		self.assemblies.iter().flat_map(|a| a.types.iter().copied()).collect()
	}

	fn rebuild_resolver(&mut self) {
		let types = self.all_types();
		self.resolver = Resolver::build(&types);
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
	fn run_all_cctors(&mut self) -> Result<(), ClrError> {
		let types = self.all_types();
		for ty in types {
			let key = ty as *const TypeDesc<'l>;
			if self.initialized_cctors.contains(&key) {
				continue;
			}
			self.initialized_cctors.insert(key);
			let Some(cctor) = ty.method(".cctor") else { continue };
			#[cfg(feature = "tracing")]
			tracing::debug!(type_name = %ty.full_name(), "running type initializer");
			self.run(cctor, Vec::new())?;
		}
		Ok(())
	}

	/// Loads a named assembly by probing the candidate paths in §4.7, if it isn't loaded yet.
	pub fn load_assembly_by_name(&mut self, name: &str) -> Result<(), ClrError> {
		if self.assemblies.iter().any(|a| a.name == name) {
			return Ok(());
		}
		let path = self.probe(name).ok_or_else(|| ClrError::AssemblyNotFound(name.to_string()))?;
		self.load_assembly_from_path(name, &path)?;
		self.rebuild_resolver();
		Ok(())
	}

	/// `<search-dir>/<name>.exe`, `<search-dir>/<name>.dll`, `<cwd>/<name>.exe`, `<cwd>/<name>.dll`.
	fn probe(&self, name: &str) -> Option<PathBuf> {
		let cwd = std::env::current_dir().unwrap_or_default();
		for dir in [self.search_dir.as_path(), cwd.as_path()] {
			for ext in ["exe", "dll"] {
				let candidate = dir.join(name).with_extension(ext);
				if candidate.is_file() {
					return Some(candidate);
				}
			}
		}
		None
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
	fn load_assembly_from_path(&mut self, name: &str, path: &Path) -> Result<LoadedProgram<'l>, ClrError> {
		#[cfg(feature = "tracing")]
		tracing::debug!(assembly = name, path = %path.display(), "loading assembly");

		self.pools.push(Box::pin(DataPool::new()));
		// SAFETY: the boxed `DataPool` is never moved out of `self.pools` and the box itself
		// is never dropped before `self` is, so its address (and `'l`-tagged data derived from
		// it below) is stable for the engine's lifetime -- the same trick `Arena::bump` uses.
		let pool: &'l DataPool<'l> = unsafe { std::mem::transmute(self.pools.last().unwrap().as_ref().get_ref()) };

		let assembly = Assembly::from_path(pool, path)?;
		let assembly_name: &'l str = self.arena.alloc_str(name);
		let known_types = self.all_types();
		let program = loader::load(&self.arena, &assembly, assembly_name, &self.well_known, &known_types)?;

		self.assemblies.push(LoadedAssembly { name: name.to_string(), types: program.types.clone() });
		Ok(program)
	}

	fn report(&self, error: &ClrError) {
		#[cfg(feature = "tracing")]
		tracing::debug!(error = %error, "unwinding with unhandled error");
		println!("A {} has occured in {}. The error is: {}", error.kind(), self.main_module, error);
	}
}
