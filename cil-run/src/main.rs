use std::path::PathBuf;
use std::process::ExitCode;

use cil_vm::Engine;

struct Args {
	assembly: PathBuf,
	search_dir: PathBuf,
	forwarded: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
	let mut raw = std::env::args().skip(1);
	let assembly = raw.next().ok_or("missing required argument: <assembly-path>")?;
	let mut search_dir = std::env::current_dir().unwrap_or_default();
	let mut forwarded = Vec::new();

	while let Some(arg) = raw.next() {
		match arg.as_str() {
			"--search-dir" => {
				let dir = raw.next().ok_or("--search-dir requires a directory argument")?;
				search_dir = PathBuf::from(dir);
			}
			"--" => forwarded.extend(raw.by_ref()),
			other => return Err(format!("unrecognised argument: {other}")),
		}
	}

	Ok(Args { assembly: PathBuf::from(assembly), search_dir, forwarded })
}

fn install_tracing() {
	use tracing_subscriber::EnvFilter;
	tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();
}

fn main() -> ExitCode {
	install_tracing();

	let args = match parse_args() {
		Ok(args) => args,
		Err(message) => {
			eprintln!("usage: cil-run <assembly-path> [--search-dir <dir>] [-- <args...>]");
			eprintln!("error: {message}");
			return ExitCode::from(1);
		}
	};

	let mut engine = match Engine::new(&args.assembly, &args.search_dir) {
		Ok(engine) => engine,
		Err(e) => {
			eprintln!("error: {e}");
			return ExitCode::from(2);
		}
	};

	match engine.start(&args.forwarded) {
		Ok(_) => ExitCode::from(0),
		Err(_) => ExitCode::from(2),
	}
}
