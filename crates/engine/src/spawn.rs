//! Command line construction for the engine process.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::{LaunchConfig, LaunchError};

const WSL_PROGRAM: &str = "wsl.exe";

/// How the engine command is built.
///
/// Strategies only decide the program and how paths are spelled on its
/// command line; the rest of the launch is shared.
pub trait SpawnStrategy: Debug + Send + Sync {
	/// Returns a command that runs `executable`, ready for engine arguments.
	///
	/// # Errors
	///
	/// A [`LaunchError`] if the program to run cannot be resolved.
	fn command(&self, executable: &Path) -> Result<Command, LaunchError>;

	/// Spells a host path so the engine can open it.
	fn path_arg(&self, path: &Path) -> String {
		path.display().to_string()
	}
}

/// Runs the engine executable directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSpawn;

impl SpawnStrategy for DirectSpawn {
	fn command(&self, executable: &Path) -> Result<Command, LaunchError> {
		Ok(Command::new(resolve_executable(executable)?))
	}
}

/// Runs the engine inside WSL from a Windows host.
///
/// The executable path is interpreted inside WSL and is not checked on the
/// host; `wsl.exe` itself must be resolvable.
#[derive(Debug, Clone, Copy, Default)]
pub struct WslSpawn;

impl SpawnStrategy for WslSpawn {
	fn command(&self, executable: &Path) -> Result<Command, LaunchError> {
		if executable.as_os_str().is_empty() {
			return Err(LaunchError::MissingExecutable);
		}
		let wsl = resolve_executable(Path::new(WSL_PROGRAM))?;
		let mut cmd = Command::new(wsl);
		cmd.arg(to_wsl_path(&executable.display().to_string()));
		Ok(cmd)
	}

	fn path_arg(&self, path: &Path) -> String {
		to_wsl_path(&path.display().to_string())
	}
}

/// Resolves `path` to something that can be executed.
///
/// Bare names are looked up on `PATH`.
///
/// # Errors
///
/// - [`LaunchError::MissingExecutable`] for an empty path.
/// - [`LaunchError::NotExecutable`] if the file exists but cannot be run.
/// - [`LaunchError::NotFound`] otherwise.
pub fn resolve_executable(path: &Path) -> Result<PathBuf, LaunchError> {
	if path.as_os_str().is_empty() {
		return Err(LaunchError::MissingExecutable);
	}
	match which::which(path) {
		Ok(resolved) => Ok(resolved),
		Err(err) => {
			tracing::debug!(path = %path.display(), error = %err, "engine executable lookup failed");
			if path.is_file() {
				Err(LaunchError::NotExecutable { path: path.to_path_buf() })
			} else {
				Err(LaunchError::NotFound { path: path.to_path_buf() })
			}
		}
	}
}

/// Startup arguments for the engine.
///
/// The engine runs embedded (msgpack-RPC on stdio) without shada state, with
/// its virtual screen fixed to the configured size.
pub fn engine_args(config: &LaunchConfig, strategy: &dyn SpawnStrategy) -> Vec<String> {
	let mut args = vec!["--embed".to_owned(), "-n".to_owned()];
	if let Some(init) = &config.init_path {
		args.push("-u".to_owned());
		args.push(strategy.path_arg(init));
	}
	args.push("--cmd".to_owned());
	args.push(format!("set lines={} columns={}", config.height, config.width));
	if let Some(runtime) = &config.runtime_path {
		args.push("--cmd".to_owned());
		args.push(format!("source {}", strategy.path_arg(runtime)));
	}
	args
}

/// Translates a Windows path into its WSL mount path.
///
/// `C:\Users\me\init.vim` becomes `/mnt/c/Users/me/init.vim`. Paths without
/// a drive letter only get their separators flipped.
pub fn to_wsl_path(path: &str) -> String {
	let bytes = path.as_bytes();
	if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
		let drive = char::from(bytes[0]).to_ascii_lowercase();
		let rest = path[2..].replace('\\', "/");
		let rest = rest.trim_start_matches('/');
		if rest.is_empty() {
			format!("/mnt/{drive}")
		} else {
			format!("/mnt/{drive}/{rest}")
		}
	} else {
		path.replace('\\', "/")
	}
}
