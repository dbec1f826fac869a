use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::ExitState;

/// Reasons the engine could not be brought up.
///
/// Every variant is fatal for the session; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
	/// No executable path was configured.
	#[error("engine executable path is not set")]
	MissingExecutable,
	/// The configured executable does not exist.
	#[error("engine executable not found: {}", path.display())]
	NotFound {
		/// Path as configured.
		path: PathBuf,
	},
	/// The configured executable exists but cannot be executed.
	#[error("engine executable is not executable: {}", path.display())]
	NotExecutable {
		/// Path as configured.
		path: PathBuf,
	},
	/// The operating system refused to start the process.
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		/// Program that was being started.
		program: String,
		/// Underlying error.
		#[source]
		source: io::Error,
	},
	/// The process went away before the handshake completed.
	#[error("engine exited before completing the handshake ({status})")]
	ExitedEarly {
		/// How the process ended.
		status: ExitState,
	},
	/// The handshake request failed.
	#[error("engine handshake failed: {0}")]
	Handshake(#[from] tandem_rpc::Error),
	/// The engine did not answer the handshake in time.
	#[error("engine did not answer the handshake within {0:?}")]
	HandshakeTimeout(Duration),
	/// The engine answered with something this bridge cannot work with.
	#[error("engine is incompatible: {0}")]
	Incompatible(String),
}
