use tandem_engine::LaunchError;

use crate::config::ConfigError;
use crate::controller::SessionState;
use crate::host::DocumentId;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a session failed to start. Every step of startup reports through
/// this one type so the user sees a single message.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
	/// The engine could not be started.
	#[error("failed to start the engine: {0}")]
	Launch(#[from] LaunchError),
	/// The engine started but rejected the bridge setup.
	#[error("failed to set up the engine: {0}")]
	Setup(#[source] tandem_rpc::Error),
	/// An open document could not be loaded into the engine.
	#[error("failed to load {doc} into the engine: {source}")]
	Prime {
		/// The document.
		doc: DocumentId,
		/// Underlying error.
		#[source]
		source: tandem_rpc::Error,
	},
}

/// Bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Settings could not be resolved.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The engine could not be started.
	#[error(transparent)]
	Launch(#[from] LaunchError),
	/// The transport to the engine failed.
	#[error("engine transport: {0}")]
	Transport(#[from] tandem_rpc::Error),
	/// Session startup failed.
	#[error(transparent)]
	Init(#[from] InitError),
	/// The operation is not valid in the current session state.
	#[error("operation not valid while {0:?}")]
	InvalidState(SessionState),
}
