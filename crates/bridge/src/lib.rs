//! Keeps a host editor and an embedded modal editing engine in sync.
//!
//! The host owns the documents and the UI; the engine owns modal editing.
//! This crate sits between them:
//! * [`sync`]: buffer synchronization with changedtick guarded edit batches
//!   and full resync as the fallback for any divergence
//! * [`viewport`]: host scroll, selection and cursor against the engine's
//!   fixed virtual screen
//! * [`highlight`]: engine highlight groups as host decorations
//! * [`controller`]: session lifecycle and per-document event queues
//!
//! [`activate`] is the entry point a host calls once per window.

#![warn(missing_docs)]

use std::sync::Arc;

pub mod config;
pub mod controller;
pub mod diff;
pub mod engine;
mod error;
pub mod highlight;
pub mod host;
pub mod logging;
pub mod mirror;
pub mod position;
pub mod sync;
pub mod viewport;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, Platform, SessionConfig, Settings};
pub use controller::{Controller, HostEventSink, SessionState};
pub use error::{Error, InitError, Result};
pub use host::{DocumentId, HostEditor, HostEvent};
pub use tandem_engine::{Launcher, ProcessLauncher};

/// Shown when no engine executable is configured.
pub const MISSING_ENGINE_MESSAGE: &str =
	"tandem: the engine executable is not configured. Set `engine-path` and restart the editor.";

/// Resolves `settings`, installs logging and starts a session.
///
/// On failure the host has been shown exactly one error message.
///
/// # Errors
///
/// - [`Error::Config`] if the settings do not resolve.
/// - [`Error::Init`] if the session failed to start.
pub async fn activate(
	settings: &Settings,
	platform: Platform,
	host: Arc<dyn HostEditor>,
	launcher: Arc<dyn Launcher>,
) -> Result<Controller> {
	logging::init(&settings.log_config());

	let config = match settings.resolve(platform) {
		Ok(config) => config,
		Err(e) => {
			tracing::error!(error = %e, "invalid settings");
			if matches!(e, ConfigError::MissingEnginePath) {
				host.show_error(MISSING_ENGINE_MESSAGE);
			} else {
				host.show_error(&format!("tandem: {e}"));
			}
			return Err(e.into());
		}
	};

	let controller = Controller::new(Arc::new(config), host, launcher);
	controller.init().await?;
	Ok(controller)
}
