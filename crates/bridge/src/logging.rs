//! Tracing setup.
//!
//! `TANDEM_LOG` overrides the configured level with a full filter directive.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::LogConfig;

const FILTER_ENV: &str = "TANDEM_LOG";

/// Builds the subscriber described by `config`, or `None` when logging is
/// off. A log file that cannot be opened falls back to stderr.
pub fn build(config: &LogConfig) -> Option<impl Subscriber + Send + Sync + 'static> {
	let level = config.level.directive()?;
	let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(level));

	let file = config.path.as_ref().and_then(|path| {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			let _ = std::fs::create_dir_all(parent);
		}
		match OpenOptions::new().create(true).append(true).open(path) {
			Ok(file) => Some(file),
			Err(e) => {
				eprintln!("tandem: cannot open log file {}: {e}", path.display());
				None
			}
		}
	});
	let console = config.console || (config.path.is_some() && file.is_none());

	let file_layer = file.map(|file| {
		tracing_subscriber::fmt::layer()
			.with_writer(Mutex::new(file))
			.with_ansi(false)
			.with_target(true)
	});
	let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

	Some(tracing_subscriber::registry().with(filter).with(file_layer).with(console_layer))
}

/// Installs the global subscriber described by `config`.
///
/// Returns false when logging is off or a global subscriber already exists,
/// so repeated sessions in one process keep the first one.
pub fn init(config: &LogConfig) -> bool {
	let Some(subscriber) = build(config) else {
		return false;
	};
	let installed = subscriber.try_init().is_ok();
	if installed {
		tracing::info!(level = ?config.level, path = ?config.path, "tracing initialized");
	}
	installed
}
