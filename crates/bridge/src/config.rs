//! Settings and their resolution into a session configuration.
//!
//! [`Settings`] mirrors what the host's settings system exposes and can be
//! parsed from TOML. [`Settings::resolve`] turns it into the immutable
//! [`SessionConfig`] a controller runs with.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tandem_engine::{DirectSpawn, LaunchConfig, SpawnStrategy, WslSpawn};

use crate::highlight::{DecorationPlacement, DecorationStyle, HighlightRules};
use crate::position::OffsetEncoding;

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// No engine executable is configured for this platform.
	#[error("no engine executable configured")]
	MissingEnginePath,
	/// A highlight ignore pattern does not parse.
	#[error("invalid highlight ignore pattern: {0}")]
	IgnorePattern(#[from] globset::Error),
	/// The settings file could not be read.
	#[error("failed to read {}: {source}", path.display())]
	Read {
		/// File path.
		path: PathBuf,
		/// Underlying error.
		#[source]
		source: std::io::Error,
	},
	/// The settings file is not valid TOML for [`Settings`].
	#[error("invalid settings: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Operating system the host runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	/// Linux and other Unixes.
	Linux,
	/// macOS.
	MacOs,
	/// Windows.
	Windows,
}

impl Platform {
	/// The platform this binary was built for.
	pub const fn current() -> Self {
		if cfg!(windows) {
			Self::Windows
		} else if cfg!(target_os = "macos") {
			Self::MacOs
		} else {
			Self::Linux
		}
	}
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	/// Logging disabled.
	#[default]
	None,
	/// Errors only.
	Error,
	/// Warnings and errors.
	Warn,
	/// Informational messages.
	Info,
	/// Debugging detail.
	Debug,
	/// Everything.
	Trace,
}

impl LogLevel {
	/// Filter directive for this level, `None` when logging is off.
	pub fn directive(self) -> Option<&'static str> {
		match self {
			Self::None => None,
			Self::Error => Some("error"),
			Self::Warn => Some("warn"),
			Self::Info => Some("info"),
			Self::Debug => Some("debug"),
			Self::Trace => Some("trace"),
		}
	}
}

/// Per-platform executable paths.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct PlatformPaths {
	/// Linux path.
	pub linux: Option<PathBuf>,
	/// macOS path.
	pub macos: Option<PathBuf>,
	/// Windows path.
	pub windows: Option<PathBuf>,
}

impl PlatformPaths {
	fn get(&self, platform: Platform) -> Option<&Path> {
		let path = match platform {
			Platform::Linux => &self.linux,
			Platform::MacOs => &self.macos,
			Platform::Windows => &self.windows,
		};
		path.as_deref().filter(|p| !p.as_os_str().is_empty())
	}
}

/// Highlight group settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HighlightSettings {
	/// Glob patterns of groups to drop.
	pub ignore: Vec<String>,
	/// Styles per group.
	pub highlights: BTreeMap<String, DecorationStyle>,
	/// Style for groups with no mapping.
	pub unknown: DecorationStyle,
}

impl Default for HighlightSettings {
	fn default() -> Self {
		let mut highlights = BTreeMap::new();
		highlights.insert(
			"Search".to_owned(),
			DecorationStyle {
				background_color: Some("theme.editor.findMatchHighlightBackground".to_owned()),
				..DecorationStyle::default()
			},
		);
		highlights.insert(
			"IncSearch".to_owned(),
			DecorationStyle {
				background_color: Some("theme.editor.findMatchBackground".to_owned()),
				border_color: Some("theme.editor.findMatchBorder".to_owned()),
				..DecorationStyle::default()
			},
		);
		Self {
			ignore: Vec::new(),
			highlights,
			unknown: DecorationStyle {
				background_color: Some("rgba(255,255,255,0.5)".to_owned()),
				..DecorationStyle::default()
			},
		}
	}
}

/// Settings as the host exposes them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
	/// Engine executable used when no platform path is set.
	pub engine_path: Option<PathBuf>,
	/// Platform specific executables.
	pub engine_paths: PlatformPaths,
	/// Run the engine inside WSL. Only honoured on Windows.
	pub use_wsl: bool,
	/// Custom engine init script.
	pub init_path: Option<PathBuf>,
	/// Extra script sourced before the user's config.
	pub runtime_path: Option<PathBuf>,
	/// Highlight translation rules.
	pub highlight_groups: HighlightSettings,
	/// Start visual mode on mouse selections.
	pub mouse_selection_start_visual_mode: bool,
	/// Route control keys to the engine in normal mode.
	pub use_ctrl_keys_for_normal_mode: bool,
	/// Route control keys to the engine in insert mode.
	pub use_ctrl_keys_for_insert_mode: bool,
	/// Center the cursor line on every engine cursor move.
	pub reveal_cursor_scroll_line: bool,
	/// Engine virtual screen width.
	pub engine_width: u32,
	/// Engine virtual screen height.
	pub engine_height: u32,
	/// Draw engine decorations above host decorations.
	pub text_decorations_at_top: bool,
	/// Log file.
	pub log_path: Option<PathBuf>,
	/// Log verbosity.
	pub log_level: LogLevel,
	/// Echo logs to stderr.
	pub log_output_to_console: bool,
	/// The host runs this bridge on a remote workspace machine.
	pub remote_workspace: bool,
	/// Grace period between the quit request and a force kill.
	pub stop_grace_ms: u64,
	/// Upper bound on the startup handshake.
	pub handshake_timeout_ms: u64,
	/// Column unit of host positions.
	pub offset_encoding: OffsetEncoding,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			engine_path: None,
			engine_paths: PlatformPaths::default(),
			use_wsl: false,
			init_path: None,
			runtime_path: None,
			highlight_groups: HighlightSettings::default(),
			mouse_selection_start_visual_mode: false,
			use_ctrl_keys_for_normal_mode: true,
			use_ctrl_keys_for_insert_mode: true,
			reveal_cursor_scroll_line: false,
			engine_width: 1000,
			engine_height: 201,
			text_decorations_at_top: false,
			log_path: None,
			log_level: LogLevel::None,
			log_output_to_console: false,
			remote_workspace: false,
			stop_grace_ms: 1500,
			handshake_timeout_ms: 10_000,
			offset_encoding: OffsetEncoding::Utf16,
		}
	}
}

/// Cursor reveal behavior after engine cursor moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorReveal {
	/// Scroll only when the cursor leaves the visible range.
	#[default]
	Natural,
	/// Center the cursor line on every move.
	Center,
}

/// Logging target and verbosity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
	/// Log file.
	pub path: Option<PathBuf>,
	/// Verbosity.
	pub level: LogLevel,
	/// Echo to stderr.
	pub console: bool,
}

/// Immutable configuration of one session.
pub struct SessionConfig {
	/// How to start the engine.
	pub launch: LaunchConfig,
	/// Highlight rules.
	pub highlights: HighlightRules,
	/// Start visual mode on mouse selections.
	pub mouse_visual_selection: bool,
	/// Control-key routing in normal mode.
	pub ctrl_keys_normal: bool,
	/// Control-key routing in insert mode.
	pub ctrl_keys_insert: bool,
	/// Cursor reveal behavior.
	pub cursor_reveal: CursorReveal,
	/// Logging.
	pub log: LogConfig,
	/// Grace period for stopping the engine.
	pub stop_grace: Duration,
	/// Column unit of host positions.
	pub offset_encoding: OffsetEncoding,
}

impl fmt::Debug for SessionConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionConfig")
			.field("launch", &self.launch)
			.field("cursor_reveal", &self.cursor_reveal)
			.field("placement", &self.highlights.placement())
			.finish_non_exhaustive()
	}
}

impl Settings {
	/// Parses settings from TOML.
	///
	/// # Errors
	///
	/// [`ConfigError::Parse`] if the text is not valid settings.
	pub fn parse(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	/// Reads settings from a TOML file.
	///
	/// # Errors
	///
	/// [`ConfigError::Read`] or [`ConfigError::Parse`].
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&text)
	}

	/// Logging part of the settings.
	pub fn log_config(&self) -> LogConfig {
		LogConfig {
			path: self.log_path.clone().filter(|p| !p.as_os_str().is_empty()),
			level: self.log_level,
			console: self.log_output_to_console,
		}
	}

	/// The engine executable for `platform`: the platform path if set,
	/// otherwise the generic one.
	pub fn engine_executable(&self, platform: Platform) -> Option<PathBuf> {
		self.engine_paths
			.get(platform)
			.map(Path::to_path_buf)
			.or_else(|| self.engine_path.clone().filter(|p| !p.as_os_str().is_empty()))
	}

	/// Whether the engine runs behind WSL: requested, on Windows, and not in
	/// a remote workspace.
	pub fn wants_wsl(&self, platform: Platform) -> bool {
		self.use_wsl && platform == Platform::Windows && !self.remote_workspace
	}

	/// Resolves settings into a session configuration.
	///
	/// # Errors
	///
	/// - [`ConfigError::MissingEnginePath`] if no executable is configured.
	/// - [`ConfigError::IgnorePattern`] if an ignore pattern does not parse.
	pub fn resolve(&self, platform: Platform) -> Result<SessionConfig, ConfigError> {
		let executable = self.engine_executable(platform).ok_or(ConfigError::MissingEnginePath)?;
		let spawn: Arc<dyn SpawnStrategy> = if self.wants_wsl(platform) {
			Arc::new(WslSpawn)
		} else {
			Arc::new(DirectSpawn)
		};

		let mut launch = LaunchConfig::new(executable);
		launch.init_path = self.init_path.clone().filter(|p| !p.as_os_str().is_empty());
		launch.runtime_path = self.runtime_path.clone().filter(|p| !p.as_os_str().is_empty());
		launch.width = self.engine_width.max(1);
		launch.height = self.engine_height.max(1);
		launch.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
		launch.spawn = spawn;

		let placement = if self.text_decorations_at_top {
			DecorationPlacement::Above
		} else {
			DecorationPlacement::Below
		};
		let highlights = HighlightRules::new(
			&self.highlight_groups.ignore,
			self.highlight_groups.highlights.clone(),
			self.highlight_groups.unknown.clone(),
			placement,
		)?;

		Ok(SessionConfig {
			launch,
			highlights,
			mouse_visual_selection: self.mouse_selection_start_visual_mode,
			ctrl_keys_normal: self.use_ctrl_keys_for_normal_mode,
			ctrl_keys_insert: self.use_ctrl_keys_for_insert_mode,
			cursor_reveal: if self.reveal_cursor_scroll_line {
				CursorReveal::Center
			} else {
				CursorReveal::Natural
			},
			log: self.log_config(),
			stop_grace: Duration::from_millis(self.stop_grace_ms),
			offset_encoding: self.offset_encoding,
		})
	}
}
