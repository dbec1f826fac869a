//! The host editor as seen by the bridge.
//!
//! The host pushes [`HostEvent`]s into the controller and is driven back
//! through [`HostEditor`]. Positions are host positions in the configured
//! offset encoding.
//!
//! Every document carries a host version that grows with each change,
//! including changes the bridge makes. Change events report the version they
//! produced, which lets the bridge recognize the echo of its own edits.

use std::fmt;

use async_trait::async_trait;

use crate::highlight::Decoration;
use crate::position::{Position, Range};

/// Stable identifier the host assigns to an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "doc#{}", self.0)
	}
}

/// A document the host has open when the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
	/// Document id.
	pub id: DocumentId,
	/// Host version of `text`.
	pub version: u64,
	/// Full text, lines separated by `\n`.
	pub text: String,
}

/// One replacement in a batch handed to [`HostEditor::apply_edits`].
///
/// Ranges in a batch refer to the document before any of the batch is
/// applied, and do not overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEdit {
	/// Range to replace.
	pub range: Range,
	/// Replacement text.
	pub text: String,
}

/// A host selection. `active` is where the cursor is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
	/// Fixed end.
	pub anchor: Position,
	/// Moving end.
	pub active: Position,
}

impl Selection {
	/// A collapsed selection at `pos`.
	pub const fn caret(pos: Position) -> Self {
		Self { anchor: pos, active: pos }
	}

	/// Returns true if nothing is selected.
	pub fn is_empty(&self) -> bool {
		self.anchor == self.active
	}
}

/// What produced a selection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
	/// Mouse click or drag.
	Mouse,
	/// Keyboard or command.
	Keyboard,
}

/// How the host should bring a line into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealKind {
	/// Scroll as little as possible.
	Minimal,
	/// Center the line.
	Center,
}

/// Something that happened in the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
	/// A document was opened.
	Opened {
		/// Document id.
		doc: DocumentId,
		/// Host version of `text`.
		version: u64,
		/// Full text.
		text: String,
	},
	/// A document was closed.
	Closed {
		/// Document id.
		doc: DocumentId,
	},
	/// A document's text changed; carries the full new text.
	Changed {
		/// Document id.
		doc: DocumentId,
		/// Host version after the change.
		version: u64,
		/// Full text after the change.
		text: String,
	},
	/// A document became the focused editor.
	Activated {
		/// Document id.
		doc: DocumentId,
	},
	/// The selection in a document changed.
	SelectionChanged {
		/// Document id.
		doc: DocumentId,
		/// New selection.
		selection: Selection,
		/// Source of the change.
		kind: SelectionKind,
	},
	/// The visible line range of a document changed by scrolling or resizing.
	VisibleRangeChanged {
		/// Document id.
		doc: DocumentId,
		/// First visible line.
		top: u32,
		/// Last visible line, inclusive.
		bottom: u32,
	},
}

impl HostEvent {
	/// The document this event concerns.
	pub fn doc(&self) -> DocumentId {
		match self {
			Self::Opened { doc, .. }
			| Self::Closed { doc }
			| Self::Changed { doc, .. }
			| Self::Activated { doc }
			| Self::SelectionChanged { doc, .. }
			| Self::VisibleRangeChanged { doc, .. } => *doc,
		}
	}
}

/// Host editor operations the bridge drives.
///
/// Implementations are the host's native buffer, selection and decoration
/// APIs. Edits return the document version they produced, or `None` if the
/// host refused them.
#[async_trait]
pub trait HostEditor: Send + Sync + 'static {
	/// Sets a boolean context key used by host keybinding conditions.
	fn set_context(&self, key: &str, value: bool);

	/// Shows an error message to the user.
	fn show_error(&self, message: &str);

	/// Documents open right now.
	fn open_documents(&self) -> Vec<OpenDocument>;

	/// Applies a batch of edits to a document, but only if it is still at
	/// version `base`.
	async fn apply_edits(&self, doc: DocumentId, base: u64, edits: Vec<HostEdit>) -> Option<u64>;

	/// Replaces the whole text of a document.
	async fn replace_text(&self, doc: DocumentId, text: &str) -> Option<u64>;

	/// Moves the selection of a document.
	async fn set_selection(&self, doc: DocumentId, selection: Selection);

	/// Scrolls a document so `line` is visible.
	async fn reveal(&self, doc: DocumentId, line: u32, kind: RevealKind);

	/// Replaces the engine decorations of a document.
	async fn set_decorations(&self, doc: DocumentId, decorations: Vec<Decoration>);

	/// The engine switched modes.
	fn mode_changed(&self, mode: &str);

	/// The engine went away while the session was running.
	fn engine_exited(&self, reason: &str);
}
