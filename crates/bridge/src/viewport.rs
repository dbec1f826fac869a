//! Viewport and cursor mapping between the host and the engine's fixed
//! virtual screen.
//!
//! [`ViewportState`] is pure: it consumes host and engine observations and
//! returns what should be sent to the other side. The caller performs the
//! RPC and host calls.

use ropey::Rope;

use crate::config::CursorReveal;
use crate::engine::EngineCursor;
use crate::host::{RevealKind, Selection, SelectionKind};
use crate::position::{
	EnginePos, OffsetEncoding, Position, char_to_engine, char_to_position, engine_to_char, host_to_engine,
	line_len_chars, position_to_char,
};

/// A change to apply to the engine window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportCommand {
	/// Make `top` the first line of the window.
	ScrollTo {
		/// 0-based line.
		top: u32,
	},
	/// Resize the window.
	SetHeight {
		/// Lines.
		height: u32,
	},
	/// Move the cursor.
	SetCursor {
		/// New cursor.
		pos: EnginePos,
	},
	/// Select from `anchor` to `cursor` in visual mode, both inclusive.
	VisualSelect {
		/// Fixed end.
		anchor: EnginePos,
		/// Cursor end.
		cursor: EnginePos,
	},
}

/// Host updates following an engine cursor move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorUpdate {
	/// New host selection, unless the host already shows it.
	pub selection: Option<Selection>,
	/// Line to bring into view.
	pub reveal: Option<(u32, RevealKind)>,
}

/// How an engine mode shapes the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisualKind {
	Charwise,
	Linewise,
}

fn visual_kind(mode: &str) -> Option<VisualKind> {
	match mode.chars().next()? {
		'v' | '\u{16}' => Some(VisualKind::Charwise),
		'V' => Some(VisualKind::Linewise),
		_ => None,
	}
}

/// Per-document viewport state.
#[derive(Debug, Clone)]
pub struct ViewportState {
	engine_height: u32,
	visible: Option<(u32, u32)>,
	window_top: Option<u32>,
	window_height: Option<u32>,
	engine_cursor: Option<EnginePos>,
	host_selection: Option<Selection>,
}

impl ViewportState {
	/// State for an engine window at most `engine_height` lines tall.
	pub fn new(engine_height: u32) -> Self {
		Self {
			engine_height: engine_height.max(1),
			visible: None,
			window_top: None,
			window_height: None,
			engine_cursor: None,
			host_selection: None,
		}
	}

	/// Last host visible range, inclusive.
	pub fn visible(&self) -> Option<(u32, u32)> {
		self.visible
	}

	/// Last engine-reported cursor.
	pub fn engine_cursor(&self) -> Option<EnginePos> {
		self.engine_cursor
	}

	/// Forgets what the engine window looks like, so the next visible range
	/// is sent in full. Used after the window switched buffers.
	pub fn reset_window(&mut self) {
		self.window_top = None;
		self.window_height = None;
	}

	/// The host scrolled or resized. Returns the window changes that make the
	/// engine show the same lines.
	pub fn on_visible_range(&mut self, top: u32, bottom: u32) -> Vec<ViewportCommand> {
		let (top, bottom) = if bottom < top { (bottom, top) } else { (top, bottom) };
		self.visible = Some((top, bottom));

		let height = (bottom - top).saturating_add(1).min(self.engine_height);
		let mut commands = Vec::new();
		if self.window_height != Some(height) {
			self.window_height = Some(height);
			commands.push(ViewportCommand::SetHeight { height });
		}
		if self.window_top != Some(top) {
			self.window_top = Some(top);
			commands.push(ViewportCommand::ScrollTo { top });
		}
		commands
	}

	/// The host selection changed. Returns the engine call that mirrors it,
	/// or `None` if the engine already has it.
	///
	/// A non-empty mouse selection becomes a visual selection when
	/// `mouse_visual` is set; the host's exclusive end becomes inclusive.
	pub fn on_host_selection(
		&mut self,
		text: &Rope,
		selection: Selection,
		kind: SelectionKind,
		mouse_visual: bool,
		encoding: OffsetEncoding,
	) -> Option<ViewportCommand> {
		if self.host_selection == Some(selection) {
			return None;
		}
		self.host_selection = Some(selection);

		if mouse_visual && kind == SelectionKind::Mouse && !selection.is_empty() {
			let anchor = position_to_char(text, selection.anchor, encoding)?;
			let active = position_to_char(text, selection.active, encoding)?;
			let (anchor, active) = if active > anchor {
				(anchor, active - 1)
			} else {
				(anchor.saturating_sub(1), active)
			};
			return Some(ViewportCommand::VisualSelect {
				anchor: char_to_engine(text, anchor)?,
				cursor: char_to_engine(text, active)?,
			});
		}

		let pos = host_to_engine(text, selection.active, encoding)?;
		if selection.is_empty() && self.engine_cursor == Some(pos) {
			return None;
		}
		Some(ViewportCommand::SetCursor { pos })
	}

	/// The engine cursor moved. Returns the host selection and reveal that
	/// mirror it.
	pub fn on_engine_cursor(
		&mut self,
		text: &Rope,
		cursor: &EngineCursor,
		reveal: CursorReveal,
		encoding: OffsetEncoding,
	) -> Option<CursorUpdate> {
		self.engine_cursor = Some(cursor.pos);

		let selection = match (visual_kind(&cursor.mode), cursor.anchor) {
			(Some(kind), Some(anchor)) => visual_selection(text, kind, anchor, cursor.pos, encoding)?,
			_ => Selection::caret(engine_caret(text, cursor.pos, encoding)?),
		};
		let selection = (self.host_selection != Some(selection)).then(|| {
			self.host_selection = Some(selection);
			selection
		});

		let line = cursor.pos.line;
		let reveal = match reveal {
			CursorReveal::Center => Some((line, RevealKind::Center)),
			CursorReveal::Natural => self
				.visible
				.filter(|&(top, bottom)| line < top || line > bottom)
				.map(|_| (line, RevealKind::Minimal)),
		};

		(selection.is_some() || reveal.is_some()).then_some(CursorUpdate { selection, reveal })
	}
}

/// Host selection covering an engine visual selection.
fn visual_selection(
	text: &Rope,
	kind: VisualKind,
	anchor: EnginePos,
	cursor: EnginePos,
	encoding: OffsetEncoding,
) -> Option<Selection> {
	let forward = cursor >= anchor;
	let (anchor, active) = match kind {
		VisualKind::Charwise => {
			let anchor = engine_to_char(text, anchor)?;
			let cursor = engine_to_char(text, cursor)?;
			let len = text.len_chars();
			if forward {
				(anchor, (cursor + 1).min(len))
			} else {
				((anchor + 1).min(len), cursor)
			}
		}
		VisualKind::Linewise => {
			let line_start = |line: u32| text.line_to_char(line as usize);
			let line_end = |line: u32| line_start(line) + line_len_chars(text, line as usize);
			if (anchor.line as usize) >= text.len_lines() || (cursor.line as usize) >= text.len_lines() {
				return None;
			}
			if forward {
				(line_start(anchor.line), line_end(cursor.line))
			} else {
				(line_end(anchor.line), line_start(cursor.line))
			}
		}
	};

	Some(Selection {
		anchor: char_to_position(text, anchor, encoding)?,
		active: char_to_position(text, active, encoding)?,
	})
}

/// Host position of an engine position, clamped into the text.
fn engine_caret(text: &Rope, pos: EnginePos, encoding: OffsetEncoding) -> Option<Position> {
	char_to_position(text, engine_to_char(text, pos)?, encoding)
}
