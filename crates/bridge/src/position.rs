//! Conversions between host positions, engine positions and rope offsets.
//!
//! Host positions count columns in the host's [`OffsetEncoding`]. Engine
//! positions count columns in UTF-8 bytes. Both use 0-based lines separated
//! by `\n` only.

use ropey::{Rope, RopeSlice};
use serde::Deserialize;

/// Column unit used by the host editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OffsetEncoding {
	/// UTF-8 byte offsets.
	#[serde(rename = "utf-8")]
	Utf8,
	/// UTF-16 code unit offsets.
	#[default]
	#[serde(rename = "utf-16")]
	Utf16,
	/// Unicode codepoint offsets.
	#[serde(rename = "utf-32")]
	Utf32,
}

/// A host position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Position {
	/// 0-based line.
	pub line: u32,
	/// 0-based column in the host's encoding.
	pub character: u32,
}

impl Position {
	/// Creates a position.
	pub const fn new(line: u32, character: u32) -> Self {
		Self { line, character }
	}
}

/// A half-open host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Range {
	/// Inclusive start.
	pub start: Position,
	/// Exclusive end.
	pub end: Position,
}

impl Range {
	/// Creates a range.
	pub const fn new(start: Position, end: Position) -> Self {
		Self { start, end }
	}

	/// Returns true if the range selects nothing.
	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}
}

/// An engine position: 0-based line and UTF-8 byte column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct EnginePos {
	/// 0-based line.
	pub line: u32,
	/// Byte offset in the line.
	pub col: u32,
}

impl EnginePos {
	/// Creates an engine position.
	pub const fn new(line: u32, col: u32) -> Self {
		Self { line, col }
	}
}

/// Line content without its trailing newline.
fn line_content(text: &Rope, line: usize) -> RopeSlice<'_> {
	let slice = text.line(line);
	let len = slice.len_chars();
	if len > 0 && slice.char(len - 1) == '\n' {
		slice.slice(..len - 1)
	} else {
		slice
	}
}

fn to_u32(n: usize) -> u32 {
	u32::try_from(n).unwrap_or(u32::MAX)
}

/// Converts a host position to a char index. Columns past the end of the
/// line clamp to the line end; lines past the end of the text are `None`.
pub fn position_to_char(text: &Rope, pos: Position, encoding: OffsetEncoding) -> Option<usize> {
	let line = pos.line as usize;
	if line >= text.len_lines() {
		return None;
	}
	let content = line_content(text, line);
	let col = pos.character as usize;
	let offset = match encoding {
		OffsetEncoding::Utf8 => content.byte_to_char(col.min(content.len_bytes())),
		OffsetEncoding::Utf16 => content.utf16_cu_to_char(col.min(content.len_utf16_cu())),
		OffsetEncoding::Utf32 => col.min(content.len_chars()),
	};
	Some(text.line_to_char(line) + offset)
}

/// Converts a char index to a host position.
pub fn char_to_position(text: &Rope, char_idx: usize, encoding: OffsetEncoding) -> Option<Position> {
	if char_idx > text.len_chars() {
		return None;
	}
	let line = text.char_to_line(char_idx);
	let col = char_idx - text.line_to_char(line);
	let slice = text.line(line);
	let character = match encoding {
		OffsetEncoding::Utf8 => slice.char_to_byte(col),
		OffsetEncoding::Utf16 => slice.char_to_utf16_cu(col),
		OffsetEncoding::Utf32 => col,
	};
	Some(Position::new(to_u32(line), to_u32(character)))
}

/// Converts an engine position to a char index, clamping like
/// [`position_to_char`].
pub fn engine_to_char(text: &Rope, pos: EnginePos) -> Option<usize> {
	position_to_char(text, Position::new(pos.line, pos.col), OffsetEncoding::Utf8)
}

/// Converts a char index to an engine position.
pub fn char_to_engine(text: &Rope, char_idx: usize) -> Option<EnginePos> {
	char_to_position(text, char_idx, OffsetEncoding::Utf8).map(|p| EnginePos::new(p.line, p.character))
}

/// Converts an engine position to a host position.
pub fn engine_to_host(text: &Rope, pos: EnginePos, encoding: OffsetEncoding) -> Option<Position> {
	char_to_position(text, engine_to_char(text, pos)?, encoding)
}

/// Converts a host position to an engine position.
pub fn host_to_engine(text: &Rope, pos: Position, encoding: OffsetEncoding) -> Option<EnginePos> {
	char_to_engine(text, position_to_char(text, pos, encoding)?)
}

/// Number of chars on `line`, excluding the newline.
pub fn line_len_chars(text: &Rope, line: usize) -> usize {
	if line >= text.len_lines() {
		return 0;
	}
	line_content(text, line).len_chars()
}
