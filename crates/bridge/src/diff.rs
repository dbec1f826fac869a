//! Text diffing into replacement batches for either side.

use std::time::Duration;

use ropey::Rope;
use similar::{Algorithm, DiffTag, TextDiff};

use crate::host::HostEdit;
use crate::position::{EnginePos, OffsetEncoding, Range, char_to_engine, char_to_position};

/// Bound on diff time; past it the diff degrades to coarser replacements.
const DIFF_TIMEOUT: Duration = Duration::from_millis(200);

/// A replacement of old chars `start..end` with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
	/// First replaced char of the old text.
	pub start: usize,
	/// One past the last replaced char of the old text.
	pub end: usize,
	/// Replacement.
	pub text: String,
}

/// A replacement in engine coordinates, as `nvim_buf_set_text` takes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEdit {
	/// Start of the replaced range.
	pub start: EnginePos,
	/// End of the replaced range, exclusive.
	pub end: EnginePos,
	/// Replacement split on `\n`.
	pub lines: Vec<String>,
}

/// Replacements turning `old` into `new`, sorted, non-overlapping, in old
/// coordinates. Adjacent changes are merged.
pub fn diff(old: &str, new: &str) -> Vec<TextEdit> {
	if old == new {
		return Vec::new();
	}

	let diff = TextDiff::configure()
		.algorithm(Algorithm::Myers)
		.timeout(DIFF_TIMEOUT)
		.diff_chars(old, new);
	let new_tokens = diff.new_slices();

	let mut edits: Vec<TextEdit> = Vec::new();
	for op in diff.ops() {
		let (tag, old_range, new_range) = op.as_tag_tuple();
		if tag == DiffTag::Equal {
			continue;
		}
		let text = new_tokens[new_range].concat();
		match edits.last_mut() {
			Some(last) if last.end == old_range.start => {
				last.end = old_range.end;
				last.text.push_str(&text);
			}
			_ => edits.push(TextEdit {
				start: old_range.start,
				end: old_range.end,
				text,
			}),
		}
	}
	edits
}

/// Converts `edits` of `old` into engine edits meant to be applied one after
/// another: each edit's range is valid after the previous ones are applied.
///
/// Returns `None` if an edit falls outside `old`.
pub fn to_engine_edits(old: &str, edits: &[TextEdit]) -> Option<Vec<EngineEdit>> {
	let mut scratch = Rope::from_str(old);
	let mut inserted = 0;
	let mut removed = 0;
	let mut out = Vec::with_capacity(edits.len());

	for edit in edits {
		let start = edit.start.checked_sub(removed)? + inserted;
		let end = start + edit.end.checked_sub(edit.start)?;
		if end > scratch.len_chars() {
			return None;
		}
		out.push(EngineEdit {
			start: char_to_engine(&scratch, start)?,
			end: char_to_engine(&scratch, end)?,
			lines: edit.text.split('\n').map(str::to_owned).collect(),
		});

		scratch.remove(start..end);
		scratch.insert(start, &edit.text);
		removed += edit.end - edit.start;
		inserted += edit.text.chars().count();
	}
	Some(out)
}

/// Converts `edits` of `old` into a host batch in original coordinates.
///
/// Returns `None` if an edit falls outside `old`.
pub fn to_host_edits(old: &Rope, edits: &[TextEdit], encoding: OffsetEncoding) -> Option<Vec<HostEdit>> {
	edits
		.iter()
		.map(|edit| {
			Some(HostEdit {
				range: Range::new(
					char_to_position(old, edit.start, encoding)?,
					char_to_position(old, edit.end, encoding)?,
				),
				text: edit.text.clone(),
			})
		})
		.collect()
}

/// Splits text into engine lines.
pub fn text_to_lines(text: &str) -> Vec<String> {
	text.split('\n').map(str::to_owned).collect()
}

/// Joins engine lines into text.
pub fn lines_to_text(lines: &[String]) -> String {
	lines.join("\n")
}

#[cfg(test)]
mod tests;
