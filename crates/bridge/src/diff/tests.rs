use pretty_assertions::assert_eq;

use super::*;
use crate::position::Position;

/// Applies `edits` sequentially to `lines`, the way the engine does.
fn apply_engine_edits(mut lines: Vec<String>, edits: &[EngineEdit]) -> Vec<String> {
	for edit in edits {
		let (sl, sc) = (edit.start.line as usize, edit.start.col as usize);
		let (el, ec) = (edit.end.line as usize, edit.end.col as usize);
		let prefix = lines[sl][..sc].to_owned();
		let suffix = lines[el][ec..].to_owned();
		let mut replacement = edit.lines.clone();
		replacement[0].insert_str(0, &prefix);
		replacement.last_mut().unwrap().push_str(&suffix);
		lines.splice(sl..=el, replacement);
	}
	lines
}

fn round_trip(old: &str, new: &str) {
	let edits = diff(old, new);
	let engine = to_engine_edits(old, &edits).unwrap();
	assert_eq!(lines_to_text(&apply_engine_edits(text_to_lines(old), &engine)), new);
}

#[test]
fn test_identical_texts_have_no_edits() {
	assert!(diff("same\ntext", "same\ntext").is_empty());
}

#[test]
fn test_insert_into_empty_document() {
	let edits = diff("", "hello");
	assert_eq!(
		edits,
		vec![TextEdit {
			start: 0,
			end: 0,
			text: "hello".into()
		}]
	);
	assert_eq!(
		to_engine_edits("", &edits).unwrap(),
		vec![EngineEdit {
			start: EnginePos::new(0, 0),
			end: EnginePos::new(0, 0),
			lines: vec!["hello".into()],
		}]
	);
}

#[test]
fn test_adjacent_changes_are_merged() {
	let edits = diff("abcdef", "abXYef");
	assert_eq!(
		edits,
		vec![TextEdit {
			start: 2,
			end: 4,
			text: "XY".into()
		}]
	);
}

#[test]
fn test_sequential_engine_edits_account_for_earlier_ones() {
	round_trip("one\ntwo\nthree", "one!\nthree\nfour");
	round_trip("a\nb\nc\nd", "x\nb\nc\ny\nz");
	round_trip("héllo wörld", "hello world");
	round_trip("line\n", "");
	round_trip("", "\n\n");
}

#[test]
fn test_engine_columns_are_byte_offsets() {
	let old = "é\nb";
	let edits = diff(old, "é!\nb");
	let engine = to_engine_edits(old, &edits).unwrap();
	assert_eq!(engine[0].start, EnginePos::new(0, 2));
}

#[test]
fn test_host_edits_use_original_coordinates() {
	let old = "one\ntwo\nthree";
	let edits = diff(old, "ONE\ntwo\nTHREE");
	let host = to_host_edits(&Rope::from_str(old), &edits, OffsetEncoding::Utf16).unwrap();

	assert!(host.len() >= 2);
	assert_eq!(host[0].range.start.line, 0);
	assert_eq!(host.last().unwrap().range.end, Position::new(2, 5));
}

#[test]
fn test_edits_outside_the_text_are_rejected() {
	let bogus = [TextEdit {
		start: 10,
		end: 12,
		text: String::new(),
	}];
	assert_eq!(to_engine_edits("short", &bogus), None);
	assert_eq!(to_host_edits(&Rope::from_str("short"), &bogus, OffsetEncoding::Utf16), None);
}

#[test]
fn test_text_lines_conversion() {
	assert_eq!(text_to_lines(""), vec![String::new()]);
	assert_eq!(text_to_lines("a\n"), vec!["a".to_owned(), String::new()]);
	assert_eq!(lines_to_text(&text_to_lines("a\nb\n")), "a\nb\n");
}
