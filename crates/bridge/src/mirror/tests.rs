use super::*;

fn lines(items: &[&str]) -> Vec<String> {
	items.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn test_new_mirror_is_consistent() {
	let mirror = BufferMirror::new(DocumentId(1), 4, "a\nb\n".into(), 3, 7);
	assert!(mirror.is_consistent());
	assert_eq!(mirror.engine_lines(), lines(&["a", "b", ""]));
	assert_eq!(mirror.tick(), 3);
	assert_eq!(mirror.host_version(), 7);
}

#[test]
fn test_splice_engine_lines() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, "one\ntwo\nthree".into(), 1, 1);

	mirror.splice_engine(1, 2, lines(&["TWO", "two and a half"])).unwrap();
	assert_eq!(mirror.engine_text(), "one\nTWO\ntwo and a half\nthree");
	assert!(!mirror.is_consistent());

	mirror.splice_engine(0, -1, lines(&["all"])).unwrap();
	assert_eq!(mirror.engine_text(), "all");

	mirror.splice_engine(0, 1, Vec::new()).unwrap();
	assert_eq!(mirror.engine_lines(), lines(&[""]));
}

#[test]
fn test_splice_rejects_out_of_range() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, "x".into(), 1, 1);

	let err = mirror.splice_engine(3, 4, lines(&["y"])).unwrap_err();
	assert_eq!(err.len, 1);
	assert!(mirror.splice_engine(-2, 0, Vec::new()).is_err());
	assert!(mirror.splice_engine(1, 0, Vec::new()).is_err());
	assert_eq!(mirror.engine_text(), "x");
}

#[test]
fn test_tick_never_moves_backwards() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, String::new(), 5, 1);
	mirror.observe_tick(3);
	assert_eq!(mirror.tick(), 5);
	mirror.observe_tick(8);
	assert_eq!(mirror.tick(), 8);
}

#[test]
fn test_settle_sets_both_sides() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, "old".into(), 5, 1);
	mirror.splice_engine(0, 1, lines(&["engine"])).unwrap();
	mirror.settle("new\ntext".into(), 9);

	assert!(mirror.is_consistent());
	assert_eq!(mirror.host_rope().len_lines(), 2);
	assert_eq!(mirror.tick(), 9);
}

#[test]
fn test_host_version_never_moves_backwards() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, "a".into(), 5, 3);

	mirror.set_host("ab".into(), 6);
	mirror.observe_host_version(4);
	assert_eq!(mirror.host_version(), 6);

	mirror.settle("abc".into(), 9);
	assert_eq!(mirror.host_version(), 6);
	assert_eq!(mirror.host_text(), "abc");
}

#[test]
fn test_engine_reached_host_copies_host_text() {
	let mut mirror = BufferMirror::new(DocumentId(1), 4, "a".into(), 5, 1);
	mirror.set_host("a\nb".into(), 2);
	assert!(!mirror.is_consistent());

	mirror.engine_reached_host(7);

	assert!(mirror.is_consistent());
	assert_eq!(mirror.engine_lines(), lines(&["a", "b"]));
	assert_eq!(mirror.tick(), 7);
}
