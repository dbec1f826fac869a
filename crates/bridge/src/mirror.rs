//! Per-document snapshots of both sides.

use ropey::Rope;

use crate::diff::{lines_to_text, text_to_lines};
use crate::host::DocumentId;

/// Engine buffer handle.
pub type BufferHandle = i64;

/// A line range reported by the engine that does not fit the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("line range {first}..{last} outside a buffer of {len} lines")]
pub struct InvalidRange {
	/// First replaced line.
	pub first: i64,
	/// End of the replaced lines, exclusive.
	pub last: i64,
	/// Lines in the snapshot.
	pub len: usize,
}

/// Last known text of a document on the host and in the engine.
///
/// Between sync operations both snapshots are equal. `tick` is the engine's
/// changedtick the engine snapshot corresponds to; `host_version` is the host
/// document version the host snapshot corresponds to.
#[derive(Debug, Clone)]
pub struct BufferMirror {
	doc: DocumentId,
	buf: BufferHandle,
	host: Rope,
	host_text: String,
	engine: Vec<String>,
	tick: u64,
	host_version: u64,
}

impl BufferMirror {
	/// A mirror whose sides both hold `text`.
	pub fn new(doc: DocumentId, buf: BufferHandle, text: String, tick: u64, host_version: u64) -> Self {
		Self {
			doc,
			buf,
			host: Rope::from_str(&text),
			engine: text_to_lines(&text),
			host_text: text,
			tick,
			host_version,
		}
	}

	/// Host document id.
	pub fn doc(&self) -> DocumentId {
		self.doc
	}

	/// Engine buffer handle.
	pub fn buf(&self) -> BufferHandle {
		self.buf
	}

	/// Last known host text.
	pub fn host_text(&self) -> &str {
		&self.host_text
	}

	/// Last known host text as a rope.
	pub fn host_rope(&self) -> &Rope {
		&self.host
	}

	/// Last known engine lines.
	pub fn engine_lines(&self) -> &[String] {
		&self.engine
	}

	/// Last known engine text.
	pub fn engine_text(&self) -> String {
		lines_to_text(&self.engine)
	}

	/// Returns true if both snapshots hold the same text.
	pub fn is_consistent(&self) -> bool {
		self.engine_text() == self.host_text
	}

	/// Engine changedtick of the engine snapshot.
	pub fn tick(&self) -> u64 {
		self.tick
	}

	/// Host document version of the host snapshot.
	pub fn host_version(&self) -> u64 {
		self.host_version
	}

	/// Records the engine's changedtick. Never moves backwards.
	pub fn observe_tick(&mut self, tick: u64) {
		self.tick = self.tick.max(tick);
	}

	/// Records the host version. Never moves backwards.
	pub fn observe_host_version(&mut self, version: u64) {
		self.host_version = self.host_version.max(version);
	}

	/// Replaces the host snapshot with `text` at host `version`.
	pub fn set_host(&mut self, text: String, version: u64) {
		self.host = Rope::from_str(&text);
		self.host_text = text;
		self.observe_host_version(version);
	}

	/// Replaces the engine snapshot.
	pub fn set_engine(&mut self, lines: Vec<String>) {
		self.engine = lines;
	}

	/// Sets both snapshots to `text` at engine `tick`. The host version is
	/// left alone.
	pub fn settle(&mut self, text: String, tick: u64) {
		self.engine = text_to_lines(&text);
		self.host = Rope::from_str(&text);
		self.host_text = text;
		self.tick = tick;
	}

	/// The engine caught up with the host snapshot at `tick`.
	pub fn engine_reached_host(&mut self, tick: u64) {
		self.engine = text_to_lines(&self.host_text);
		self.tick = tick;
	}

	/// Replaces engine lines `first..last` with `lines`. A negative `last`
	/// means the end of the buffer.
	///
	/// # Errors
	///
	/// [`InvalidRange`] if the range does not fit; the snapshot is unchanged.
	pub fn splice_engine(&mut self, first: i64, last: i64, lines: Vec<String>) -> Result<(), InvalidRange> {
		let len = self.engine.len();
		let invalid = InvalidRange { first, last, len };
		let first = usize::try_from(first).map_err(|_| invalid)?;
		let last = if last < 0 { len } else { usize::try_from(last).map_err(|_| invalid)? };
		if first > last || last > len {
			return Err(invalid);
		}

		self.engine.splice(first..last, lines);
		if self.engine.is_empty() {
			self.engine.push(String::new());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests;
