//! Buffer synchronization between one host document and its engine buffer.
//!
//! Host changes reach the engine as one guarded batch per change: the batch
//! only applies if the engine buffer is still at the changedtick last seen
//! here. Engine changes reach the host as one edit batch per notification,
//! guarded the same way by the host document version. Host change events at
//! or below the last known host version are echoes of edits already mirrored
//! and are dropped. Anything that does not line up ends in a full resync from
//! the engine.

use tandem_rpc::Result;

use crate::diff::{diff, lines_to_text, text_to_lines, to_engine_edits, to_host_edits};
use crate::engine::{EngineApi, Guarded};
use crate::host::{DocumentId, HostEditor};
use crate::mirror::{BufferHandle, BufferMirror};
use crate::position::OffsetEncoding;

/// What a sync step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	/// Nothing to do; both sides already agreed.
	Unchanged,
	/// The change was carried over incrementally.
	Applied,
	/// The sides had diverged and the host was reset from the engine.
	Resynced,
}

/// Synchronizer for one document.
#[derive(Debug)]
pub struct BufferSync {
	mirror: BufferMirror,
	encoding: OffsetEncoding,
}

impl BufferSync {
	/// Creates an engine buffer holding `text`, the host's document at
	/// `version`, and starts tracking it.
	pub async fn prime(
		engine: &EngineApi,
		doc: DocumentId,
		version: u64,
		text: String,
		encoding: OffsetEncoding,
	) -> Result<Self> {
		let buf = engine.create_buf().await?;
		engine.buf_set_lines(buf, 0, -1, &text_to_lines(&text)).await?;
		engine.buf_attach(buf).await?;
		let tick = engine.changedtick(buf).await?;
		tracing::debug!(%doc, buf, tick, version, "document primed");

		Ok(Self {
			mirror: BufferMirror::new(doc, buf, text, tick, version),
			encoding,
		})
	}

	/// Host document id.
	pub fn doc(&self) -> DocumentId {
		self.mirror.doc()
	}

	/// Engine buffer handle.
	pub fn buf(&self) -> BufferHandle {
		self.mirror.buf()
	}

	/// Current snapshots.
	pub fn mirror(&self) -> &BufferMirror {
		&self.mirror
	}

	/// The host document now holds `text` at `version`.
	pub async fn host_changed(
		&mut self,
		engine: &EngineApi,
		host: &dyn HostEditor,
		version: u64,
		text: String,
	) -> Result<SyncOutcome> {
		let doc = self.doc();
		let known = self.mirror.host_version();
		if version <= known {
			tracing::trace!(%doc, version, known, "host change already reflected");
			return Ok(SyncOutcome::Unchanged);
		}
		if text == self.mirror.host_text() {
			self.mirror.observe_host_version(version);
			return Ok(SyncOutcome::Unchanged);
		}
		if !self.mirror.is_consistent() {
			tracing::debug!(%doc, version, "host change over a diverged mirror");
			self.mirror.set_host(text, version);
			return self.resync(engine, host).await;
		}

		let edits = diff(self.mirror.host_text(), &text);
		let batch = to_engine_edits(self.mirror.host_text(), &edits);
		self.mirror.set_host(text, version);
		let Some(batch) = batch else {
			tracing::warn!(%doc, "host diff does not fit the snapshot");
			return self.resync(engine, host).await;
		};

		let base = self.mirror.tick();
		match engine.apply_guarded(self.buf(), base, &batch).await {
			Ok(Guarded::Applied { tick }) => {
				tracing::trace!(%doc, version, base, tick, edits = batch.len(), "host change applied");
				self.mirror.engine_reached_host(tick);
				Ok(SyncOutcome::Applied)
			}
			Ok(Guarded::Stale) => {
				tracing::debug!(%doc, version, base, "engine moved during host change; resyncing");
				self.resync(engine, host).await
			}
			Err(e) if e.is_closed() => Err(e),
			Err(e) => {
				tracing::warn!(%doc, version, error = %e, "host change failed part way; resyncing");
				self.resync(engine, host).await
			}
		}
	}

	/// The engine replaced lines `first..last` with `lines`.
	#[allow(clippy::too_many_arguments, reason = "mirrors the notification fields")]
	pub async fn engine_lines(
		&mut self,
		engine: &EngineApi,
		host: &dyn HostEditor,
		tick: Option<u64>,
		first: i64,
		last: i64,
		lines: Vec<String>,
		more: bool,
	) -> Result<SyncOutcome> {
		let doc = self.doc();
		if let Some(tick) = tick
			&& tick <= self.mirror.tick()
		{
			tracing::trace!(%doc, tick, known = self.mirror.tick(), "engine change already reflected");
			return Ok(SyncOutcome::Unchanged);
		}

		if let Err(e) = self.mirror.splice_engine(first, last, lines) {
			tracing::warn!(%doc, error = %e, "engine change does not fit the snapshot; resyncing");
			return self.resync(engine, host).await;
		}
		if let Some(tick) = tick {
			self.mirror.observe_tick(tick);
		}
		if more {
			return Ok(SyncOutcome::Unchanged);
		}

		self.push_to_host(engine, host).await
	}

	/// The engine's changedtick moved without a text change.
	pub fn engine_tick(&mut self, tick: u64) {
		self.mirror.observe_tick(tick);
	}

	/// The engine stopped reporting changes; attach again and resync.
	pub async fn reattach(&mut self, engine: &EngineApi, host: &dyn HostEditor) -> Result<SyncOutcome> {
		tracing::info!(doc = %self.doc(), buf = self.buf(), "engine buffer detached; reattaching");
		engine.buf_attach(self.buf()).await?;
		self.resync(engine, host).await
	}

	/// Carries the engine snapshot over to the host.
	async fn push_to_host(&mut self, engine: &EngineApi, host: &dyn HostEditor) -> Result<SyncOutcome> {
		let text = self.mirror.engine_text();
		if text == self.mirror.host_text() {
			return Ok(SyncOutcome::Unchanged);
		}

		let edits = diff(self.mirror.host_text(), &text);
		let Some(batch) = to_host_edits(self.mirror.host_rope(), &edits, self.encoding) else {
			return self.resync(engine, host).await;
		};
		let base = self.mirror.host_version();
		match host.apply_edits(self.doc(), base, batch).await {
			Some(version) => {
				tracing::trace!(doc = %self.doc(), base, version, "engine change applied to host");
				self.mirror.set_host(text, version);
				Ok(SyncOutcome::Applied)
			}
			None => {
				tracing::debug!(doc = %self.doc(), base, "host refused engine edits; resyncing");
				self.resync(engine, host).await
			}
		}
	}

	/// Replaces the host text with the engine's current text.
	///
	/// If the host refuses, the engine is reset to the host text instead so
	/// the sides agree either way.
	pub async fn resync(&mut self, engine: &EngineApi, host: &dyn HostEditor) -> Result<SyncOutcome> {
		let doc = self.doc();
		let buf = self.buf();
		let (lines, tick) = engine.lines_and_tick(buf).await?;
		let text = lines_to_text(&lines);

		if text != self.mirror.host_text() {
			let Some(version) = host.replace_text(doc, &text).await else {
				tracing::warn!(%doc, "host refused resync; pushing host text to the engine");
				let host_text = self.mirror.host_text().to_owned();
				engine.buf_set_lines(buf, 0, -1, &text_to_lines(&host_text)).await?;
				let tick = engine.changedtick(buf).await?;
				self.mirror.settle(host_text, tick);
				return Ok(SyncOutcome::Resynced);
			};
			self.mirror.observe_host_version(version);
		}

		tracing::debug!(%doc, tick, version = self.mirror.host_version(), "resynced from engine");
		self.mirror.settle(text, tick);
		Ok(SyncOutcome::Resynced)
	}

	/// Deletes the engine buffer.
	pub async fn close(&self, engine: &EngineApi) -> Result<()> {
		tracing::debug!(doc = %self.doc(), buf = self.buf(), "document closed");
		engine.buf_delete(self.buf()).await
	}
}
