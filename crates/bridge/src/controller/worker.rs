//! Per-document worker: applies that document's events one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::engine::{EngineApi, EngineEvent};
use crate::host::{DocumentId, HostEditor, HostEvent};
use crate::mirror::BufferHandle;
use crate::sync::BufferSync;
use crate::viewport::ViewportState;

/// Work queued for a document.
#[derive(Debug)]
pub(super) enum Job {
	Host(HostEvent),
	Engine(EngineEvent),
}

/// How a worker gets its engine buffer.
pub(super) enum WorkerStart {
	/// Loaded during startup.
	Primed(BufferSync),
	/// Opened while running; load `text` at host `version` first.
	Open { version: u64, text: String },
}

/// Shared by every worker of a session.
#[derive(Clone)]
pub(super) struct WorkerContext {
	pub(super) api: EngineApi,
	pub(super) host: Arc<dyn HostEditor>,
	pub(super) config: Arc<SessionConfig>,
	/// Buffer shown in the engine window.
	pub(super) active: Arc<AtomicI64>,
	/// Reports buffers of documents opened while running.
	pub(super) bound_tx: mpsc::UnboundedSender<(DocumentId, BufferHandle)>,
	pub(super) cancel: CancellationToken,
}

struct Worker {
	ctx: WorkerContext,
	sync: BufferSync,
	viewport: ViewportState,
}

/// Runs a document's queue until it closes, the document is closed, or the
/// session is cancelled. Work cut short by cancellation is dropped without
/// touching the host.
pub(super) async fn run(ctx: WorkerContext, doc: DocumentId, start: WorkerStart, mut rx: mpsc::UnboundedReceiver<Job>) {
	let sync = match start {
		WorkerStart::Primed(sync) => sync,
		WorkerStart::Open { version, text } => {
			let prime = BufferSync::prime(&ctx.api, doc, version, text, ctx.config.offset_encoding);
			let sync = tokio::select! {
				_ = ctx.cancel.cancelled() => return,
				res = prime => res,
			};
			match sync {
				Ok(sync) => {
					let _ = ctx.bound_tx.send((doc, sync.buf()));
					sync
				}
				Err(e) => {
					tracing::warn!(%doc, error = %e, "failed to load document into the engine");
					return;
				}
			}
		}
	};

	let cancel = ctx.cancel.clone();
	let mut worker = Worker {
		viewport: ViewportState::new(ctx.config.launch.height),
		ctx,
		sync,
	};

	loop {
		let job = tokio::select! {
			_ = cancel.cancelled() => break,
			job = rx.recv() => match job {
				Some(job) => job,
				None => break,
			},
		};
		let outcome = tokio::select! {
			_ = cancel.cancelled() => break,
			outcome = worker.handle(job) => outcome,
		};
		match outcome {
			Ok(true) => {}
			Ok(false) => break,
			Err(e) if e.is_closed() => {
				tracing::debug!(%doc, "engine channel closed; worker stopping");
				break;
			}
			Err(e) => tracing::warn!(%doc, error = %e, "document sync step failed"),
		}
	}
	tracing::trace!(%doc, "worker stopped");
}

impl Worker {
	/// Handles one job. Returns false once the document is closed.
	async fn handle(&mut self, job: Job) -> tandem_rpc::Result<bool> {
		let doc = self.sync.doc();
		let host = self.ctx.host.clone();
		let config = self.ctx.config.clone();
		let encoding = config.offset_encoding;

		match job {
			Job::Host(HostEvent::Changed { version, text, .. }) => {
				let outcome = self.sync.host_changed(&self.ctx.api, &*host, version, text).await?;
				tracing::trace!(%doc, ?outcome, "host change");
			}
			Job::Host(HostEvent::Activated { .. }) => self.activate().await?,
			Job::Host(HostEvent::SelectionChanged { selection, kind, .. }) => {
				self.activate().await?;
				let command = self.viewport.on_host_selection(
					self.sync.mirror().host_rope(),
					selection,
					kind,
					config.mouse_visual_selection,
					encoding,
				);
				if let Some(command) = command {
					self.ctx.api.run(&command).await?;
				}
			}
			Job::Host(HostEvent::VisibleRangeChanged { top, bottom, .. }) => {
				self.activate().await?;
				for command in self.viewport.on_visible_range(top, bottom) {
					self.ctx.api.run(&command).await?;
				}
			}
			Job::Host(HostEvent::Closed { .. }) => {
				self.sync.close(&self.ctx.api).await?;
				let _ = self
					.ctx
					.active
					.compare_exchange(self.sync.buf(), 0, Ordering::SeqCst, Ordering::SeqCst);
				return Ok(false);
			}
			Job::Host(HostEvent::Opened { .. }) => {}
			Job::Engine(EngineEvent::Lines {
				tick,
				first,
				last,
				lines,
				more,
				..
			}) => {
				let outcome = self
					.sync
					.engine_lines(&self.ctx.api, &*host, tick, first, last, lines, more)
					.await?;
				tracing::trace!(%doc, ?outcome, "engine change");
			}
			Job::Engine(EngineEvent::ChangedTick { tick, .. }) => self.sync.engine_tick(tick),
			Job::Engine(EngineEvent::Detach { .. }) => {
				self.sync.reattach(&self.ctx.api, &*host).await?;
			}
			Job::Engine(EngineEvent::Cursor { cursor, .. }) => {
				let update =
					self.viewport
						.on_engine_cursor(self.sync.mirror().host_rope(), &cursor, config.cursor_reveal, encoding);
				if let Some(update) = update {
					if let Some(selection) = update.selection {
						host.set_selection(doc, selection).await;
					}
					if let Some((line, kind)) = update.reveal {
						host.reveal(doc, line, kind).await;
					}
				}
			}
			Job::Engine(EngineEvent::Highlights { spans, .. }) => {
				let decorations = config.highlights.translate(self.sync.mirror().host_rope(), &spans, encoding);
				host.set_decorations(doc, decorations).await;
			}
			Job::Engine(EngineEvent::Mode { .. } | EngineEvent::Error { .. }) => {}
		}
		Ok(true)
	}

	/// Shows this document's buffer in the engine window.
	async fn activate(&mut self) -> tandem_rpc::Result<()> {
		let buf = self.sync.buf();
		if self.ctx.active.swap(buf, Ordering::SeqCst) != buf {
			tracing::debug!(doc = %self.sync.doc(), buf, "engine window switched");
			self.ctx.api.win_set_buf(buf).await?;
			self.viewport.reset_window();
		}
		Ok(())
	}
}
