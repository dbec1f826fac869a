//! Session lifecycle and event routing.
//!
//! A [`Controller`] owns one engine session:
//! `Uninitialized → Initializing → Running → Disposing → Disposed`.
//!
//! While running, a dispatcher task routes host events and engine
//! notifications to one worker task per document. Each worker handles its
//! queue in order, so a document never sees a host edit and an engine edit
//! applied at the same time, while different documents proceed
//! independently.

mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Weak};

use tandem_engine::{EngineConnection, EngineProcess, Launcher};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::engine::{self, EngineApi, EngineEvent};
use crate::error::{Error, InitError, Result};
use crate::host::{DocumentId, HostEditor, HostEvent};
use crate::mirror::BufferHandle;
use crate::sync::BufferSync;
use worker::{Job, WorkerContext, WorkerStart};

/// Context key telling the host whether control keys go to the engine in
/// normal mode.
pub const CTRL_KEYS_NORMAL: &str = "tandem.ctrlKeysNormal";
/// Context key telling the host whether control keys go to the engine in
/// insert mode.
pub const CTRL_KEYS_INSERT: &str = "tandem.ctrlKeysInsert";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Created, not started.
	Uninitialized,
	/// Starting the engine and loading documents.
	Initializing,
	/// Forwarding events in both directions.
	Running,
	/// Tearing down.
	Disposing,
	/// Finished; the engine is gone.
	Disposed,
}

/// Entry point for host events.
///
/// Events are forwarded only while the session is running; anything sent
/// before or after is dropped.
#[derive(Clone)]
pub struct HostEventSink {
	tx: mpsc::UnboundedSender<HostEvent>,
	state: watch::Receiver<SessionState>,
}

impl fmt::Debug for HostEventSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostEventSink").field("state", &*self.state.borrow()).finish()
	}
}

impl HostEventSink {
	/// Queues `event`. Returns false if it was dropped.
	pub fn send(&self, event: HostEvent) -> bool {
		let state = *self.state.borrow();
		if state != SessionState::Running {
			tracing::debug!(?state, doc = %event.doc(), "host event dropped outside running session");
			return false;
		}
		self.tx.send(event).is_ok()
	}
}

struct Session {
	conn: EngineConnection,
	cancel: CancellationToken,
	dispatcher: JoinHandle<()>,
}

struct Inner {
	config: Arc<SessionConfig>,
	host: Arc<dyn HostEditor>,
	launcher: Arc<dyn Launcher>,
	state: watch::Sender<SessionState>,
	host_tx: mpsc::UnboundedSender<HostEvent>,
	host_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
	session: Mutex<Option<Session>>,
}

/// One bridge session between the host and an engine.
///
/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct Controller {
	inner: Arc<Inner>,
}

impl fmt::Debug for Controller {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Controller")
			.field("state", &self.state())
			.field("config", &self.inner.config)
			.finish_non_exhaustive()
	}
}

/// What a successful startup produced.
struct Started {
	docs: Vec<BufferSync>,
	engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Controller {
	/// Creates an uninitialized controller.
	pub fn new(config: Arc<SessionConfig>, host: Arc<dyn HostEditor>, launcher: Arc<dyn Launcher>) -> Self {
		let (host_tx, host_rx) = mpsc::unbounded_channel();
		Self {
			inner: Arc::new(Inner {
				config,
				host,
				launcher,
				state: watch::Sender::new(SessionState::Uninitialized),
				host_tx,
				host_rx: parking_lot::Mutex::new(Some(host_rx)),
				session: Mutex::new(None),
			}),
		}
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		*self.inner.state.borrow()
	}

	/// Watches lifecycle changes.
	pub fn watch_state(&self) -> watch::Receiver<SessionState> {
		self.inner.state.subscribe()
	}

	/// The sink the host pushes its events into.
	pub fn events(&self) -> HostEventSink {
		HostEventSink {
			tx: self.inner.host_tx.clone(),
			state: self.inner.state.subscribe(),
		}
	}

	fn set_state(&self, state: SessionState) {
		let previous = self.inner.state.send_replace(state);
		if previous != state {
			tracing::debug!(from = ?previous, to = ?state, "session state");
		}
	}

	/// Starts the engine, loads every open document and begins forwarding
	/// events.
	///
	/// Any failure stops whatever was started, leaves the controller
	/// `Disposed` and shows the host exactly one error message.
	///
	/// # Errors
	///
	/// - [`Error::InvalidState`] if the controller was already started.
	/// - [`Error::Init`] if startup failed.
	pub async fn init(&self) -> Result<()> {
		let claimed = self.inner.state.send_if_modified(|state| {
			if *state == SessionState::Uninitialized {
				*state = SessionState::Initializing;
				true
			} else {
				false
			}
		});
		if !claimed {
			return Err(Error::InvalidState(self.state()));
		}

		let config = &self.inner.config;
		self.inner.host.set_context(CTRL_KEYS_NORMAL, config.ctrl_keys_normal);
		self.inner.host.set_context(CTRL_KEYS_INSERT, config.ctrl_keys_insert);

		let conn = match self.inner.launcher.launch(&config.launch).await {
			Ok(conn) => conn,
			Err(e) => return Err(self.fail(e.into())),
		};
		let started = match self.setup(&conn).await {
			Ok(started) => started,
			Err(e) => {
				conn.shutdown(config.stop_grace).await;
				return Err(self.fail(e));
			}
		};

		let mut slot = self.inner.session.lock().await;
		if self.state() != SessionState::Initializing {
			tracing::debug!("session disposed during startup");
			conn.shutdown(config.stop_grace).await;
			return Err(Error::InvalidState(self.state()));
		}
		let host_rx = self.inner.host_rx.lock().take();
		let Some(host_rx) = host_rx else {
			conn.shutdown(config.stop_grace).await;
			return Err(Error::InvalidState(self.state()));
		};

		let cancel = CancellationToken::new();
		let docs = started.docs.len();
		let dispatcher = Dispatcher::new(self, &conn, cancel.clone(), started.docs);
		let dispatcher = tokio::spawn(dispatcher.run(host_rx, started.engine_rx));
		*slot = Some(Session {
			conn,
			cancel,
			dispatcher,
		});
		self.set_state(SessionState::Running);
		tracing::info!(docs, "session running");
		Ok(())
	}

	async fn setup(&self, conn: &EngineConnection) -> Result<Started, InitError> {
		let config = &self.inner.config;
		let api = EngineApi::new(conn.rpc.clone());

		let (engine_tx, engine_rx) = mpsc::unbounded_channel();
		engine::subscribe(&conn.rpc, engine_tx);
		api.install_runtime(conn.info.channel_id).await.map_err(InitError::Setup)?;
		api.ui_attach(config.launch.width, config.launch.height)
			.await
			.map_err(InitError::Setup)?;
		api.win_set_size(config.launch.width, config.launch.height)
			.await
			.map_err(InitError::Setup)?;

		let mut docs = Vec::new();
		for doc in self.inner.host.open_documents() {
			let id = doc.id;
			let sync = BufferSync::prime(&api, id, doc.version, doc.text, config.offset_encoding)
				.await
				.map_err(|source| InitError::Prime { doc: id, source })?;
			docs.push(sync);
		}
		Ok(Started { docs, engine_rx })
	}

	fn fail(&self, err: InitError) -> Error {
		tracing::error!(error = %err, "session failed to start");
		self.set_state(SessionState::Disposed);
		self.inner.host.show_error(&format!("tandem: {err}"));
		Error::Init(err)
	}

	/// Stops the session: host events are no longer accepted, in-flight work
	/// is abandoned, then the engine is stopped and reaped.
	///
	/// Safe to call in any state and more than once.
	pub async fn dispose(&self) {
		let mut slot = self.inner.session.lock().await;
		let Some(session) = slot.take() else {
			if self.state() != SessionState::Disposed {
				self.set_state(SessionState::Disposed);
			}
			return;
		};

		self.set_state(SessionState::Disposing);
		session.cancel.cancel();
		if let Err(e) = session.dispatcher.await {
			tracing::error!(error = %e, "dispatcher task failed");
		}
		let status = session.conn.shutdown(self.inner.config.stop_grace).await;
		tracing::info!(%status, "engine stopped");
		self.set_state(SessionState::Disposed);
	}
}

/// Routes events to per-document workers.
struct Dispatcher {
	controller: Weak<Inner>,
	ctx: WorkerContext,
	process: EngineProcess,
	cancel: CancellationToken,
	workers: HashMap<DocumentId, mpsc::UnboundedSender<Job>>,
	bufs: HashMap<BufferHandle, DocumentId>,
	bound_rx: mpsc::UnboundedReceiver<(DocumentId, BufferHandle)>,
	tasks: JoinSet<()>,
}

impl Dispatcher {
	fn new(controller: &Controller, conn: &EngineConnection, cancel: CancellationToken, docs: Vec<BufferSync>) -> Self {
		let (bound_tx, bound_rx) = mpsc::unbounded_channel();
		let ctx = WorkerContext {
			api: EngineApi::new(conn.rpc.clone()),
			host: controller.inner.host.clone(),
			config: controller.inner.config.clone(),
			active: Arc::new(AtomicI64::new(0)),
			bound_tx,
			cancel: cancel.clone(),
		};
		let mut dispatcher = Self {
			controller: Arc::downgrade(&controller.inner),
			ctx,
			process: conn.process.clone(),
			cancel,
			workers: HashMap::new(),
			bufs: HashMap::new(),
			bound_rx,
			tasks: JoinSet::new(),
		};
		for sync in docs {
			dispatcher.bufs.insert(sync.buf(), sync.doc());
			dispatcher.spawn_worker(sync.doc(), WorkerStart::Primed(sync));
		}
		dispatcher
	}

	fn spawn_worker(&mut self, doc: DocumentId, start: WorkerStart) {
		let (tx, rx) = mpsc::unbounded_channel();
		self.workers.insert(doc, tx);
		self.tasks.spawn(worker::run(self.ctx.clone(), doc, start, rx));
	}

	async fn run(
		mut self,
		mut host_rx: mpsc::UnboundedReceiver<HostEvent>,
		mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
	) {
		let rpc = self.ctx.api.rpc().clone();
		let crash = loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break None,
				status = self.process.wait() => break Some(format!("engine exited ({status})")),
				_ = rpc.closed() => break Some("engine connection closed".to_owned()),
				Some((doc, buf)) = self.bound_rx.recv() => {
					self.bufs.insert(buf, doc);
				}
				Some(event) = host_rx.recv() => self.route_host(event),
				Some(event) = engine_rx.recv() => self.route_engine(event),
				Some(res) = self.tasks.join_next() => {
					if let Err(e) = res {
						tracing::error!(error = %e, "document worker failed");
					}
				}
			}
		};

		self.cancel.cancel();
		while self.tasks.join_next().await.is_some() {}

		if let Some(reason) = crash {
			tracing::error!(%reason, "engine lost while running");
			let Some(inner) = self.controller.upgrade() else {
				return;
			};
			let controller = Controller { inner };
			tokio::spawn(async move {
				controller.dispose().await;
				controller.inner.host.engine_exited(&reason);
			});
		}
	}

	fn route_host(&mut self, event: HostEvent) {
		let doc = event.doc();
		match event {
			HostEvent::Opened { doc, version, text } => {
				if let Some(tx) = self.workers.get(&doc) {
					let _ = tx.send(Job::Host(HostEvent::Changed { doc, version, text }));
				} else {
					self.spawn_worker(doc, WorkerStart::Open { version, text });
				}
			}
			HostEvent::Closed { doc } => {
				if let Some(tx) = self.workers.remove(&doc) {
					let _ = tx.send(Job::Host(HostEvent::Closed { doc }));
				}
				self.bufs.retain(|_, d| *d != doc);
			}
			event => match self.workers.get(&doc) {
				Some(tx) => {
					let _ = tx.send(Job::Host(event));
				}
				None => tracing::debug!(%doc, "event for untracked document"),
			},
		}
	}

	fn route_engine(&mut self, event: EngineEvent) {
		match event {
			EngineEvent::Mode { mode } => self.ctx.host.mode_changed(&mode),
			EngineEvent::Error { kind, message } => tracing::warn!(kind, %message, "engine reported an error"),
			event => {
				let Some(buf) = event.buf() else {
					return;
				};
				let worker = self.bufs.get(&buf).and_then(|doc| self.workers.get(doc));
				match worker {
					Some(tx) => {
						let _ = tx.send(Job::Engine(event));
					}
					None => tracing::debug!(buf, "event for untracked engine buffer"),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests;
