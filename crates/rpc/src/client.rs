//! Public handle to a msgpack-RPC peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

type NotificationHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
type RequestHandler = Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, Value> + Send + Sync>;

/// Outbound work queued for the I/O loop.
pub(crate) enum Outbound {
	Call {
		method: String,
		params: Vec<Value>,
		response_tx: oneshot::Sender<Result<Value>>,
	},
	Notify {
		method: String,
		params: Vec<Value>,
	},
}

/// Handlers for messages the peer sends on its own.
#[derive(Default)]
pub(crate) struct Handlers {
	notifications: RwLock<HashMap<String, Vec<NotificationHandler>>>,
	requests: RwLock<HashMap<String, RequestHandler>>,
}

impl Handlers {
	/// Runs every handler registered for `method`, in registration order.
	pub(crate) fn dispatch_notification(&self, method: &str, params: Vec<Value>) {
		let handlers = self.notifications.read().get(method).cloned();
		match handlers.as_deref() {
			None | Some([]) => tracing::debug!(method, "unhandled rpc notification"),
			Some([only]) => only(params),
			Some(many) => {
				for handler in many {
					handler(params.clone());
				}
			}
		}
	}

	/// Answers an engine-initiated request.
	pub(crate) fn dispatch_request(&self, method: &str, params: Vec<Value>) -> std::result::Result<Value, Value> {
		let handler = self.requests.read().get(method).cloned();
		match handler {
			Some(handler) => handler(params),
			None => {
				tracing::warn!(method, "unhandled rpc request");
				Err(Value::Array(vec![Value::from(0), Value::String(format!("no handler for {method}"))]))
			}
		}
	}
}

/// Handle to a msgpack-RPC peer.
///
/// The I/O runs in a separate task; this handle only queues outbound work, so
/// it is cheap to clone and every clone talks to the same peer. Calls from
/// different tasks interleave freely: each one suspends only its caller.
#[derive(Clone)]
pub struct RpcClient {
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	handlers: Arc<Handlers>,
	shutdown: CancellationToken,
}

impl std::fmt::Debug for RpcClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpcClient").field("closed", &self.is_closed()).finish_non_exhaustive()
	}
}

impl RpcClient {
	/// Starts the I/O loop over `reader`/`writer` and returns a handle to it.
	///
	/// The returned task resolves when the channel closes, with the error that
	/// closed it if any. Must be called from within a Tokio runtime.
	pub fn connect<R, W>(reader: R, writer: W) -> (Self, JoinHandle<Result<()>>)
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let handlers = Arc::new(Handlers::default());
		let shutdown = CancellationToken::new();

		let task = tokio::spawn(crate::io::run(reader, writer, outbound_rx, handlers.clone(), shutdown.clone()));

		(
			Self {
				outbound_tx,
				handlers,
				shutdown,
			},
			task,
		)
	}

	/// Sends a request and waits for the matching response.
	///
	/// There is no per-call timeout: an unresponsive peer is a process level
	/// failure and is handled by whoever owns the process.
	///
	/// # Errors
	///
	/// - `Error::Closed` if the channel is closed before the response arrives.
	/// - `Error::Remote` if the peer answers with an error.
	pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
		let (response_tx, response_rx) = oneshot::channel();
		self.outbound_tx
			.send(Outbound::Call {
				method: method.to_owned(),
				params,
				response_tx,
			})
			.map_err(|_| Error::Closed)?;
		response_rx.await.map_err(|_| Error::Closed)?
	}

	/// Queues a notification.
	///
	/// # Errors
	///
	/// `Error::Closed` if the channel is already closed.
	pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
		self.outbound_tx
			.send(Outbound::Notify {
				method: method.to_owned(),
				params,
			})
			.map_err(|_| Error::Closed)
	}

	/// Registers a handler for every notification named `method`.
	///
	/// Handlers run on the I/O task in arrival order and must not block.
	/// Forward into a channel to do async work.
	pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
	where
		F: Fn(Vec<Value>) + Send + Sync + 'static,
	{
		self.handlers.notifications.write().entry(method.into()).or_default().push(Arc::new(handler));
	}

	/// Registers the handler answering requests named `method`, replacing any
	/// previous one. `Err` payloads are sent back as the response error.
	pub fn on_request<F>(&self, method: impl Into<String>, handler: F)
	where
		F: Fn(Vec<Value>) -> std::result::Result<Value, Value> + Send + Sync + 'static,
	{
		self.handlers.requests.write().insert(method.into(), Arc::new(handler));
	}

	/// Closes the channel. Pending and queued calls resolve with
	/// `Error::Closed`.
	pub fn close(&self) {
		self.shutdown.cancel();
	}

	/// Returns true once the channel is closed, locally or by the peer.
	pub fn is_closed(&self) -> bool {
		self.shutdown.is_cancelled() || self.outbound_tx.is_closed()
	}

	/// Resolves once the channel is closed.
	pub async fn closed(&self) {
		tokio::select! {
			_ = self.shutdown.cancelled() => {}
			_ = self.outbound_tx.closed() => {}
		}
	}
}
