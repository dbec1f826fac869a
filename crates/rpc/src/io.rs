use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::client::{Handlers, Outbound};
use crate::protocol::{CounterIdGen, Message};
use crate::{Error, Result};

const READ_BUF_CAPACITY: usize = 16 * 1024;

/// Runs the I/O loop for a single peer.
///
/// Outbound messages are written in queue order by a separate writer task,
/// so a slow write never holds up reading. Inbound responses resolve their
/// pending call; notifications and requests go to the registered handlers on
/// this task, so they are observed in arrival order.
pub(crate) async fn run<R, W>(
	mut reader: R,
	writer: W,
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
	handlers: Arc<Handlers>,
	shutdown: CancellationToken,
) -> Result<()>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let (frames_tx, frames_rx) = mpsc::unbounded_channel();
	let writer_task = tokio::spawn(write_loop(writer, frames_rx, shutdown.clone()));

	let mut read_buf = BytesMut::with_capacity(READ_BUF_CAPACITY);
	let mut pending: HashMap<u32, oneshot::Sender<Result<Value>>> = HashMap::new();
	let mut ids = CounterIdGen::new();

	let result = loop {
		tokio::select! {
			biased;

			_ = shutdown.cancelled() => {
				tracing::debug!(pending = pending.len(), "rpc channel closed");
				break Ok(());
			}

			out = outbound_rx.recv() => {
				let Some(out) = out else {
					tracing::debug!("all rpc handles dropped");
					break Ok(());
				};
				let frame = match out {
					Outbound::Call { method, params, response_tx } => {
						let id = ids.next();
						pending.insert(id, response_tx);
						Message::Request { id, method, params }
					}
					Outbound::Notify { method, params } => Message::Notification { method, params },
				};
				if frames_tx.send(frame).is_err() {
					break Ok(());
				}
			}

			read = Message::read(&mut reader, &mut read_buf) => match read {
				Ok(Some(msg)) => dispatch(msg, &mut pending, &handlers, &frames_tx),
				Ok(None) => {
					tracing::debug!(pending = pending.len(), "rpc peer closed the stream");
					break Ok(());
				}
				Err(e) => {
					tracing::error!(error = %e, "rpc read failed; closing channel");
					break Err(e);
				}
			}
		}
	};

	shutdown.cancel();

	for (_, tx) in pending.drain() {
		let _ = tx.send(Err(Error::Closed));
	}

	outbound_rx.close();
	while let Ok(out) = outbound_rx.try_recv() {
		if let Outbound::Call { response_tx, .. } = out {
			let _ = response_tx.send(Err(Error::Closed));
		}
	}

	drop(frames_tx);
	let written = match writer_task.await {
		Ok(written) => written,
		Err(e) => Err(Error::Io(std::io::Error::other(e))),
	};
	result.and(written)
}

/// Writes frames until the queue ends or the channel closes. A failed write
/// closes the channel.
async fn write_loop<W>(
	mut writer: W,
	mut frames: mpsc::UnboundedReceiver<Message>,
	shutdown: CancellationToken,
) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let result = loop {
		let frame = tokio::select! {
			biased;
			_ = shutdown.cancelled() => None,
			frame = frames.recv() => frame,
		};
		let Some(frame) = frame else {
			break Ok(());
		};
		if let Err(e) = frame.write(&mut writer).await {
			tracing::error!(error = %e, "rpc write failed; closing channel");
			shutdown.cancel();
			break Err(e);
		}
	};

	let _ = writer.shutdown().await;
	result
}

/// Routes one inbound message. Replies to peer requests are queued for the
/// writer.
fn dispatch(
	msg: Message,
	pending: &mut HashMap<u32, oneshot::Sender<Result<Value>>>,
	handlers: &Handlers,
	frames: &mpsc::UnboundedSender<Message>,
) {
	match msg {
		Message::Response { id, error, result } => {
			let Some(tx) = pending.remove(&id) else {
				tracing::warn!(id, "response for unknown request");
				return;
			};
			let outcome = if error.is_null() { Ok(result) } else { Err(Error::remote(error)) };
			// The caller may have given up waiting.
			let _ = tx.send(outcome);
		}
		Message::Notification { method, params } => handlers.dispatch_notification(&method, params),
		Message::Request { id, method, params } => {
			let (error, result) = match handlers.dispatch_request(&method, params) {
				Ok(result) => (Value::Null, result),
				Err(error) => (error, Value::Null),
			};
			let _ = frames.send(Message::Response { id, error, result });
		}
	}
}
