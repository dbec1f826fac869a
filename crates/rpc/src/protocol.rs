//! msgpack-RPC message model and stream framing.
//!
//! Every message is a single msgpack array:
//! * request: `[0, msgid, method, params]`
//! * response: `[1, msgid, error, result]`
//! * notification: `[2, method, params]`
//!
//! msgpack values carry their own lengths, so the stream needs no extra
//! framing. [`Message::read`] decodes from an accumulating buffer and reads
//! more bytes whenever the buffered value is incomplete.

use std::io::{self, Cursor};

use bytes::{Buf, BytesMut};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::wire::WireValue;
use crate::{Error, Result};

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// Simple counter-based ID generator for outgoing requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub u32);

impl CounterIdGen {
	/// Creates a new counter starting at 0.
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Generates the next unique ID and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u32 {
		let id = self.0;
		self.0 = self.0.wrapping_add(1);
		id
	}
}

/// A single msgpack-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	/// A call expecting a response with the same id.
	Request {
		/// Correlation id.
		id: u32,
		/// Method name.
		method: String,
		/// Positional arguments.
		params: Vec<Value>,
	},
	/// The answer to a request.
	Response {
		/// Correlation id of the request being answered.
		id: u32,
		/// Error payload, `null` on success.
		error: Value,
		/// Result payload, `null` on error.
		result: Value,
	},
	/// A message that expects no answer.
	Notification {
		/// Method name.
		method: String,
		/// Positional arguments.
		params: Vec<Value>,
	},
}

impl Message {
	/// Renders this message as the array the wire format expects.
	pub fn to_value(&self) -> Value {
		match self {
			Self::Request { id, method, params } => json!([REQUEST, id, method, params]),
			Self::Response { id, error, result } => json!([RESPONSE, id, error, result]),
			Self::Notification { method, params } => json!([NOTIFICATION, method, params]),
		}
	}

	/// Classifies a decoded array as a message.
	///
	/// # Errors
	///
	/// `Error::Protocol` if the value is not a well formed msgpack-RPC message.
	pub fn from_value(value: Value) -> Result<Self> {
		let Value::Array(mut fields) = value else {
			return Err(Error::Protocol("message is not an array".into()));
		};
		let kind = fields
			.first()
			.and_then(Value::as_u64)
			.ok_or_else(|| Error::Protocol("missing message type".into()))?;

		match (kind, fields.len()) {
			(REQUEST, 4) => {
				let params = take_params(fields.pop())?;
				let method = take_method(fields.pop())?;
				let id = take_id(fields.pop())?;
				Ok(Self::Request { id, method, params })
			}
			(RESPONSE, 4) => {
				let result = fields.pop().unwrap_or_default();
				let error = fields.pop().unwrap_or_default();
				let id = take_id(fields.pop())?;
				Ok(Self::Response { id, error, result })
			}
			(NOTIFICATION, 3) => {
				let params = take_params(fields.pop())?;
				let method = take_method(fields.pop())?;
				Ok(Self::Notification { method, params })
			}
			(kind, len) => Err(Error::Protocol(format!("malformed message: type {kind} with {len} fields"))),
		}
	}

	/// Writes this message to `output` and flushes it.
	///
	/// # Errors
	///
	/// `Error::Encode` if the message cannot be encoded, `Error::Io` if the
	/// stream rejects the write.
	pub async fn write(&self, output: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
		let bytes = rmp_serde::to_vec(&self.to_value())?;
		output.write_all(&bytes).await?;
		output.flush().await?;
		Ok(())
	}

	/// Reads the next complete message from `input`.
	///
	/// `buf` carries bytes that were read but not yet consumed and must be
	/// reused across calls. Returns `Ok(None)` on a clean end of stream.
	/// Cancel safe: dropping the future never loses buffered bytes.
	///
	/// # Errors
	///
	/// - `Error::Io` when the stream fails.
	/// - `Error::Decode` when the peer sends invalid msgpack.
	/// - `Error::Protocol` when the stream ends in the middle of a message or
	///   the value is not a message.
	pub async fn read(input: &mut (impl AsyncRead + Unpin), buf: &mut BytesMut) -> Result<Option<Self>> {
		loop {
			if !buf.is_empty() {
				let mut cursor = Cursor::new(&buf[..]);
				match rmp_serde::from_read::<_, WireValue>(&mut cursor) {
					Ok(WireValue(value)) => {
						let consumed = usize::try_from(cursor.position()).unwrap_or(buf.len());
						buf.advance(consumed);
						return Self::from_value(value).map(Some);
					}
					Err(err) if is_incomplete(&err) => {}
					Err(err) => return Err(err.into()),
				}
			}

			if input.read_buf(buf).await? == 0 {
				return if buf.is_empty() {
					Ok(None)
				} else {
					Err(Error::Protocol(format!("stream ended inside a message ({} bytes buffered)", buf.len())))
				};
			}
		}
	}
}

fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
	use rmp_serde::decode::Error as DecodeError;
	match err {
		DecodeError::InvalidMarkerRead(e) | DecodeError::InvalidDataRead(e) => e.kind() == io::ErrorKind::UnexpectedEof,
		_ => false,
	}
}

fn take_id(value: Option<Value>) -> Result<u32> {
	value
		.as_ref()
		.and_then(Value::as_u64)
		.and_then(|id| u32::try_from(id).ok())
		.ok_or_else(|| Error::Protocol("invalid message id".into()))
}

fn take_method(value: Option<Value>) -> Result<String> {
	match value {
		Some(Value::String(method)) => Ok(method),
		_ => Err(Error::Protocol("method name is not a string".into())),
	}
}

fn take_params(value: Option<Value>) -> Result<Vec<Value>> {
	match value {
		Some(Value::Array(params)) => Ok(params),
		Some(Value::Null) | None => Ok(Vec::new()),
		Some(_) => Err(Error::Protocol("params is not an array".into())),
	}
}
