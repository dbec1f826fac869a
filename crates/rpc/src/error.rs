use std::io;

use serde_json::Value;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible transport errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The channel is closed. Every call that was in flight when the stream
	/// went away resolves with this.
	#[error("rpc channel closed")]
	Closed,
	/// Input/output errors from the underlying stream.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// A message could not be encoded.
	#[error("encode failed: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	/// The peer sent bytes that are not valid msgpack.
	#[error("decode failed: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
	/// The peer sent valid msgpack that is not a msgpack-RPC message.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// The peer answered a call with an error.
	#[error("remote error: {message}")]
	Remote {
		/// Human readable message extracted from the error payload.
		message: String,
		/// The raw error payload.
		value: Value,
	},
}

impl Error {
	/// Builds a [`Error::Remote`] from an error payload.
	///
	/// The engine reports errors as `[kind, message]`; anything else is
	/// rendered as-is.
	pub fn remote(value: Value) -> Self {
		let message = match &value {
			Value::Array(parts) => match parts.as_slice() {
				[_, Value::String(msg)] => msg.clone(),
				_ => value.to_string(),
			},
			Value::String(msg) => msg.clone(),
			other => other.to_string(),
		};
		Self::Remote { message, value }
	}

	/// Returns true if this error means the channel is gone for good.
	pub fn is_closed(&self) -> bool {
		matches!(self, Self::Closed | Self::Io(_))
	}
}
