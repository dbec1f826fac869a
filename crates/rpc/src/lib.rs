//! msgpack-RPC transport for talking to an embedded editing engine.
//!
//! The engine is spawned as a child process and speaks msgpack-RPC over its
//! stdio. This crate turns that byte stream into a cloneable [`RpcClient`]:
//! * [`RpcClient::call`]: correlated request, resolves with the matching response
//! * [`RpcClient::notify`]: fire-and-forget message
//! * [`RpcClient::on_notification`]: ordered delivery of unsolicited messages
//! * [`RpcClient::on_request`]: answers for engine-initiated requests
//!
//! Values are carried as [`serde_json::Value`] so callers can build arguments
//! with `json!` and pattern match on results without a bespoke value type.

#![warn(missing_docs)]

mod client;
mod error;
mod io;
pub mod protocol;
mod wire;

pub use client::RpcClient;
pub use error::{Error, Result};
pub use protocol::{CounterIdGen, Message};
pub use serde_json::Value;
