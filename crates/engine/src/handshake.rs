//! Capability exchange performed right after the engine starts.

use std::fmt;
use std::time::Duration;

use serde_json::{Value, json};
use tandem_rpc::RpcClient;

use crate::{EngineProcess, LaunchError};

/// Oldest engine release the bridge works with.
pub const MIN_VERSION: EngineVersion = EngineVersion {
	major: 0,
	minor: 9,
	patch: 0,
};

/// How long a closed channel may precede the process exit notice.
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// Engine release number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
	/// Major component.
	pub major: u64,
	/// Minor component.
	pub minor: u64,
	/// Patch component.
	pub patch: u64,
}

impl fmt::Display for EngineVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// What the engine reported about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
	/// RPC channel id the engine assigned to this client.
	pub channel_id: i64,
	/// Engine release.
	pub version: EngineVersion,
}

impl EngineInfo {
	/// Parses the `[channel_id, metadata]` answer to `nvim_get_api_info`.
	///
	/// # Errors
	///
	/// [`LaunchError::Incompatible`] if the answer is malformed or the engine
	/// is older than [`MIN_VERSION`].
	pub fn from_api_info(value: &Value) -> Result<Self, LaunchError> {
		let malformed = || LaunchError::Incompatible(format!("unexpected api info: {value}"));
		let Some([channel, metadata]) = value.as_array().map(Vec::as_slice) else {
			return Err(malformed());
		};
		let channel_id = channel.as_i64().ok_or_else(malformed)?;
		let version = metadata.get("version").ok_or_else(malformed)?;
		let component = |name: &str| version.get(name).and_then(Value::as_u64).ok_or_else(malformed);
		let version = EngineVersion {
			major: component("major")?,
			minor: component("minor")?,
			patch: component("patch")?,
		};

		if version < MIN_VERSION {
			return Err(LaunchError::Incompatible(format!("engine {version} is older than {MIN_VERSION}")));
		}
		Ok(Self { channel_id, version })
	}
}

/// Queries the engine's capabilities and announces this client.
///
/// Races the exchange against process exit and `timeout`, so a crashing or
/// mute engine fails the launch instead of hanging it.
///
/// # Errors
///
/// - [`LaunchError::ExitedEarly`] if the process exits first.
/// - [`LaunchError::HandshakeTimeout`] if the engine does not answer in time.
/// - [`LaunchError::Handshake`] if the request fails otherwise.
/// - [`LaunchError::Incompatible`] if the answer is unusable.
pub async fn handshake(
	rpc: &RpcClient,
	process: &EngineProcess,
	client_name: &str,
	timeout: Duration,
) -> Result<EngineInfo, LaunchError> {
	let exchange = async {
		let answer = rpc.call("nvim_get_api_info", vec![]).await?;
		let info = EngineInfo::from_api_info(&answer)?;
		rpc.notify(
			"nvim_set_client_info",
			vec![
				json!(client_name),
				json!({"major": 0, "minor": 1, "patch": 0}),
				json!("ui"),
				json!({}),
				json!({}),
			],
		)?;
		Ok::<_, LaunchError>(info)
	};

	let outcome = tokio::select! {
		res = tokio::time::timeout(timeout, exchange) => res.unwrap_or(Err(LaunchError::HandshakeTimeout(timeout))),
		status = process.wait() => Err(LaunchError::ExitedEarly { status }),
	};

	match outcome {
		Err(LaunchError::Handshake(err)) if err.is_closed() => match tokio::time::timeout(EXIT_SETTLE, process.wait()).await {
			Ok(status) => Err(LaunchError::ExitedEarly { status }),
			Err(_) => Err(LaunchError::Handshake(err)),
		},
		Ok(info) => {
			tracing::info!(channel = info.channel_id, version = %info.version, "engine handshake complete");
			Ok(info)
		}
		other => other,
	}
}
