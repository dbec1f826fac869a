//! Engine launcher abstraction for production and testing.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tandem_rpc::RpcClient;
use tokio::io::AsyncBufReadExt;

use crate::{DirectSpawn, EngineInfo, EngineProcess, ExitState, LaunchError, SpawnStrategy, engine_args, handshake};

/// Everything needed to start one engine.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
	/// Engine executable, as configured.
	pub executable: PathBuf,
	/// Custom init script passed with `-u`.
	pub init_path: Option<PathBuf>,
	/// Bridge runtime script sourced before user config.
	pub runtime_path: Option<PathBuf>,
	/// Fixed virtual screen width.
	pub width: u32,
	/// Fixed virtual screen height.
	pub height: u32,
	/// Upper bound on the capability handshake.
	pub handshake_timeout: Duration,
	/// Name announced to the engine.
	pub client_name: String,
	/// How the command line is built.
	pub spawn: Arc<dyn SpawnStrategy>,
}

impl LaunchConfig {
	/// A config for `executable` with default sizing and direct spawning.
	pub fn new(executable: impl Into<PathBuf>) -> Self {
		Self {
			executable: executable.into(),
			init_path: None,
			runtime_path: None,
			width: 1000,
			height: 201,
			handshake_timeout: Duration::from_secs(10),
			client_name: "tandem".to_owned(),
			spawn: Arc::new(DirectSpawn),
		}
	}
}

/// A started engine that answered the handshake.
#[derive(Debug, Clone)]
pub struct EngineConnection {
	/// RPC channel to the engine.
	pub rpc: RpcClient,
	/// The engine process.
	pub process: EngineProcess,
	/// Capabilities reported during the handshake.
	pub info: EngineInfo,
}

impl EngineConnection {
	/// Stops the engine.
	///
	/// Sends the quit command, waits up to `grace` for the process to exit,
	/// force-kills it otherwise, and waits for the reap. The RPC channel is
	/// closed last, so every pending call has been rejected by the time this
	/// returns.
	pub async fn shutdown(&self, grace: Duration) -> ExitState {
		let state = if self.process.is_alive() {
			if let Err(e) = self.rpc.notify("nvim_command", vec![json!("qa!")]) {
				tracing::debug!(error = %e, "quit request not delivered");
			}
			match tokio::time::timeout(grace, self.process.wait()).await {
				Ok(state) => state,
				Err(_) => {
					tracing::warn!(pid = self.process.pid(), ?grace, "engine ignored quit request; killing");
					self.process.kill();
					self.process.wait().await
				}
			}
		} else {
			self.process.wait().await
		};

		self.rpc.close();
		state
	}
}

/// Boxed launch future.
pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<EngineConnection, LaunchError>> + Send>>;

/// Starts engines.
///
/// This abstraction lets the bridge use real subprocesses in production and
/// in-memory engines in tests.
pub trait Launcher: Send + Sync + 'static {
	/// Starts an engine and completes the handshake.
	fn launch(&self, config: &LaunchConfig) -> LaunchFuture;
}

/// Production launcher that spawns real engine processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
	/// Create a new process launcher.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

impl Launcher for ProcessLauncher {
	fn launch(&self, config: &LaunchConfig) -> LaunchFuture {
		let config = config.clone();
		Box::pin(async move {
			let mut cmd = config.spawn.command(&config.executable)?;
			let program = cmd.as_std().get_program().to_string_lossy().into_owned();
			cmd.args(engine_args(&config, config.spawn.as_ref()))
				.stdin(Stdio::piped())
				.stdout(Stdio::piped())
				.stderr(Stdio::piped())
				.kill_on_drop(true);

			#[cfg(unix)]
			cmd.process_group(0);

			let spawn_err = |source| LaunchError::Spawn {
				program: program.clone(),
				source,
			};
			let mut child = cmd.spawn().map_err(spawn_err)?;
			let pipe = |name: &str| spawn_err(io::Error::other(format!("{name} not captured")));
			let stdin = child.stdin.take().ok_or_else(|| pipe("stdin"))?;
			let stdout = child.stdout.take().ok_or_else(|| pipe("stdout"))?;
			let stderr = child.stderr.take().ok_or_else(|| pipe("stderr"))?;

			let process = EngineProcess::supervise(child);
			tracing::info!(pid = process.pid(), %program, "engine process started");

			let pid = process.pid();
			tokio::spawn(async move {
				let mut lines = tokio::io::BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					tracing::warn!(pid, stderr = %line, "engine stderr");
				}
			});

			let (rpc, io_task) = RpcClient::connect(stdout, stdin);
			tokio::spawn(async move {
				match io_task.await {
					Ok(Ok(())) => tracing::debug!(pid, "engine rpc loop ended"),
					Ok(Err(e)) => tracing::warn!(pid, error = %e, "engine rpc loop failed"),
					Err(e) => tracing::error!(pid, error = %e, "engine rpc loop panicked"),
				}
			});

			match handshake(&rpc, &process, &config.client_name, config.handshake_timeout).await {
				Ok(info) => Ok(EngineConnection { rpc, process, info }),
				Err(err) => {
					tracing::error!(pid, error = %err, "engine launch failed");
					rpc.close();
					process.kill();
					process.wait().await;
					Err(err)
				}
			}
		})
	}
}
