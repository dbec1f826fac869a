//! Supervision of the engine child process.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};

/// How the engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
	/// Exit code, if the process exited normally.
	pub code: Option<i32>,
	/// True if the process was force-killed by us.
	pub killed: bool,
}

impl ExitState {
	/// The process is gone but its status could not be collected.
	pub const UNKNOWN: Self = Self {
		code: None,
		killed: false,
	};

	/// A normal exit with `code`.
	pub const fn exited(code: i32) -> Self {
		Self {
			code: Some(code),
			killed: false,
		}
	}

	fn from_status(status: ExitStatus, killed: bool) -> Self {
		Self {
			code: status.code(),
			killed,
		}
	}
}

impl fmt::Display for ExitState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.killed, self.code) {
			(true, _) => f.write_str("killed"),
			(false, Some(code)) => write!(f, "exit code {code}"),
			(false, None) => f.write_str("terminated by signal"),
		}
	}
}

/// Handle to the engine process.
///
/// A supervisor task owns the child and always reaps it; this handle only
/// observes the exit and can ask for a kill. Dropping every handle kills the
/// process.
#[derive(Debug, Clone)]
pub struct EngineProcess {
	pid: Option<u32>,
	exit_rx: watch::Receiver<Option<ExitState>>,
	kill_tx: mpsc::UnboundedSender<()>,
}

/// Drives the exit of an in-memory [`EngineProcess`].
#[derive(Debug, Clone)]
pub struct ProcessExit(Arc<watch::Sender<Option<ExitState>>>);

impl ProcessExit {
	/// Marks the process as exited with `code`. Later calls are ignored.
	pub fn exit(&self, code: i32) {
		settle(&self.0, ExitState::exited(code));
	}
}

fn settle(tx: &watch::Sender<Option<ExitState>>, state: ExitState) {
	tx.send_if_modified(|current| {
		if current.is_some() {
			return false;
		}
		*current = Some(state);
		true
	});
}

impl EngineProcess {
	/// Starts supervising `child`.
	pub(crate) fn supervise(mut child: Child) -> Self {
		let pid = child.id();
		let (exit_tx, exit_rx) = watch::channel(None);
		let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

		tokio::spawn(async move {
			let mut killed = false;
			let status = loop {
				tokio::select! {
					status = child.wait() => break status,
					_ = kill_rx.recv(), if !killed => {
						killed = true;
						if let Err(e) = child.start_kill() {
							tracing::warn!(pid, error = %e, "failed to kill engine process");
						}
					}
				}
			};

			let state = match status {
				Ok(status) => ExitState::from_status(status, killed),
				Err(e) => {
					tracing::error!(pid, error = %e, "failed to wait on engine process");
					ExitState { killed, ..ExitState::UNKNOWN }
				}
			};
			tracing::info!(pid, status = %state, "engine process exited");
			let _ = exit_tx.send(Some(state));
		});

		Self { pid, exit_rx, kill_tx }
	}

	/// A process with no OS counterpart, for engines served in memory.
	///
	/// [`kill`](Self::kill) settles it as killed; the returned [`ProcessExit`]
	/// settles it with an exit code.
	pub fn in_memory() -> (Self, ProcessExit) {
		let (exit_tx, exit_rx) = watch::channel(None);
		let exit_tx = Arc::new(exit_tx);
		let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

		let on_kill = exit_tx.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = kill_rx.recv() => settle(&on_kill, ExitState { killed: true, ..ExitState::UNKNOWN }),
				_ = on_kill.closed() => {}
			}
		});

		(
			Self {
				pid: None,
				exit_rx,
				kill_tx,
			},
			ProcessExit(exit_tx),
		)
	}

	/// OS process id, if there is one.
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Returns true until the process has exited and been reaped.
	pub fn is_alive(&self) -> bool {
		self.exit_rx.borrow().is_none() && self.exit_rx.has_changed().is_ok()
	}

	/// Exit status, if the process has exited.
	pub fn exit_state(&self) -> Option<ExitState> {
		*self.exit_rx.borrow()
	}

	/// Waits for the process to exit and be reaped.
	pub async fn wait(&self) -> ExitState {
		let mut rx = self.exit_rx.clone();
		let state = rx.wait_for(Option::is_some).await.ok().and_then(|state| *state);
		state.unwrap_or(ExitState::UNKNOWN)
	}

	/// Asks for the process to be force-killed. Does not wait.
	pub fn kill(&self) {
		let _ = self.kill_tx.send(());
	}
}
