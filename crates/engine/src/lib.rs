//! Process management for the embedded editing engine.
//!
//! The engine is an external program speaking msgpack-RPC on its stdio. This
//! crate starts it, checks that it answers, and stops it again:
//! * [`SpawnStrategy`]: how the command line is built ([`DirectSpawn`], or
//!   [`WslSpawn`] to run the engine inside WSL from a Windows host)
//! * [`Launcher`]: produces a ready [`EngineConnection`]; [`ProcessLauncher`]
//!   spawns a real process, tests plug in in-memory engines
//! * [`EngineProcess`]: liveness, exit status and force-kill of the child
//! * [`EngineConnection::shutdown`]: graceful quit, bounded wait, kill, reap
//!
//! Nothing above this crate knows whether the engine runs directly or behind
//! an indirection layer: both yield the same byte stream wrapped in a
//! [`tandem_rpc::RpcClient`].

mod error;
mod handshake;
mod launcher;
mod process;
mod spawn;

pub use error::LaunchError;
pub use handshake::{EngineInfo, EngineVersion, MIN_VERSION, handshake};
pub use launcher::{EngineConnection, LaunchConfig, LaunchFuture, Launcher, ProcessLauncher};
pub use process::{EngineProcess, ExitState, ProcessExit};
pub use spawn::{DirectSpawn, SpawnStrategy, WslSpawn, engine_args, resolve_executable, to_wsl_path};
