//! Typed access to the engine's RPC surface.
//!
//! [`EngineApi`] wraps the calls the bridge makes; [`EngineEvent`] is the
//! decoded form of everything the engine sends on its own.

use serde_json::{Value, json};
use tandem_rpc::{Error, Result, RpcClient};
use tokio::sync::mpsc;

use crate::diff::EngineEdit;
use crate::highlight::HighlightSpan;
use crate::mirror::BufferHandle;
use crate::position::EnginePos;
use crate::viewport::ViewportCommand;

/// Script installed at session start; reports cursor, mode and highlights.
const RUNTIME: &str = include_str!("../runtime/tandem.lua");

/// Fails the surrounding atomic batch when the buffer moved past `tick`.
pub(crate) const TICK_GUARD: &str = "local buf, tick = ...
if vim.api.nvim_buf_get_changedtick(buf) ~= tick then
	error('tandem: stale changedtick')
end";

/// Starts a charwise visual selection from `anchor` to `cursor`.
const VISUAL_SELECT: &str = "local arow, acol, crow, ccol = ...
vim.api.nvim_feedkeys(vim.api.nvim_replace_termcodes('<Esc>', true, false, true), 'nx', false)
vim.api.nvim_win_set_cursor(0, { arow, acol })
vim.cmd('normal! v')
vim.api.nvim_win_set_cursor(0, { crow, ccol })";

/// Notification methods decoded by [`EngineEvent::parse`].
pub const EVENT_METHODS: &[&str] = &[
	"nvim_buf_lines_event",
	"nvim_buf_changedtick_event",
	"nvim_buf_detach_event",
	"tandem_cursor",
	"tandem_highlights",
	"tandem_mode",
	"nvim_error_event",
];

/// Result of a guarded edit batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded {
	/// The batch ran; the buffer is now at `tick`.
	Applied {
		/// Changedtick after the batch.
		tick: u64,
	},
	/// The buffer had moved on; nothing was applied.
	Stale,
}

/// Engine cursor as reported by the runtime script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCursor {
	/// Cursor position.
	pub pos: EnginePos,
	/// Engine mode string (`n`, `i`, `v`, `V`, ...).
	pub mode: String,
	/// Start of the visual selection, in visual modes.
	pub anchor: Option<EnginePos>,
}

/// Something the engine reported on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
	/// Lines `first..last` of a buffer were replaced by `lines`.
	Lines {
		/// Buffer.
		buf: BufferHandle,
		/// Changedtick after the change, if the engine reported one.
		tick: Option<u64>,
		/// First replaced line.
		first: i64,
		/// End of replaced lines, exclusive; `-1` for the whole buffer.
		last: i64,
		/// Replacement lines.
		lines: Vec<String>,
		/// More events for the same change follow.
		more: bool,
	},
	/// The changedtick moved without a text change.
	ChangedTick {
		/// Buffer.
		buf: BufferHandle,
		/// New changedtick.
		tick: u64,
	},
	/// The engine stopped sending updates for a buffer.
	Detach {
		/// Buffer.
		buf: BufferHandle,
	},
	/// The cursor moved.
	Cursor {
		/// Buffer the cursor is in.
		buf: BufferHandle,
		/// Cursor state.
		cursor: EngineCursor,
	},
	/// Highlights of a buffer's visible region.
	Highlights {
		/// Buffer.
		buf: BufferHandle,
		/// Every highlighted span.
		spans: Vec<HighlightSpan>,
	},
	/// The mode changed.
	Mode {
		/// New mode string.
		mode: String,
	},
	/// The engine reported an error for a notification we sent.
	Error {
		/// Error kind.
		kind: i64,
		/// Message.
		message: String,
	},
}

fn int(value: &Value) -> Option<i64> {
	value.as_i64()
}

fn pos(line: &Value, col: &Value) -> Option<EnginePos> {
	Some(EnginePos::new(
		u32::try_from(line.as_u64()?).ok()?,
		u32::try_from(col.as_u64()?).ok()?,
	))
}

fn string_list(value: &Value) -> Option<Vec<String>> {
	value.as_array()?.iter().map(|v| v.as_str().map(str::to_owned)).collect()
}

fn span(value: &Value) -> Option<HighlightSpan> {
	let [group, line, start, end] = value.as_array()?.as_slice() else {
		return None;
	};
	Some(HighlightSpan {
		group: group.as_str()?.to_owned(),
		line: u32::try_from(line.as_u64()?).ok()?,
		start_col: u32::try_from(start.as_u64()?).ok()?,
		end_col: u32::try_from(end.as_u64()?).ok()?,
	})
}

impl EngineEvent {
	/// Decodes a notification. Returns `None` for unknown methods and
	/// malformed parameters.
	pub fn parse(method: &str, params: &[Value]) -> Option<Self> {
		match (method, params) {
			("nvim_buf_lines_event", [buf, tick, first, last, lines, more, ..]) => Some(Self::Lines {
				buf: int(buf)?,
				tick: tick.as_u64(),
				first: int(first)?,
				last: int(last)?,
				lines: string_list(lines)?,
				more: more.as_bool()?,
			}),
			("nvim_buf_changedtick_event", [buf, tick, ..]) => Some(Self::ChangedTick {
				buf: int(buf)?,
				tick: tick.as_u64()?,
			}),
			("nvim_buf_detach_event", [buf, ..]) => Some(Self::Detach { buf: int(buf)? }),
			("tandem_cursor", [buf, line, col, mode, rest @ ..]) => {
				let anchor = match rest {
					[aline, acol, ..] => Some(pos(aline, acol)?),
					_ => None,
				};
				Some(Self::Cursor {
					buf: int(buf)?,
					cursor: EngineCursor {
						pos: pos(line, col)?,
						mode: mode.as_str()?.to_owned(),
						anchor,
					},
				})
			}
			("tandem_highlights", [buf, spans, ..]) => Some(Self::Highlights {
				buf: int(buf)?,
				spans: spans.as_array()?.iter().map(span).collect::<Option<_>>()?,
			}),
			("tandem_mode", [mode, ..]) => Some(Self::Mode {
				mode: mode.as_str()?.to_owned(),
			}),
			("nvim_error_event", [kind, message, ..]) => Some(Self::Error {
				kind: int(kind)?,
				message: message.as_str()?.to_owned(),
			}),
			_ => None,
		}
	}

	/// The buffer this event concerns, if any.
	pub fn buf(&self) -> Option<BufferHandle> {
		match self {
			Self::Lines { buf, .. }
			| Self::ChangedTick { buf, .. }
			| Self::Detach { buf }
			| Self::Cursor { buf, .. }
			| Self::Highlights { buf, .. } => Some(*buf),
			Self::Mode { .. } | Self::Error { .. } => None,
		}
	}
}

/// Forwards every engine notification the bridge understands into `tx`.
pub fn subscribe(rpc: &RpcClient, tx: mpsc::UnboundedSender<EngineEvent>) {
	for &method in EVENT_METHODS {
		let tx = tx.clone();
		rpc.on_notification(method, move |params| match EngineEvent::parse(method, &params) {
			Some(event) => {
				let _ = tx.send(event);
			}
			None => tracing::warn!(method, ?params, "malformed engine notification"),
		});
	}
}

fn protocol(what: &str, value: &Value) -> Error {
	Error::Protocol(format!("unexpected {what} result: {value}"))
}

/// Calls the bridge makes into the engine.
#[derive(Debug, Clone)]
pub struct EngineApi {
	rpc: RpcClient,
}

impl EngineApi {
	/// Wraps an RPC channel.
	pub fn new(rpc: RpcClient) -> Self {
		Self { rpc }
	}

	/// The underlying channel.
	pub fn rpc(&self) -> &RpcClient {
		&self.rpc
	}

	/// Runs Lua in the engine.
	pub async fn exec_lua(&self, code: &str, args: Vec<Value>) -> Result<Value> {
		self.rpc.call("nvim_exec_lua", vec![json!(code), Value::Array(args)]).await
	}

	/// Installs the runtime script reporting over `channel`.
	pub async fn install_runtime(&self, channel: i64) -> Result<()> {
		self.exec_lua(RUNTIME, vec![json!(channel)]).await?;
		Ok(())
	}

	/// Attaches as a UI with a fixed grid. Redraw events are discarded.
	pub async fn ui_attach(&self, width: u32, height: u32) -> Result<()> {
		self.rpc.on_notification("redraw", |_| {});
		self.rpc
			.call(
				"nvim_ui_attach",
				vec![json!(width), json!(height), json!({ "rgb": true, "ext_linegrid": true })],
			)
			.await?;
		Ok(())
	}

	/// Creates a listed, non-scratch buffer.
	pub async fn create_buf(&self) -> Result<BufferHandle> {
		let value = self.rpc.call("nvim_create_buf", vec![json!(true), json!(false)]).await?;
		value.as_i64().filter(|&buf| buf > 0).ok_or_else(|| protocol("nvim_create_buf", &value))
	}

	/// Replaces lines `start..end` of `buf`.
	pub async fn buf_set_lines(&self, buf: BufferHandle, start: i64, end: i64, lines: &[String]) -> Result<()> {
		self.rpc
			.call("nvim_buf_set_lines", vec![json!(buf), json!(start), json!(end), json!(false), json!(lines)])
			.await?;
		Ok(())
	}

	/// Subscribes to change events of `buf`.
	pub async fn buf_attach(&self, buf: BufferHandle) -> Result<()> {
		let value = self.rpc.call("nvim_buf_attach", vec![json!(buf), json!(false), json!({})]).await?;
		match value.as_bool() {
			Some(true) => Ok(()),
			_ => Err(protocol("nvim_buf_attach", &value)),
		}
	}

	/// Deletes `buf` regardless of unsaved changes.
	pub async fn buf_delete(&self, buf: BufferHandle) -> Result<()> {
		self.rpc.call("nvim_buf_delete", vec![json!(buf), json!({ "force": true })]).await?;
		Ok(())
	}

	/// Current changedtick of `buf`.
	pub async fn changedtick(&self, buf: BufferHandle) -> Result<u64> {
		let value = self.rpc.call("nvim_buf_get_changedtick", vec![json!(buf)]).await?;
		value.as_u64().ok_or_else(|| protocol("nvim_buf_get_changedtick", &value))
	}

	/// All lines of `buf` together with the changedtick they belong to.
	pub async fn lines_and_tick(&self, buf: BufferHandle) -> Result<(Vec<String>, u64)> {
		let calls = json!([
			["nvim_buf_get_lines", [buf, 0, -1, false]],
			["nvim_buf_get_changedtick", [buf]],
		]);
		let value = self.rpc.call("nvim_call_atomic", vec![calls]).await?;
		let (results, err) = atomic_parts(&value)?;
		if !err.is_null() {
			return Err(Error::remote(err.clone()));
		}
		match results {
			[lines, tick] => Ok((
				string_list(lines).ok_or_else(|| protocol("nvim_buf_get_lines", lines))?,
				tick.as_u64().ok_or_else(|| protocol("nvim_buf_get_changedtick", tick))?,
			)),
			_ => Err(protocol("nvim_call_atomic", &value)),
		}
	}

	/// Applies `edits` to `buf` in order, but only if its changedtick is
	/// still `tick`.
	///
	/// The guard runs first, so a stale batch changes nothing. The batch is
	/// not transactional past that point: if an edit fails, the edits before
	/// it stay applied and the error is returned. Callers must resync.
	pub async fn apply_guarded(&self, buf: BufferHandle, tick: u64, edits: &[EngineEdit]) -> Result<Guarded> {
		let mut calls = Vec::with_capacity(edits.len() + 2);
		calls.push(json!(["nvim_exec_lua", [TICK_GUARD, [buf, tick]]]));
		for edit in edits {
			calls.push(json!([
				"nvim_buf_set_text",
				[buf, edit.start.line, edit.start.col, edit.end.line, edit.end.col, edit.lines],
			]));
		}
		calls.push(json!(["nvim_buf_get_changedtick", [buf]]));

		let value = self.rpc.call("nvim_call_atomic", vec![Value::Array(calls)]).await?;
		let (results, err) = atomic_parts(&value)?;
		if !err.is_null() {
			return match err.get(0).and_then(Value::as_u64) {
				Some(0) => Ok(Guarded::Stale),
				_ => Err(Error::remote(err.clone())),
			};
		}
		let tick = results.last().and_then(Value::as_u64).ok_or_else(|| protocol("nvim_call_atomic", &value))?;
		Ok(Guarded::Applied { tick })
	}

	/// Shows `buf` in the current window.
	pub async fn win_set_buf(&self, buf: BufferHandle) -> Result<()> {
		self.rpc.call("nvim_win_set_buf", vec![json!(0), json!(buf)]).await?;
		Ok(())
	}

	/// Moves the cursor of the current window.
	pub async fn win_set_cursor(&self, pos: EnginePos) -> Result<()> {
		self.rpc
			.call("nvim_win_set_cursor", vec![json!(0), json!([pos.line + 1, pos.col])])
			.await?;
		Ok(())
	}

	/// Resizes the current window.
	pub async fn win_set_size(&self, width: u32, height: u32) -> Result<()> {
		self.rpc.call("nvim_win_set_width", vec![json!(0), json!(width)]).await?;
		self.win_set_height(height).await
	}

	/// Sets the height of the current window.
	pub async fn win_set_height(&self, height: u32) -> Result<()> {
		self.rpc.call("nvim_win_set_height", vec![json!(0), json!(height)]).await?;
		Ok(())
	}

	/// Scrolls the current window so `top` is its first line.
	pub async fn scroll_to(&self, top: u32) -> Result<()> {
		self.rpc
			.call("nvim_call_function", vec![json!("winrestview"), json!([{ "topline": top + 1 }])])
			.await?;
		Ok(())
	}

	/// Selects from `anchor` to `cursor` in visual mode, both inclusive.
	pub async fn visual_select(&self, anchor: EnginePos, cursor: EnginePos) -> Result<()> {
		self.exec_lua(
			VISUAL_SELECT,
			vec![json!(anchor.line + 1), json!(anchor.col), json!(cursor.line + 1), json!(cursor.col)],
		)
		.await?;
		Ok(())
	}

	/// Executes a viewport command against the current window.
	pub async fn run(&self, command: &ViewportCommand) -> Result<()> {
		match *command {
			ViewportCommand::ScrollTo { top } => self.scroll_to(top).await,
			ViewportCommand::SetHeight { height } => self.win_set_height(height).await,
			ViewportCommand::SetCursor { pos } => self.win_set_cursor(pos).await,
			ViewportCommand::VisualSelect { anchor, cursor } => self.visual_select(anchor, cursor).await,
		}
	}
}

/// Splits an `nvim_call_atomic` result into its results and error.
fn atomic_parts(value: &Value) -> Result<(&[Value], &Value)> {
	match value.as_array().map(Vec::as_slice) {
		Some([Value::Array(results), err]) => Ok((results.as_slice(), err)),
		_ => Err(protocol("nvim_call_atomic", value)),
	}
}
