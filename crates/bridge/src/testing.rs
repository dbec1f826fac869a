//! In-memory engine and recording host for tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ropey::Rope;
use serde_json::{Value, json};
use tandem_engine::{
	EngineConnection, EngineProcess, LaunchConfig, LaunchError, LaunchFuture, Launcher, ProcessExit, handshake,
};
use tandem_rpc::RpcClient;
use tokio::sync::mpsc;

use crate::diff::lines_to_text;
use crate::engine::TICK_GUARD;
use crate::highlight::Decoration;
use crate::host::{DocumentId, HostEdit, HostEditor, OpenDocument, RevealKind, Selection};
use crate::position::{OffsetEncoding, position_to_char};

/// Polls `check` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while !check() {
		assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}

#[derive(Debug, Clone)]
struct FakeBuffer {
	lines: Vec<String>,
	tick: u64,
	attached: bool,
}

/// Everything the fake engine knows.
#[derive(Debug, Default)]
struct EngineState {
	buffers: BTreeMap<i64, FakeBuffer>,
	next_buf: i64,
	calls: Vec<(String, Vec<Value>)>,
	/// `nvim_buf_set_text` calls left to succeed before one fails.
	set_text_budget: Option<usize>,
}

type Notification = (String, Vec<Value>);

fn arg_i64(params: &[Value], idx: usize) -> Result<i64, Value> {
	params.get(idx).and_then(Value::as_i64).ok_or_else(|| json!([0, format!("argument {idx} is not an integer")]))
}

fn arg_lines(params: &[Value], idx: usize) -> Result<Vec<String>, Value> {
	params
		.get(idx)
		.and_then(Value::as_array)
		.and_then(|lines| lines.iter().map(|l| l.as_str().map(str::to_owned)).collect())
		.ok_or_else(|| json!([0, format!("argument {idx} is not a list of lines")]))
}

impl EngineState {
	fn buffer(&mut self, buf: i64) -> Result<&mut FakeBuffer, Value> {
		self.buffers.get_mut(&buf).ok_or_else(|| json!([0, format!("invalid buffer {buf}")]))
	}

	fn set_lines(&mut self, buf: i64, start: i64, end: i64, lines: Vec<String>) -> Result<Option<Notification>, Value> {
		let buffer = self.buffer(buf)?;
		let len = buffer.lines.len();
		let start = usize::try_from(start).map_err(|_| json!([0, "negative start"]))?.min(len);
		let end = if end < 0 { len } else { usize::try_from(end).unwrap_or(len).min(len) };
		buffer.lines.splice(start..end, lines.clone());
		if buffer.lines.is_empty() {
			buffer.lines.push(String::new());
		}
		buffer.tick += 1;
		Ok(buffer.attached.then(|| {
			(
				"nvim_buf_lines_event".to_owned(),
				vec![json!(buf), json!(buffer.tick), json!(start), json!(end), json!(lines), json!(false)],
			)
		}))
	}

	fn set_text(&mut self, params: &[Value]) -> Result<Option<Notification>, Value> {
		let buf = arg_i64(params, 0)?;
		let [sl, sc, el, ec] = [1, 2, 3, 4].map(|i| arg_i64(params, i).map(|n| n as usize));
		let (sl, sc, el, ec) = (sl?, sc?, el?, ec?);
		let replacement = arg_lines(params, 5)?;

		let buffer = self.buffer(buf)?;
		let out_of_range = || json!([0, "index out of range"]);
		let prefix = buffer.lines.get(sl).and_then(|l| l.get(..sc)).ok_or_else(out_of_range)?.to_owned();
		let suffix = buffer.lines.get(el).and_then(|l| l.get(ec..)).ok_or_else(out_of_range)?.to_owned();

		let mut lines = replacement;
		if lines.is_empty() {
			lines.push(String::new());
		}
		lines[0].insert_str(0, &prefix);
		if let Some(last) = lines.last_mut() {
			last.push_str(&suffix);
		}
		self.set_lines(buf, sl as i64, el as i64 + 1, lines)
	}

	fn handle(&mut self, method: &str, params: &[Value], events: &mut Vec<Notification>) -> Result<Value, Value> {
		self.calls.push((method.to_owned(), params.to_vec()));
		match method {
			"nvim_get_api_info" => Ok(json!([7, {"version": {"major": 0, "minor": 10, "patch": 2}}])),
			"nvim_create_buf" => {
				self.next_buf += 1;
				let buf = self.next_buf;
				self.buffers.insert(
					buf,
					FakeBuffer {
						lines: vec![String::new()],
						tick: 2,
						attached: false,
					},
				);
				Ok(json!(buf))
			}
			"nvim_buf_set_lines" => {
				let event = self.set_lines(
					arg_i64(params, 0)?,
					arg_i64(params, 1)?,
					arg_i64(params, 2)?,
					arg_lines(params, 4)?,
				)?;
				events.extend(event);
				Ok(Value::Null)
			}
			"nvim_buf_set_text" => {
				if let Some(left) = self.set_text_budget.as_mut() {
					if *left == 0 {
						self.set_text_budget = None;
						return Err(json!([0, "Failed to set text"]));
					}
					*left -= 1;
				}
				events.extend(self.set_text(params)?);
				Ok(Value::Null)
			}
			"nvim_buf_attach" => {
				self.buffer(arg_i64(params, 0)?)?.attached = true;
				Ok(json!(true))
			}
			"nvim_buf_get_lines" => Ok(json!(self.buffer(arg_i64(params, 0)?)?.lines)),
			"nvim_buf_get_changedtick" => Ok(json!(self.buffer(arg_i64(params, 0)?)?.tick)),
			"nvim_buf_delete" => {
				let buf = arg_i64(params, 0)?;
				self.buffers.remove(&buf).map(|_| Value::Null).ok_or_else(|| json!([0, "invalid buffer"]))
			}
			"nvim_exec_lua" if params.first().and_then(Value::as_str) == Some(TICK_GUARD) => {
				let args = params.get(1).and_then(Value::as_array).cloned().unwrap_or_default();
				let buf = arg_i64(&args, 0)?;
				let tick = arg_i64(&args, 1)?;
				if self.buffer(buf)?.tick as i64 == tick {
					Ok(Value::Null)
				} else {
					Err(json!([1, "tandem: stale changedtick"]))
				}
			}
			"nvim_call_atomic" => {
				let calls = params.first().and_then(Value::as_array).cloned().unwrap_or_default();
				let mut results = Vec::new();
				for (idx, call) in calls.iter().enumerate() {
					let method = call.get(0).and_then(Value::as_str).unwrap_or_default();
					let args = call.get(1).and_then(Value::as_array).cloned().unwrap_or_default();
					match self.handle(method, &args, events) {
						Ok(value) => results.push(value),
						Err(err) => {
							let message = err.get(1).cloned().unwrap_or(Value::Null);
							return Ok(json!([results, [idx, 1, message]]));
						}
					}
				}
				Ok(json!([results, null]))
			}
			"nvim_exec_lua" | "nvim_ui_attach" | "nvim_win_set_buf" | "nvim_win_set_cursor" | "nvim_win_set_height"
			| "nvim_win_set_width" | "nvim_call_function" => Ok(Value::Null),
			other => Err(json!([0, format!("fake engine does not implement {other}")])),
		}
	}
}

const REQUESTS: &[&str] = &[
	"nvim_get_api_info",
	"nvim_create_buf",
	"nvim_buf_set_lines",
	"nvim_buf_set_text",
	"nvim_buf_attach",
	"nvim_buf_get_lines",
	"nvim_buf_get_changedtick",
	"nvim_buf_delete",
	"nvim_exec_lua",
	"nvim_call_atomic",
	"nvim_ui_attach",
	"nvim_win_set_buf",
	"nvim_win_set_cursor",
	"nvim_win_set_height",
	"nvim_win_set_width",
	"nvim_call_function",
];

struct FakeSession {
	outbox: mpsc::UnboundedSender<Notification>,
	server: RpcClient,
	process: EngineProcess,
	exit: ProcessExit,
}

/// An engine served in memory over a duplex pipe.
///
/// Implements the subset of the engine API the bridge uses. Buffer edits
/// raise the changedtick and, once attached, report line events like the
/// real engine. `qa!` exits the process.
#[derive(Clone, Default)]
pub struct FakeEngine {
	state: Arc<Mutex<EngineState>>,
	session: Arc<Mutex<Option<FakeSession>>>,
}

impl FakeEngine {
	/// Creates an engine with no buffers.
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts serving and completes the handshake.
	pub async fn connect(&self) -> Result<EngineConnection, LaunchError> {
		let (near, far) = tokio::io::duplex(256 * 1024);
		let (near_r, near_w) = tokio::io::split(near);
		let (far_r, far_w) = tokio::io::split(far);
		let (client, _) = RpcClient::connect(near_r, near_w);
		let (server, _) = RpcClient::connect(far_r, far_w);
		let (process, exit) = EngineProcess::in_memory();
		let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Notification>();

		for &method in REQUESTS {
			let state = self.state.clone();
			let outbox = outbox.clone();
			server.on_request(method, move |params| {
				let mut events = Vec::new();
				let result = state.lock().handle(method, &params, &mut events);
				for event in events {
					let _ = outbox.send(event);
				}
				result
			});
		}
		for method in ["nvim_set_client_info", "nvim_command"] {
			let state = self.state.clone();
			let exit = exit.clone();
			server.on_notification(method, move |params| {
				if params.first().and_then(Value::as_str) == Some("qa!") {
					exit.exit(0);
				}
				state.lock().calls.push((method.to_owned(), params));
			});
		}

		let forward = server.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = forward.closed() => break,
					Some((method, params)) = outbox_rx.recv() => {
						let _ = forward.notify(&method, params);
					}
				}
			}
		});

		*self.session.lock() = Some(FakeSession {
			outbox,
			server,
			process: process.clone(),
			exit,
		});

		let info = handshake(&client, &process, "tandem", Duration::from_secs(5)).await?;
		Ok(EngineConnection {
			rpc: client,
			process,
			info,
		})
	}

	/// Sends a notification to the bridge.
	pub fn emit(&self, method: &str, params: Vec<Value>) {
		if let Some(session) = self.session.lock().as_ref() {
			let _ = session.outbox.send((method.to_owned(), params));
		}
	}

	/// Edits a buffer as if the user typed in the engine. The line event is
	/// only sent when `notify` is set. Returns the new changedtick.
	pub fn edit_lines(&self, buf: i64, start: i64, end: i64, lines: &[&str], notify: bool) -> u64 {
		let lines = lines.iter().map(|l| (*l).to_owned()).collect();
		let mut state = self.state.lock();
		let event = state.set_lines(buf, start, end, lines).expect("edit a known buffer");
		if notify && let Some((method, params)) = event {
			self.emit(&method, params);
		}
		state.buffers[&buf].tick
	}

	/// Lets `ok` more `nvim_buf_set_text` calls succeed, then fails the next.
	pub fn fail_set_text_after(&self, ok: usize) {
		self.state.lock().set_text_budget = Some(ok);
	}

	/// Kills the engine without a goodbye.
	pub fn crash(&self) {
		if let Some(session) = self.session.lock().as_ref() {
			session.exit.exit(1);
			session.server.close();
		}
	}

	/// The engine process, once connected.
	pub fn process(&self) -> Option<EngineProcess> {
		self.session.lock().as_ref().map(|s| s.process.clone())
	}

	/// Text of a buffer.
	pub fn text(&self, buf: i64) -> String {
		lines_to_text(&self.state.lock().buffers[&buf].lines)
	}

	/// Changedtick of a buffer.
	pub fn tick(&self, buf: i64) -> u64 {
		self.state.lock().buffers[&buf].tick
	}

	/// Live buffer handles.
	pub fn buffers(&self) -> Vec<i64> {
		self.state.lock().buffers.keys().copied().collect()
	}

	/// Parameters of every call to `method`, atomic sub-calls included.
	pub fn calls(&self, method: &str) -> Vec<Vec<Value>> {
		self.state
			.lock()
			.calls
			.iter()
			.filter(|(m, _)| m == method)
			.map(|(_, params)| params.clone())
			.collect()
	}
}

impl Launcher for FakeEngine {
	fn launch(&self, _config: &LaunchConfig) -> LaunchFuture {
		let engine = self.clone();
		Box::pin(async move { engine.connect().await })
	}
}

/// What the fake host has been asked to do.
#[derive(Debug, Clone, Default)]
pub struct HostState {
	pub contexts: BTreeMap<String, bool>,
	pub errors: Vec<String>,
	pub docs: BTreeMap<DocumentId, String>,
	pub versions: BTreeMap<DocumentId, u64>,
	pub apply_calls: usize,
	pub replace_calls: usize,
	pub selections: Vec<(DocumentId, Selection)>,
	pub reveals: Vec<(DocumentId, u32, RevealKind)>,
	pub decorations: BTreeMap<DocumentId, Vec<Decoration>>,
	pub modes: Vec<String>,
	pub exits: Vec<String>,
}

impl HostState {
	fn change(&mut self, doc: DocumentId, text: String) -> u64 {
		self.docs.insert(doc, text);
		let version = self.versions.entry(doc).or_default();
		*version += 1;
		*version
	}
}

/// A host editor that records every call and keeps document text. Each
/// document starts at version 1 and every change raises it.
#[derive(Debug, Default)]
pub struct FakeHost {
	state: Mutex<HostState>,
	refuse_edits: AtomicBool,
}

impl FakeHost {
	/// A host with `docs` open.
	pub fn with_docs(docs: &[(u64, &str)]) -> Arc<Self> {
		let host = Self::default();
		{
			let mut state = host.state.lock();
			for &(id, text) in docs {
				state.docs.insert(DocumentId(id), text.to_owned());
				state.versions.insert(DocumentId(id), 1);
			}
		}
		Arc::new(host)
	}

	/// Snapshot of everything recorded.
	pub fn state(&self) -> HostState {
		self.state.lock().clone()
	}

	/// Current text of a document.
	pub fn text(&self, doc: u64) -> String {
		self.state.lock().docs[&DocumentId(doc)].clone()
	}

	/// Current version of a document.
	pub fn version(&self, doc: u64) -> u64 {
		self.state.lock().versions[&DocumentId(doc)]
	}

	/// Sets the text of a document as if the user typed it. Returns the new
	/// version.
	pub fn type_text(&self, doc: u64, text: &str) -> u64 {
		self.state.lock().change(DocumentId(doc), text.to_owned())
	}

	/// Makes the host reject edits and replacements.
	pub fn refuse_edits(&self, refuse: bool) {
		self.refuse_edits.store(refuse, Ordering::SeqCst);
	}
}

#[async_trait]
impl HostEditor for FakeHost {
	fn set_context(&self, key: &str, value: bool) {
		self.state.lock().contexts.insert(key.to_owned(), value);
	}

	fn show_error(&self, message: &str) {
		self.state.lock().errors.push(message.to_owned());
	}

	fn open_documents(&self) -> Vec<OpenDocument> {
		let state = self.state.lock();
		state
			.docs
			.iter()
			.map(|(&id, text)| OpenDocument {
				id,
				version: state.versions.get(&id).copied().unwrap_or_default(),
				text: text.clone(),
			})
			.collect()
	}

	async fn apply_edits(&self, doc: DocumentId, base: u64, edits: Vec<HostEdit>) -> Option<u64> {
		if self.refuse_edits.load(Ordering::SeqCst) {
			return None;
		}
		let mut state = self.state.lock();
		if state.versions.get(&doc) != Some(&base) {
			return None;
		}
		let text = state.docs.get(&doc)?;

		let mut rope = Rope::from_str(text);
		let mut resolved = Vec::with_capacity(edits.len());
		for edit in &edits {
			let start = position_to_char(&rope, edit.range.start, OffsetEncoding::Utf16);
			let end = position_to_char(&rope, edit.range.end, OffsetEncoding::Utf16);
			let (Some(start), Some(end)) = (start, end) else {
				return None;
			};
			resolved.push((start, end, edit.text.as_str()));
		}
		resolved.sort_by_key(|&(start, ..)| std::cmp::Reverse(start));
		for (start, end, replacement) in resolved {
			rope.remove(start..end);
			rope.insert(start, replacement);
		}

		state.apply_calls += 1;
		Some(state.change(doc, rope.to_string()))
	}

	async fn replace_text(&self, doc: DocumentId, text: &str) -> Option<u64> {
		if self.refuse_edits.load(Ordering::SeqCst) {
			return None;
		}
		let mut state = self.state.lock();
		state.replace_calls += 1;
		Some(state.change(doc, text.to_owned()))
	}

	async fn set_selection(&self, doc: DocumentId, selection: Selection) {
		self.state.lock().selections.push((doc, selection));
	}

	async fn reveal(&self, doc: DocumentId, line: u32, kind: RevealKind) {
		self.state.lock().reveals.push((doc, line, kind));
	}

	async fn set_decorations(&self, doc: DocumentId, decorations: Vec<Decoration>) {
		self.state.lock().decorations.insert(doc, decorations);
	}

	fn mode_changed(&self, mode: &str) {
		self.state.lock().modes.push(mode.to_owned());
	}

	fn engine_exited(&self, reason: &str) {
		self.state.lock().exits.push(reason.to_owned());
	}
}
