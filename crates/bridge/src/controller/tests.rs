use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tandem_engine::{LaunchError, ProcessLauncher};

use super::*;
use crate::config::{Platform, Settings};
use crate::host::{RevealKind, Selection, SelectionKind};
use crate::position::Position;
use crate::testing::{FakeEngine, FakeHost, eventually};

fn config(engine_path: &str) -> Arc<SessionConfig> {
	let settings = Settings {
		engine_path: Some(engine_path.into()),
		stop_grace_ms: 500,
		..Settings::default()
	};
	Arc::new(settings.resolve(Platform::Linux).unwrap())
}

struct Harness {
	engine: FakeEngine,
	host: Arc<FakeHost>,
	controller: Controller,
	sink: HostEventSink,
}

impl Harness {
	fn new(docs: &[(u64, &str)]) -> Self {
		let engine = FakeEngine::new();
		let host = FakeHost::with_docs(docs);
		let controller = Controller::new(config("nvim"), host.clone(), Arc::new(engine.clone()));
		let sink = controller.events();
		Self {
			engine,
			host,
			controller,
			sink,
		}
	}

	async fn running(docs: &[(u64, &str)]) -> Self {
		let harness = Self::new(docs);
		harness.controller.init().await.unwrap();
		harness
	}

	fn host_types(&self, doc: u64, text: &str) {
		let version = self.host.type_text(doc, text);
		assert!(self.sink.send(HostEvent::Changed {
			doc: DocumentId(doc),
			version,
			text: text.to_owned(),
		}));
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_failed_launch_disposes_and_reports_once() {
	let host = FakeHost::with_docs(&[(1, "text")]);
	let controller = Controller::new(
		config("/nonexistent/tandem-engine"),
		host.clone(),
		Arc::new(ProcessLauncher::new()),
	);

	let err = controller.init().await.unwrap_err();

	assert!(
		matches!(err, Error::Init(InitError::Launch(LaunchError::NotFound { .. }))),
		"{err:?}"
	);
	assert_eq!(controller.state(), SessionState::Disposed);
	let errors = host.state().errors;
	assert_eq!(errors.len(), 1);
	assert!(errors[0].starts_with("tandem: "), "{errors:?}");

	assert!(matches!(
		controller.init().await,
		Err(Error::InvalidState(SessionState::Disposed))
	));
	assert_eq!(host.state().errors.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn test_init_primes_open_documents() {
	let h = Harness::running(&[(1, "one"), (2, "two\nlines")]).await;

	assert_eq!(h.controller.state(), SessionState::Running);
	let contexts = h.host.state().contexts;
	assert_eq!(contexts.get(CTRL_KEYS_NORMAL), Some(&true));
	assert_eq!(contexts.get(CTRL_KEYS_INSERT), Some(&true));

	assert_eq!(h.engine.buffers(), [1, 2]);
	assert_eq!(h.engine.text(1), "one");
	assert_eq!(h.engine.text(2), "two\nlines");
	assert_eq!(h.engine.calls("nvim_ui_attach").len(), 1);
	let runtime = h.engine.calls("nvim_exec_lua");
	assert_eq!(runtime.len(), 1);
	assert_eq!(runtime[0][1], json!([7]));
	assert!(h.host.state().errors.is_empty());

	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_second_init_is_rejected() {
	let h = Harness::running(&[]).await;
	assert!(matches!(
		h.controller.init().await,
		Err(Error::InvalidState(SessionState::Running))
	));
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_events_before_running_are_dropped() {
	let h = Harness::new(&[(1, "a")]);
	assert!(!h.sink.send(HostEvent::Activated { doc: DocumentId(1) }));
	assert_eq!(h.controller.state(), SessionState::Uninitialized);
}

#[tokio::test(flavor = "current_thread")]
async fn test_typed_text_round_trips_without_resync() {
	let h = Harness::running(&[(1, "")]).await;

	h.host_types(1, "hello");
	eventually("engine text", || h.engine.text(1) == "hello").await;
	settle().await;

	let host = h.host.state();
	assert_eq!((host.apply_calls, host.replace_calls), (0, 0));
	assert_eq!(h.host.text(1), "hello");
	assert!(h.engine.calls("nvim_buf_get_lines").is_empty());

	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_engine_edit_reaches_host() {
	let h = Harness::running(&[(1, "first\nsecond")]).await;

	h.engine.edit_lines(1, 1, 2, &["2nd", "third"], true);

	eventually("host text", || h.host.text(1) == "first\n2nd\nthird").await;
	assert_eq!(h.host.state().replace_calls, 0);
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_conflicting_edits_converge_on_engine_text() {
	let h = Harness::running(&[(1, "base")]).await;

	h.engine.edit_lines(1, 0, 1, &["engine"], false);
	h.host_types(1, "base host");

	eventually("host resync", || h.host.text(1) == "engine").await;
	assert_eq!(h.engine.text(1), "engine");
	assert!(h.engine.calls("nvim_buf_set_text").is_empty());
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_late_host_echo_keeps_engine_text() {
	let h = Harness::running(&[(1, "a")]).await;

	h.engine.edit_lines(1, 0, 1, &["ab"], true);
	eventually("first engine edit", || h.host.text(1) == "ab").await;
	let echo = h.host.version(1);
	h.engine.edit_lines(1, 0, 1, &["abc"], true);
	eventually("second engine edit", || h.host.text(1) == "abc").await;

	assert!(h.sink.send(HostEvent::Changed {
		doc: DocumentId(1),
		version: echo,
		text: "ab".to_owned(),
	}));
	settle().await;

	assert_eq!(h.engine.text(1), "abc");
	assert_eq!(h.host.text(1), "abc");
	assert!(h.engine.calls("nvim_call_atomic").is_empty());
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_host_selection_moves_engine_cursor() {
	let h = Harness::running(&[(1, "one\ntwo")]).await;

	assert!(h.sink.send(HostEvent::SelectionChanged {
		doc: DocumentId(1),
		selection: Selection::caret(Position { line: 1, character: 2 }),
		kind: SelectionKind::Keyboard,
	}));

	eventually("cursor", || !h.engine.calls("nvim_win_set_cursor").is_empty()).await;
	assert_eq!(h.engine.calls("nvim_win_set_buf"), [vec![json!(0), json!(1)]]);
	assert_eq!(h.engine.calls("nvim_win_set_cursor"), [vec![json!(0), json!([2, 2])]]);
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_engine_cursor_selects_and_reveals() {
	let h = Harness::running(&[(1, "one\ntwo\nthree")]).await;

	assert!(h.sink.send(HostEvent::VisibleRangeChanged {
		doc: DocumentId(1),
		top: 0,
		bottom: 0,
	}));
	eventually("scroll", || !h.engine.calls("nvim_call_function").is_empty()).await;
	assert_eq!(h.engine.calls("nvim_win_set_height").last(), Some(&vec![json!(0), json!(1)]));

	h.engine.emit("tandem_cursor", vec![json!(1), json!(2), json!(1), json!("n")]);

	eventually("reveal", || !h.host.state().reveals.is_empty()).await;
	let host = h.host.state();
	assert_eq!(
		host.selections,
		[(DocumentId(1), Selection::caret(Position { line: 2, character: 1 }))]
	);
	assert_eq!(host.reveals, [(DocumentId(1), 2, RevealKind::Minimal)]);
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_mode_and_highlights_reach_host() {
	let h = Harness::running(&[(1, "match here\nx")]).await;

	h.engine.emit("tandem_mode", vec![json!("i")]);
	h.engine.emit(
		"tandem_highlights",
		vec![json!(1), json!([["Search", 0, 0, 5], ["Bogus", 1, 0, 1]])],
	);

	eventually("decorations", || !h.host.state().decorations.is_empty()).await;
	let host = h.host.state();
	assert_eq!(host.modes, ["i"]);
	let groups: Vec<_> = host.decorations[&DocumentId(1)].iter().map(|d| d.group.as_str()).collect();
	assert_eq!(groups, ["Bogus", "Search"]);
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_documents_opened_while_running() {
	let h = Harness::running(&[(1, "kept")]).await;

	let version = h.host.type_text(3, "fresh");
	assert!(h.sink.send(HostEvent::Opened {
		doc: DocumentId(3),
		version,
		text: "fresh".to_owned(),
	}));
	h.host_types(3, "fresh!");
	eventually("new buffer", || h.engine.buffers() == [1, 2] && h.engine.text(2) == "fresh!").await;

	h.engine.edit_lines(2, 0, 1, &["from engine"], true);
	eventually("host text", || h.host.text(3) == "from engine").await;

	assert!(h.sink.send(HostEvent::Closed { doc: DocumentId(3) }));
	eventually("buffer deleted", || h.engine.buffers() == [1]).await;
	assert_eq!(h.host.text(1), "kept");
	h.controller.dispose().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_dispose_stops_engine_and_events() {
	let h = Harness::running(&[(1, "a")]).await;
	let process = h.engine.process().unwrap();

	h.controller.dispose().await;

	assert_eq!(h.controller.state(), SessionState::Disposed);
	assert!(!process.is_alive());
	assert_eq!(h.engine.calls("nvim_command"), [vec![json!("qa!")]]);
	assert!(!h.sink.send(HostEvent::Activated { doc: DocumentId(1) }));
	assert!(h.host.state().exits.is_empty());

	h.controller.dispose().await;
	assert_eq!(h.controller.state(), SessionState::Disposed);
}

#[tokio::test(flavor = "current_thread")]
async fn test_engine_crash_disposes_and_notifies_once() {
	let h = Harness::running(&[(1, "a")]).await;

	h.engine.crash();

	eventually("exit notice", || !h.host.state().exits.is_empty()).await;
	assert_eq!(h.controller.state(), SessionState::Disposed);
	settle().await;
	let exits = h.host.state().exits;
	assert_eq!(exits.len(), 1);
	assert!(exits[0].starts_with("engine "), "{exits:?}");
	assert!(!h.sink.send(HostEvent::Activated { doc: DocumentId(1) }));
}
