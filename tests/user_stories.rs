//! User Story Integration Tests
//!
//! These tests trace complete user workflows with logging to verify
//! the terminal behaves correctly from the user's perspective.
//!
//! Each test represents a real user story:
//! - "As a builder, I want to..."
//! - The transport is faked; everything else is the real terminal
//! - Logs are captured for debugging

use async_trait::async_trait;
use reqwest::Url;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use podterm::connection::{
    Connector, Outgoing, TransportEvent, TransportHandle, TransportSink, FAILURE_NOTICE,
};
use podterm::dispatcher::Dispatch;
use podterm::history::HistoryStore;
use podterm::scaffold::WorkspaceScaffolder;
use podterm::terminal::{Collaborators, Submitted, TerminalOptions};
use podterm::tools::{ToolInvoker, ToolRequest};
use podterm::{ConnectionState, RetryPolicy, Terminal, TerminalMode, UiEvent};

/// Test helper to capture and display trace logs
struct TestTracer {
    name: String,
    logs: Vec<String>,
}

impl TestTracer {
    fn new(name: &str) -> Self {
        eprintln!("\n╔═══════════════════════════════════════════════════════════════");
        eprintln!("║ USER STORY: {}", name);
        eprintln!("╚═══════════════════════════════════════════════════════════════\n");
        Self {
            name: name.to_string(),
            logs: vec![],
        }
    }

    fn step(&mut self, description: &str) {
        let msg = format!("  → {}", description);
        eprintln!("{}", msg);
        self.logs.push(msg);
    }

    fn expect(&mut self, condition: bool, description: &str) {
        let status = if condition { "✓" } else { "✗" };
        let msg = format!("    {} {}", status, description);
        eprintln!("{}", msg);
        self.logs.push(msg);
        assert!(condition, "FAILED: {}", description);
    }

    fn done(&self) {
        eprintln!("\n  ══════════════════════════════════════════════════════");
        eprintln!("  ✓ Story completed: {}", self.name);
        eprintln!();
    }
}

// ═══════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════

/// One transport the terminal asked for
struct Opened {
    url: String,
    sink: TransportSink,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

/// Hands out in-memory transports and remembers each one
#[derive(Clone, Default)]
struct FakeConnector {
    opened: Arc<Mutex<Vec<Opened>>>,
}

impl FakeConnector {
    fn count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    fn emit_latest(&self, event: TransportEvent) {
        let opened = self.opened.lock().unwrap();
        opened.last().expect("a transport was opened").sink.emit(event);
    }

    fn latest_url(&self) -> String {
        self.opened.lock().unwrap().last().expect("a transport was opened").url.clone()
    }

    fn sent_on_latest(&self) -> Vec<Outgoing> {
        let mut opened = self.opened.lock().unwrap();
        let rx = &mut opened.last_mut().expect("a transport was opened").outgoing;
        let mut sent = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            sent.push(msg);
        }
        sent
    }
}

impl Connector for FakeConnector {
    fn open(&self, url: &Url, sink: TransportSink) -> TransportHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(Opened {
            url: url.to_string(),
            sink,
            outgoing: rx,
        });
        TransportHandle::new(tx, None)
    }
}

struct CannedTools;

#[async_trait]
impl ToolInvoker for CannedTools {
    async fn invoke(&self, request: &ToolRequest) -> podterm::Result<serde_json::Value> {
        Ok(serde_json::json!({ "server": request.server, "results": [request.query] }))
    }
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        max_retries,
    }
}

fn terminal_with(
    connector: &FakeConnector,
    mode: TerminalMode,
    retry: RetryPolicy,
    workspace: &std::path::Path,
    history: Option<HistoryStore>,
) -> Terminal {
    Terminal::new(
        TerminalOptions {
            mode,
            retry,
            default_url: Some("ws://localhost:5000/terminal".into()),
            session_id: "story-session".into(),
            ..Default::default()
        },
        Collaborators {
            connector: Arc::new(connector.clone()),
            tools: Arc::new(CannedTools),
            scaffolder: Arc::new(WorkspaceScaffolder::new(workspace)),
            history,
        },
    )
}

async fn next(term: &mut Terminal) {
    let handled = tokio::time::timeout(Duration::from_secs(2), term.next_event())
        .await
        .expect("session event arrived in time");
    assert!(handled, "session channel still open");
}

// ═══════════════════════════════════════════════════════════════
// STORY: Running remote commands
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_remote_command_round_trip() {
    let mut t = TestTracer::new("Remote command is forwarded and its output rendered");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Standard, RetryPolicy::default(), dir.path(), None);

    t.step("Given the terminal connects to its default address");
    term.connect(None);
    t.expect(connector.count() == 1, "One transport opened");
    t.expect(
        connector.latest_url() == "ws://localhost:5000/terminal?session_id=story-session",
        "Session id appended to the address",
    );
    t.expect(term.connection_state() == ConnectionState::Connecting, "State is connecting");

    t.step("When the server accepts the connection");
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;
    t.expect(term.connection_state() == ConnectionState::Open, "State is open");

    t.step("When the user runs `ls`");
    let outcome = term.submit("ls").await;
    t.expect(outcome == Submitted::Dispatched(Dispatch::Forwarded), "Line forwarded");
    let sent = connector.sent_on_latest();
    t.expect(
        sent == vec![Outgoing::Text(r#"{"cmd":"ls"}"#.into())],
        "Payload is {\"cmd\": line}",
    );
    t.expect(!term.surface().contents().ends_with("ls\r\n$ "), "No local prompt after forwarding");

    t.step("When the server replies with output");
    connector.emit_latest(TransportEvent::Message(r#"{"output":"app.js\r\n$ "}"#.into()));
    next(&mut term).await;
    t.expect(term.surface().contents().ends_with("ls\r\napp.js\r\n$ "), "Output rendered verbatim");

    t.step("When the server sends a non-JSON frame");
    connector.emit_latest(TransportEvent::Message("plain text".into()));
    next(&mut term).await;
    t.expect(term.surface().contents().ends_with("plain text"), "Raw frame shown as-is");

    t.done();
}

#[tokio::test]
async fn story_preview_html_reaches_subscribers() {
    let mut t = TestTracer::new("Preview HTML goes to the preview surface, not the scrollback");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Standard, RetryPolicy::default(), dir.path(), None);
    let mut rx = term.subscribe();

    term.connect(None);
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;
    let before = term.surface().contents().to_string();

    t.step("When the server pushes a preview payload");
    connector.emit_latest(TransportEvent::Message(r#"{"preview":"<h1>Hello</h1>"}"#.into()));
    next(&mut term).await;

    let mut saw_preview = false;
    while let Ok(event) = rx.try_recv() {
        if event == (UiEvent::Preview { html: "<h1>Hello</h1>".into() }) {
            saw_preview = true;
        }
    }
    t.expect(saw_preview, "Subscriber received the preview HTML");
    t.expect(term.surface().contents() == before, "Scrollback unchanged");

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: Losing the connection
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_reconnect_until_budget_exhausted() {
    let mut t = TestTracer::new("Dropped connection retries, then fails with one notice");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Standard, fast_retries(2), dir.path(), None);

    term.connect(None);
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;

    t.step("When the connection drops abnormally");
    connector.emit_latest(TransportEvent::Closed { code: Some(1006), reason: String::new() });
    next(&mut term).await;
    t.expect(term.connection_state() == ConnectionState::Retrying, "Retry scheduled");

    t.step("When the retry timer fires");
    next(&mut term).await;
    t.expect(connector.count() == 2, "A new transport was opened");

    t.step("When every retry also fails");
    connector.emit_latest(TransportEvent::Closed { code: None, reason: String::new() });
    next(&mut term).await;
    next(&mut term).await;
    t.expect(connector.count() == 3, "Second retry opened a third transport");
    connector.emit_latest(TransportEvent::Closed { code: Some(1011), reason: String::new() });
    next(&mut term).await;

    t.expect(term.connection_state() == ConnectionState::Failed, "State is failed");
    t.expect(
        term.surface().contents().matches(FAILURE_NOTICE).count() == 1,
        "Failure notice shown once",
    );

    t.step("When the user reconnects manually and it fails again");
    term.reconnect();
    t.expect(connector.count() == 4, "Manual reconnect opens a transport");
    connector.emit_latest(TransportEvent::Closed { code: Some(1006), reason: String::new() });
    next(&mut term).await;
    t.expect(term.connection_state() == ConnectionState::Failed, "Budget stays exhausted");
    t.expect(
        term.surface().contents().matches(FAILURE_NOTICE).count() == 1,
        "Failure notice not repeated",
    );

    t.step("When a later attempt succeeds");
    term.reconnect();
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;
    t.expect(term.connection_state() == ConnectionState::Open, "Back to open");
    t.expect(term.connection().machine().retry_count() == 0, "Retry count reset by success");

    t.done();
}

#[tokio::test]
async fn story_clean_close_stays_idle() {
    let mut t = TestTracer::new("Server closing cleanly does not trigger retries");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Standard, fast_retries(3), dir.path(), None);

    term.connect(None);
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;

    t.step("When the server closes with code 1000");
    connector.emit_latest(TransportEvent::Closed { code: Some(1000), reason: "bye".into() });
    next(&mut term).await;

    t.expect(term.connection_state() == ConnectionState::Idle, "State is idle");
    tokio::time::sleep(Duration::from_millis(20)).await;
    t.expect(term.pump_events() == 0, "No retry timer queued");
    t.expect(connector.count() == 1, "No new transport opened");

    t.done();
}

#[tokio::test]
async fn story_commands_while_disconnected() {
    let mut t = TestTracer::new("Commands degrade gracefully without a connection");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Standard, RetryPolicy::default(), dir.path(), None);

    t.step("When an unknown command is typed before connecting");
    let outcome = term.submit("ls").await;
    t.expect(outcome == Submitted::Dispatched(Dispatch::Handled), "Handled locally");
    t.expect(term.surface().contents().contains("ls: command not found"), "Command not found shown");
    t.expect(term.surface().contents().ends_with("$ "), "Prompt restored");

    t.step("When a remote MCP query is typed");
    term.submit("mcp web-search rust").await;
    t.expect(
        term.surface().contents().contains("Not connected to terminal server"),
        "Not-connected message shown",
    );

    t.step("When a local MCP query is typed");
    term.submit("mcp docker-brave rust async").await;
    t.expect(term.surface().contents().contains("Querying docker-brave..."), "Local tool queried");
    t.expect(term.surface().contents().contains("\"rust async\""), "Tool result rendered");

    t.step("When `echo` and `clear` are used");
    term.submit("echo hello   world").await;
    t.expect(term.surface().contents().contains("hello world\r\n"), "Echo joins args with single spaces");
    term.submit("clear").await;
    t.expect(term.surface().lines() == vec!["$ ".to_string()], "Clear leaves only the prompt");

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: Build mode
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_create_project_in_build_mode() {
    let mut t = TestTracer::new("Builder scaffolds a project and lands in it");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Build, RetryPolicy::default(), dir.path(), None);
    term.connect(None);
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;

    t.step("When the builder runs !create-project vanilla demo");
    let outcome = term.submit("!create-project vanilla demo").await;
    let Submitted::Special(result) = outcome else {
        panic!("expected a special result");
    };
    t.expect(result.success, "Special command succeeded");
    let data = result.data.clone().unwrap_or_default();
    t.expect(data.template.as_deref() == Some("vanilla"), "Result carries the template");
    t.expect(data.name.as_deref() == Some("demo"), "Result carries the name");
    t.expect(dir.path().join("demo/index.html").exists(), "Template files written");

    t.step("Then the terminal changes into the project and lists it");
    let sent = connector.sent_on_latest();
    t.expect(
        sent == vec![
            Outgoing::Text(r#"{"cmd":"cd demo"}"#.into()),
            Outgoing::Text(r#"{"cmd":"ls"}"#.into()),
        ],
        "cd and ls forwarded in order",
    );

    t.step("When the same project is created again");
    let Submitted::Special(again) = term.submit("!create-project vanilla demo").await else {
        panic!("expected a special result");
    };
    t.expect(!again.success, "Duplicate project rejected");
    t.expect(again.error.as_deref().map_or(false, |e| e.contains("already exists")), "Error explains why");

    t.done();
}

#[tokio::test]
async fn story_install_deps_and_preview() {
    let mut t = TestTracer::new("Builder installs dependencies and opens a preview");
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::default();
    let mut term = terminal_with(&connector, TerminalMode::Build, RetryPolicy::default(), dir.path(), None);
    let mut rx = term.subscribe();
    term.connect(None);
    connector.emit_latest(TransportEvent::Opened);
    next(&mut term).await;

    t.step("When the builder runs !install-deps yarn");
    let Submitted::Special(result) = term.submit("!install-deps yarn").await else {
        panic!("expected a special result");
    };
    t.expect(result.success, "Install started");
    t.expect(
        connector.sent_on_latest() == vec![Outgoing::Text(r#"{"cmd":"yarn install"}"#.into())],
        "Install command forwarded",
    );

    t.step("When an unsupported package manager is named");
    let Submitted::Special(bad) = term.submit("!install-deps foo").await else {
        panic!("expected a special result");
    };
    t.expect(!bad.success, "Rejected");
    t.expect(connector.sent_on_latest().is_empty(), "Nothing forwarded");

    t.step("When the builder opens a preview without a port");
    let Submitted::Special(preview) = term.submit("!preview").await else {
        panic!("expected a special result");
    };
    t.expect(preview.data.and_then(|d| d.port) == Some(3000), "Default port used");
    let mut ports = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let UiEvent::PreviewPort { port } = event {
            ports.push(port);
        }
    }
    t.expect(ports == vec![3000], "Preview port published");

    t.step("When an unknown special command is typed");
    let Submitted::Special(unknown) = term.submit("!deploy").await else {
        panic!("expected a special result");
    };
    t.expect(!unknown.success, "Unknown special command fails");
    t.expect(term.surface().contents().contains("!help"), "Hint to !help shown");

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: History
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_history_survives_restart() {
    let mut t = TestTracer::new("Command history is recalled across sessions");
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.jsonl");
    let connector = FakeConnector::default();

    t.step("Given a session where the user runs a few commands");
    {
        let mut term = terminal_with(
            &connector,
            TerminalMode::Standard,
            RetryPolicy::default(),
            dir.path(),
            Some(HistoryStore::new(&history_path)),
        );
        term.submit("echo one").await;
        term.submit("").await;
        term.submit("echo two").await;

        t.expect(term.history_up().as_deref() == Some("echo two"), "Up recalls the latest");
        t.expect(term.history_up().as_deref() == Some("echo one"), "Up again recalls older");
        t.expect(term.history_up().as_deref() == Some("echo one"), "Up stops at the oldest");
        t.expect(term.history_down() == "echo two", "Down moves forward");
        t.expect(term.history_down().is_empty(), "Down past the end clears the line");
    }

    t.step("When podterm starts again with the same history file");
    let mut term = terminal_with(
        &connector,
        TerminalMode::Standard,
        RetryPolicy::default(),
        dir.path(),
        Some(HistoryStore::new(&history_path)),
    );
    t.expect(term.history_up().as_deref() == Some("echo two"), "Previous session recalled");
    t.expect(term.history_up().as_deref() == Some("echo one"), "Blank lines were never stored");

    t.done();
}
