//! Connection manager for the remote command service
//!
//! Two layers:
//! - `ConnectionMachine`: pure state machine over {idle, connecting, open,
//!   retrying, failed}. Takes `ConnectionEvent`s, returns `ConnectionAction`s.
//! - `ConnectionManager`: owns the single transport handle, performs the
//!   actions (open/close sockets, schedule retry timers, publish notices) and
//!   routes incoming frames to the output renderer.
//!
//! Transports report back through one mpsc channel of `SessionEvent`s tagged
//! with a generation; events from a superseded transport are dropped.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Result, TerminalError};
use crate::events::{EventBus, Notice, NoticeLevel, UiEvent};
use crate::output::{self, Surface};

/// Backend port used when the page is served from localhost or via proxy
pub const BACKEND_PORT: u16 = 5000;
pub const TERMINAL_PATH: &str = "/terminal";

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub const FAILURE_NOTICE: &str =
    "Connection to the terminal server was lost and retries are exhausted. Press Ctrl-R or restart podterm to reconnect.";

// ═══════════════════════════════════════════════════════════════
// RETRY POLICY
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// min(base * 2^attempt, cap)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Normal and going-away closes are deliberate; everything else is a drop
pub fn is_clean_close(code: Option<u16>) -> bool {
    matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY))
}

// ═══════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Retrying,
    Failed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "connected",
            ConnectionState::Retrying => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    fn has_transport(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Opened,
    Error(String),
    Closed { code: Option<u16> },
    RetryDue { ticket: u64 },
    CloseRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    OpenTransport,
    CloseTransport,
    ScheduleRetry { delay: Duration, ticket: u64 },
    Notify(Notice),
    Changed(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    retry_count: u32,
    connection_failed: bool,
    final_message_shown: bool,
    error_shown: bool,
    next_ticket: u64,
    pending_ticket: Option<u64>,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            retry_count: 0,
            connection_failed: false,
            final_message_shown: false,
            error_shown: false,
            next_ticket: 0,
            pending_ticket: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn connection_failed(&self) -> bool {
        self.connection_failed
    }

    pub fn final_message_shown(&self) -> bool {
        self.final_message_shown
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        use ConnectionAction as A;
        use ConnectionState as S;

        let mut actions = Vec::new();

        match (self.state, event) {
            (state, ConnectionEvent::ConnectRequested) => {
                if state.has_transport() {
                    actions.push(A::CloseTransport);
                }
                self.pending_ticket = None;
                actions.push(A::OpenTransport);
                self.transition(S::Connecting, &mut actions);
            }

            (S::Connecting, ConnectionEvent::Opened) => {
                self.retry_count = 0;
                self.connection_failed = false;
                self.final_message_shown = false;
                self.error_shown = false;
                self.transition(S::Open, &mut actions);
                actions.push(A::Notify(Notice::info("Connected to terminal server")));
            }
            (_, ConnectionEvent::Opened) => {
                tracing::debug!(state = ?self.state, "ignoring open outside of connecting");
            }

            (_, ConnectionEvent::Error(message)) => {
                tracing::warn!(%message, "transport error");
                if !self.error_shown {
                    self.error_shown = true;
                    actions.push(A::Notify(Notice::warning(format!("Connection error: {}", message))));
                }
            }

            (S::Connecting | S::Open, ConnectionEvent::Closed { code }) if is_clean_close(code) => {
                tracing::info!(?code, "transport closed cleanly");
                self.reset_failure();
                self.transition(S::Idle, &mut actions);
            }
            (S::Connecting | S::Open, ConnectionEvent::Closed { code }) => {
                self.connection_failed = true;
                if self.retry_count < self.policy.max_retries {
                    let delay = self.policy.delay_for(self.retry_count);
                    self.retry_count += 1;
                    let ticket = self.next_ticket;
                    self.next_ticket += 1;
                    self.pending_ticket = Some(ticket);
                    tracing::info!(
                        ?code,
                        attempt = self.retry_count,
                        max = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transport dropped, scheduling reconnect"
                    );
                    self.transition(S::Retrying, &mut actions);
                    actions.push(A::ScheduleRetry { delay, ticket });
                } else {
                    tracing::error!(?code, retries = self.retry_count, "reconnect budget exhausted");
                    self.transition(S::Failed, &mut actions);
                    if !self.final_message_shown {
                        self.final_message_shown = true;
                        actions.push(A::Notify(Notice::error(FAILURE_NOTICE)));
                    }
                }
            }
            (_, ConnectionEvent::Closed { .. }) => {}

            (S::Retrying, ConnectionEvent::RetryDue { ticket }) if self.pending_ticket == Some(ticket) => {
                self.pending_ticket = None;
                actions.push(A::OpenTransport);
                self.transition(S::Connecting, &mut actions);
            }
            (_, ConnectionEvent::RetryDue { ticket }) => {
                tracing::debug!(ticket, "stale retry timer");
            }

            (state, ConnectionEvent::CloseRequested) => {
                if state.has_transport() {
                    actions.push(A::CloseTransport);
                }
                self.pending_ticket = None;
                self.reset_failure();
                self.transition(S::Idle, &mut actions);
            }
        }

        actions
    }

    /// A clean close starts the next session with a fresh budget and notices
    fn reset_failure(&mut self) {
        self.retry_count = 0;
        self.connection_failed = false;
        self.final_message_shown = false;
        self.error_shown = false;
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<ConnectionAction>) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "connection state");
            self.state = next;
            actions.push(ConnectionAction::Changed(next));
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// ADDRESS DERIVATION
// ═══════════════════════════════════════════════════════════════

/// Derive the terminal WebSocket address from the embedding page's address
pub fn derive_terminal_url(page_url: &str) -> Result<Url> {
    let page = Url::parse(page_url)
        .map_err(|e| TerminalError::InvalidAddress(format!("{}: {}", page_url, e)))?;
    let scheme = if page.scheme() == "https" { "wss" } else { "ws" };
    let host = page
        .host_str()
        .ok_or_else(|| TerminalError::InvalidAddress(format!("{}: no host", page_url)))?;
    let authority = match page.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let target = if is_proxied_path(page.path()) {
        format!("{}://{}/proxy/{}{}", scheme, authority, BACKEND_PORT, TERMINAL_PATH)
    } else if host == "localhost" {
        format!("{}://localhost:{}{}", scheme, BACKEND_PORT, TERMINAL_PATH)
    } else {
        format!("{}://{}{}", scheme, authority, TERMINAL_PATH)
    };

    Url::parse(&target).map_err(|e| TerminalError::InvalidAddress(format!("{}: {}", target, e)))
}

/// `/proxy/<port>/...` as served by dev-container port forwarding
fn is_proxied_path(path: &str) -> bool {
    let mut segments = path.trim_start_matches('/').split('/');
    segments.next() == Some("proxy")
        && segments
            .next()
            .map_or(false, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Validate a ws/wss address and pin the session id onto it
pub fn with_session_id(url: &str, session_id: &str) -> Result<Url> {
    let mut url =
        Url::parse(url).map_err(|e| TerminalError::InvalidAddress(format!("{}: {}", url, e)))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TerminalError::InvalidAddress(format!(
            "{}: expected ws:// or wss://",
            url
        )));
    }
    if !url.query_pairs().any(|(k, _)| k == "session_id") {
        url.query_pairs_mut().append_pair("session_id", session_id);
    }
    Ok(url)
}

// ═══════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// Everything the session loop reacts to besides keystrokes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transport { generation: u64, event: TransportEvent },
    RetryDue { ticket: u64 },
}

/// Where a transport reports its events
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TransportSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the session loop is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent::Transport { generation: self.generation, event })
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Write side of an open transport
#[derive(Debug)]
pub struct TransportHandle {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(outgoing: mpsc::UnboundedSender<Outgoing>, task: Option<JoinHandle<()>>) -> Self {
        Self { outgoing, task }
    }

    pub fn send(&self, text: String) -> Result<()> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TerminalError::NotConnected)
    }

    /// Ask the transport to close cleanly; the task finishes on its own
    pub fn close(mut self) {
        if self.outgoing.send(Outgoing::Close).is_err() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

/// Opens transports. The WebSocket implementation is `WsConnector`.
pub trait Connector: Send + Sync {
    fn open(&self, url: &Url, sink: TransportSink) -> TransportHandle;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &Url, sink: TransportSink) -> TransportHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url.to_string(), rx, sink));
        TransportHandle::new(tx, Some(task))
    }
}

async fn run_socket(url: String, mut outgoing: mpsc::UnboundedReceiver<Outgoing>, sink: TransportSink) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            sink.emit(TransportEvent::Error(e.to_string()));
            sink.emit(TransportEvent::Closed { code: None, reason: "connect failed".into() });
            return;
        }
    };
    tracing::info!(%url, "websocket open");
    sink.emit(TransportEvent::Opened);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        sink.emit(TransportEvent::Error(e.to_string()));
                        sink.emit(TransportEvent::Closed { code: None, reason: "send failed".into() });
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    sink.emit(TransportEvent::Closed { code: Some(CLOSE_NORMAL), reason: "client closed".into() });
                    return;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    sink.emit(TransportEvent::Message(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    sink.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.emit(TransportEvent::Error(e.to_string()));
                    sink.emit(TransportEvent::Closed { code: None, reason: "read failed".into() });
                    return;
                }
                None => {
                    sink.emit(TransportEvent::Closed { code: None, reason: "stream ended".into() });
                    return;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// MANAGER
// ═══════════════════════════════════════════════════════════════

pub struct ConnectionManager {
    machine: ConnectionMachine,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    bus: EventBus,
    transport: Option<TransportHandle>,
    generation: u64,
    default_url: Option<String>,
    target: Option<Url>,
    session_id: String,
}

impl ConnectionManager {
    pub fn new(
        policy: RetryPolicy,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<SessionEvent>,
        bus: EventBus,
        session_id: String,
    ) -> Self {
        Self {
            machine: ConnectionMachine::new(policy),
            connector,
            events,
            bus,
            transport: None,
            generation: 0,
            default_url: None,
            target: None,
            session_id,
        }
    }

    /// Address used by `connect(None)` when nothing was connected before
    pub fn set_default_url(&mut self, url: impl Into<String>) {
        self.default_url = Some(url.into());
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    pub fn is_open(&self) -> bool {
        self.machine.state() == ConnectionState::Open && self.transport.is_some()
    }

    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Open a transport to `url`, or to the last/default address
    pub fn connect(&mut self, url: Option<&str>, surface: &mut dyn Surface) {
        let raw = match url {
            Some(u) => u.to_string(),
            None => match (&self.target, &self.default_url) {
                (Some(t), _) => t.to_string(),
                (None, Some(d)) => d.clone(),
                (None, None) => {
                    output::write_error(surface, "no terminal address configured");
                    return;
                }
            },
        };

        match with_session_id(&raw, &self.session_id) {
            Ok(target) => self.target = Some(target),
            Err(e) => {
                output::write_error(surface, &e.to_string());
                return;
            }
        }

        let actions = self.machine.handle(ConnectionEvent::ConnectRequested);
        self.apply(actions, surface);
    }

    pub fn reconnect(&mut self, surface: &mut dyn Surface) {
        self.connect(None, surface);
    }

    /// Clean shutdown; never triggers a retry
    pub fn close(&mut self, surface: &mut dyn Surface) {
        let actions = self.machine.handle(ConnectionEvent::CloseRequested);
        self.apply(actions, surface);
    }

    /// Send `{"cmd": line}`; degrades to a visible message when closed
    pub fn send(&mut self, line: &str, surface: &mut dyn Surface) -> bool {
        let sent = match (&self.transport, self.machine.state()) {
            (Some(transport), ConnectionState::Open) => {
                let body = serde_json::json!({ "cmd": line }).to_string();
                transport.send(body).is_ok()
            }
            _ => false,
        };
        if !sent {
            tracing::debug!(line, "send while not connected");
            surface.write_line("Not connected to terminal server. Press Ctrl-R to reconnect.");
        }
        sent
    }

    /// Feed one event from the session channel
    pub fn handle_event(&mut self, event: SessionEvent, surface: &mut dyn Surface) {
        match event {
            SessionEvent::Transport { generation, event } => {
                if generation != self.generation {
                    tracing::trace!(generation, current = self.generation, "dropping stale transport event");
                    return;
                }
                let machine_event = match event {
                    TransportEvent::Opened => ConnectionEvent::Opened,
                    TransportEvent::Message(raw) => {
                        output::render_remote(&raw, surface, &self.bus);
                        return;
                    }
                    TransportEvent::Error(message) => ConnectionEvent::Error(message),
                    TransportEvent::Closed { code, reason } => {
                        tracing::debug!(?code, %reason, "transport closed");
                        self.transport = None;
                        ConnectionEvent::Closed { code }
                    }
                };
                let actions = self.machine.handle(machine_event);
                self.apply(actions, surface);
            }
            SessionEvent::RetryDue { ticket } => {
                let actions = self.machine.handle(ConnectionEvent::RetryDue { ticket });
                self.apply(actions, surface);
            }
        }
    }

    fn apply(&mut self, actions: Vec<ConnectionAction>, surface: &mut dyn Surface) {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport => self.open_transport(),
                ConnectionAction::CloseTransport => {
                    self.generation += 1;
                    if let Some(transport) = self.transport.take() {
                        transport.close();
                    }
                }
                ConnectionAction::ScheduleRetry { delay, ticket } => {
                    let tx = self.events.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(SessionEvent::RetryDue { ticket });
                    });
                }
                ConnectionAction::Notify(notice) => {
                    match notice.level {
                        NoticeLevel::Info => {}
                        NoticeLevel::Warning => surface.write_line(&format!("\x1b[33m{}\x1b[0m", notice.text)),
                        NoticeLevel::Error => output::write_error(surface, &notice.text),
                    }
                    self.bus.publish(UiEvent::Notice(notice));
                }
                ConnectionAction::Changed(state) => {
                    self.bus.publish(UiEvent::ConnectionChanged(state));
                }
            }
        }
    }

    fn open_transport(&mut self) {
        // Invariant: one live transport. Anything left over is superseded.
        self.generation += 1;
        if let Some(old) = self.transport.take() {
            old.close();
        }
        let Some(target) = self.target.clone() else {
            tracing::error!("open requested without a target address");
            return;
        };
        tracing::info!(url = %target, generation = self.generation, "opening transport");
        let sink = TransportSink::new(self.generation, self.events.clone());
        self.transport = Some(self.connector.open(&target, sink));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}
