//! The terminal session: surface + connection + dispatcher + special layer
//!
//! `Terminal` is what an embedder drives. Feed it submitted lines and the
//! session events it produces; read the scrollback and subscribe to the bus
//! for everything else.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::connection::{self, ConnectionManager, ConnectionState, Connector, SessionEvent, WsConnector};
use crate::dispatcher::{CommandHandler, Dispatch, Dispatcher};
use crate::events::{EventBus, UiEvent};
use crate::history::HistoryStore;
use crate::output::{Scrollback, Surface, LINE_END};
use crate::scaffold::{ProjectScaffolder, WorkspaceScaffolder};
use crate::special::{SpecialCommand, SpecialCommands, SpecialResult};
use crate::tools::{HttpToolInvoker, ToolInvoker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    #[default]
    Standard,
    /// Enables `!` special commands
    Build,
}

/// Result of submitting one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Dispatched(Dispatch),
    Special(SpecialResult),
}

pub struct TerminalOptions {
    pub mode: TerminalMode,
    pub retry: connection::RetryPolicy,
    pub default_url: Option<String>,
    pub tool_prefix: String,
    pub preview_port: u16,
    pub session_id: String,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            mode: TerminalMode::Standard,
            retry: connection::RetryPolicy::default(),
            default_url: None,
            tool_prefix: "docker-".into(),
            preview_port: 3000,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Collaborators the terminal delegates to
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub tools: Arc<dyn ToolInvoker>,
    pub scaffolder: Arc<dyn ProjectScaffolder>,
    pub history: Option<HistoryStore>,
}

pub struct Terminal {
    surface: Scrollback,
    connection: ConnectionManager,
    dispatcher: Dispatcher,
    special: SpecialCommands,
    mode: TerminalMode,
    bus: EventBus,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Terminal {
    pub fn new(options: TerminalOptions, collaborators: Collaborators) -> Self {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut connection = ConnectionManager::new(
            options.retry,
            collaborators.connector,
            tx,
            bus.clone(),
            options.session_id,
        );
        if let Some(url) = options.default_url {
            connection.set_default_url(url);
        }

        let mut dispatcher = Dispatcher::new(collaborators.tools, options.tool_prefix);
        if let Some(store) = collaborators.history {
            dispatcher = dispatcher.with_history_store(store);
        }

        let special = SpecialCommands::new(collaborators.scaffolder, bus.clone(), options.preview_port);

        Self {
            surface: Scrollback::new(),
            connection,
            dispatcher,
            special,
            mode: options.mode,
            bus,
            events: rx,
        }
    }

    /// Wire up the real WebSocket, HTTP tool endpoint and workspace scaffolder
    pub fn from_config(cfg: &Config, build_mode: bool) -> Result<Self> {
        let default_url = match cfg.explicit_terminal_url() {
            Some(url) => url,
            None => connection::derive_terminal_url(&cfg.page_url)?.to_string(),
        };
        let options = TerminalOptions {
            mode: if build_mode || cfg.build_mode { TerminalMode::Build } else { TerminalMode::Standard },
            retry: cfg.retry_policy(),
            default_url: Some(default_url),
            tool_prefix: cfg.tool_prefix.clone(),
            preview_port: cfg.preview_port,
            ..Default::default()
        };
        let history = match HistoryStore::default_location() {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "history disabled");
                None
            }
        };
        let collaborators = Collaborators {
            connector: Arc::new(WsConnector),
            tools: Arc::new(HttpToolInvoker::new(&cfg.api_base)),
            scaffolder: Arc::new(WorkspaceScaffolder::new(cfg.workspace_dir()?)),
            history,
        };
        Ok(Self::new(options, collaborators))
    }

    // ── Embedding surface ──

    pub fn write(&mut self, text: &str) {
        self.surface.write(text);
    }

    pub fn write_line(&mut self, text: &str) {
        self.surface.write_line(text);
    }

    pub fn prompt(&mut self) {
        self.surface.prompt();
    }

    pub fn register_command<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[String], &mut dyn Surface) + Send + Sync + 'static,
    {
        let handler: CommandHandler = Box::new(handler);
        self.dispatcher.register_command(name, handler);
    }

    pub fn connect(&mut self, url: Option<&str>) {
        self.connection.connect(url, &mut self.surface);
    }

    pub fn reconnect(&mut self) {
        self.connection.reconnect(&mut self.surface);
    }

    pub fn close(&mut self) {
        self.connection.close(&mut self.surface);
    }

    // ── Input ──

    /// Echo and route one line of input
    pub async fn submit(&mut self, line: &str) -> Submitted {
        self.surface.write(line);
        self.surface.write(LINE_END);

        if self.mode == TerminalMode::Build {
            if let Some(command) = SpecialCommand::parse(line) {
                self.dispatcher.record(line.trim());
                let result = self
                    .special
                    .execute(command, &mut self.dispatcher, &mut self.connection, &mut self.surface)
                    .await;
                self.surface.prompt();
                return Submitted::Special(result);
            }
        }

        let outcome = self
            .dispatcher
            .dispatch(line, &mut self.connection, &mut self.surface)
            .await;
        if outcome != Dispatch::Forwarded {
            self.surface.prompt();
        }
        Submitted::Dispatched(outcome)
    }

    /// Previous history entry for the edit line
    pub fn history_up(&mut self) -> Option<String> {
        self.dispatcher.history_mut().up().map(str::to_string)
    }

    /// Next history entry, or empty past the end
    pub fn history_down(&mut self) -> String {
        self.dispatcher.history_mut().down().to_string()
    }

    // ── Session events ──

    /// Drain whatever transports and timers have posted so far
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.connection.handle_event(event, &mut self.surface);
            handled += 1;
        }
        handled
    }

    /// Wait for the next session event and handle it
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.connection.handle_event(event, &mut self.surface);
                true
            }
            None => false,
        }
    }

    // ── Read side ──

    pub fn surface(&self) -> &Scrollback {
        &self.surface
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn mode(&self) -> TerminalMode {
        self.mode
    }
}
