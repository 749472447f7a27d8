//! Command dispatch
//!
//! A line resolves, first match wins, to:
//! 1. a built-in (`clear`, `help`, `echo`)
//! 2. `mcp <server> <query...>` (local tool endpoint or remote)
//! 3. a registered command
//! 4. the remote transport, or "command not found" when disconnected

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::history::{CommandHistory, HistoryStore};
use crate::output::{self, Surface};
use crate::tools::{self, ToolInvoker, ToolRequest};

/// Callback for an embedder-registered command
pub type CommandHandler = Box<dyn Fn(&[String], &mut dyn Surface) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Clear,
    Help,
    Echo(Vec<String>),
    Mcp { target: Option<String>, query: String },
    Registered { name: String, args: Vec<String> },
    Remote { name: String },
}

impl Command {
    pub fn parse(line: &str, is_registered: impl Fn(&str) -> bool) -> Self {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let Some(name) = tokens.next() else {
            return Command::Empty;
        };
        let args: Vec<String> = tokens.collect();

        match name.as_str() {
            "clear" => Command::Clear,
            "help" => Command::Help,
            "echo" => Command::Echo(args),
            "mcp" => {
                let mut args = args.into_iter();
                let target = args.next();
                let query = args.collect::<Vec<_>>().join(" ");
                Command::Mcp { target, query }
            }
            _ if is_registered(name.as_str()) => Command::Registered { name, args },
            _ => Command::Remote { name },
        }
    }
}

/// What happened to a dispatched line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Blank input; nothing recorded
    Empty,
    /// Answered locally; caller re-prompts
    Handled,
    /// Sent to the remote service, which prompts on its own
    Forwarded,
}

const BUILTIN_HELP: &[(&str, &str)] = &[
    ("clear", "Clear the terminal"),
    ("help", "Show this help message"),
    ("echo <text>", "Print text"),
    ("mcp <server> <query>", "Query an MCP server"),
];

const REMOTE_HELP: &[(&str, &str)] = &[
    ("ls [path]", "List files in directory"),
    ("cd <path>", "Change directory"),
    ("pwd", "Print working directory"),
    ("cat <file>", "Display file contents"),
    ("touch <file>", "Create an empty file"),
    ("mkdir <dir>", "Create a directory"),
    ("echo <text> > <file>", "Write text to file"),
    ("mcp web-search <query>", "Search the web"),
    ("mcp code-search <query>", "Search for code samples"),
    ("mcp npm install <pkg>", "Install an npm package"),
];

pub struct Dispatcher {
    commands: HashMap<String, CommandHandler>,
    history: CommandHistory,
    store: Option<HistoryStore>,
    tools: Arc<dyn ToolInvoker>,
    tool_prefix: String,
}

impl Dispatcher {
    pub fn new(tools: Arc<dyn ToolInvoker>, tool_prefix: impl Into<String>) -> Self {
        Self {
            commands: HashMap::new(),
            history: CommandHistory::new(),
            store: None,
            tools,
            tool_prefix: tool_prefix.into(),
        }
    }

    /// Persist history to `store`, seeding from what it already holds
    pub fn with_history_store(mut self, store: HistoryStore) -> Self {
        if let Err(e) = store.compact_if_needed() {
            tracing::warn!(error = %e, "could not compact command history");
        }
        match store.load() {
            Ok(entries) => self.history = CommandHistory::from_entries(entries),
            Err(e) => tracing::warn!(error = %e, "could not load command history"),
        }
        self.store = Some(store);
        self
    }

    /// Later registrations under the same name replace earlier ones
    pub fn register_command(&mut self, name: impl Into<String>, handler: CommandHandler) {
        let name = name.into();
        tracing::debug!(%name, "registered command");
        self.commands.insert(name, handler);
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut CommandHistory {
        &mut self.history
    }

    /// Append to history and reset the recall cursor
    pub fn record(&mut self, line: &str) {
        self.history.push(line);
        if let Some(store) = &self.store {
            if let Err(e) = store.append(line) {
                tracing::warn!(error = %e, "could not persist command history");
            }
        }
    }

    pub async fn dispatch(
        &mut self,
        line: &str,
        conn: &mut ConnectionManager,
        surface: &mut dyn Surface,
    ) -> Dispatch {
        let line = line.trim();
        if line.is_empty() {
            return Dispatch::Empty;
        }
        self.record(line);

        let command = Command::parse(line, |name| self.commands.contains_key(name));
        tracing::debug!(?command, "dispatch");

        match command {
            Command::Empty => Dispatch::Empty,
            Command::Clear => {
                surface.clear();
                Dispatch::Handled
            }
            Command::Help => {
                self.render_help(conn.is_open(), surface);
                Dispatch::Handled
            }
            Command::Echo(args) => {
                surface.write_line(&args.join(" "));
                Dispatch::Handled
            }
            Command::Mcp { target: None, .. } => {
                surface.write_line("Usage: mcp <server> <query>");
                Dispatch::Handled
            }
            Command::Mcp { target: Some(target), query } => {
                if tools::is_local_target(&target, &self.tool_prefix) {
                    self.invoke_tool(target, query, surface).await;
                    Dispatch::Handled
                } else {
                    forward(line, conn, surface)
                }
            }
            Command::Registered { name, args } => {
                if let Some(handler) = self.commands.get(&name) {
                    handler(args.as_slice(), surface);
                }
                Dispatch::Handled
            }
            Command::Remote { name } => {
                if conn.is_open() {
                    forward(line, conn, surface)
                } else {
                    surface.write_line(&format!("{}: command not found", name));
                    Dispatch::Handled
                }
            }
        }
    }

    async fn invoke_tool(&self, server: String, query: String, surface: &mut dyn Surface) {
        if query.is_empty() {
            surface.write_line(&format!("Usage: mcp {} <query>", server));
            return;
        }
        surface.write_line(&format!("Querying {}...", server));
        let request = ToolRequest { server, query };
        match self.tools.invoke(&request).await {
            Ok(value) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                for line in pretty.lines() {
                    surface.write_line(line);
                }
            }
            Err(e) => {
                tracing::warn!(server = %request.server, error = %e, "tool invocation failed");
                output::write_error(surface, &e.to_string());
            }
        }
    }

    fn render_help(&self, connected: bool, surface: &mut dyn Surface) {
        surface.write_line("Built-in commands:");
        for (cmd, desc) in BUILTIN_HELP {
            surface.write_line(&format!("  {:<26} {}", cmd, desc));
        }
        surface.write_line(&format!(
            "  {:<26} Servers starting with '{}' are answered locally",
            "", self.tool_prefix
        ));

        if !self.commands.is_empty() {
            let mut names: Vec<_> = self.commands.keys().collect();
            names.sort();
            surface.write_line("");
            surface.write_line("Custom commands:");
            for name in names {
                surface.write_line(&format!("  {}", name));
            }
        }

        if connected {
            surface.write_line("");
            surface.write_line("Remote commands:");
            for (cmd, desc) in REMOTE_HELP {
                surface.write_line(&format!("  {:<26} {}", cmd, desc));
            }
        }
    }
}

fn forward(line: &str, conn: &mut ConnectionManager, surface: &mut dyn Surface) -> Dispatch {
    if conn.send(line, surface) {
        Dispatch::Forwarded
    } else {
        Dispatch::Handled
    }
}
