//! Build-mode `!` commands
//!
//! Resolved entirely client side, never sent over the transport. Each
//! handler reports a `SpecialResult` so embedders can react to outcomes.

use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::dispatcher::Dispatcher;
use crate::events::{EventBus, UiEvent};
use crate::output::{self, Surface};
use crate::scaffold::ProjectScaffolder;

pub const SPECIAL_PREFIX: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "npm" => Some(PackageManager::Npm),
            "yarn" => Some(PackageManager::Yarn),
            "pnpm" => Some(PackageManager::Pnpm),
            _ => None,
        }
    }

    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm install",
            PackageManager::Yarn => "yarn install",
            PackageManager::Pnpm => "pnpm install",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    CreateProject { template: Option<String>, name: Option<String> },
    InstallDeps { manager: Option<String> },
    Preview { port: Option<String> },
    Help,
    Unknown(String),
}

impl SpecialCommand {
    /// `None` unless the line starts with `!`
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(SPECIAL_PREFIX)?;
        let mut tokens = rest.split_whitespace().map(str::to_string);
        let name = tokens.next().unwrap_or_default();

        let command = match name.as_str() {
            "create-project" => SpecialCommand::CreateProject {
                template: tokens.next(),
                name: tokens.next(),
            },
            "install-deps" => SpecialCommand::InstallDeps { manager: tokens.next() },
            "preview" => SpecialCommand::Preview { port: tokens.next() },
            "help" => SpecialCommand::Help,
            _ => SpecialCommand::Unknown(name),
        };
        Some(command)
    }
}

/// Structured detail attached to a successful special command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialPayload {
    pub template: Option<String>,
    pub name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialResult {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<SpecialPayload>,
}

impl SpecialResult {
    fn ok(data: Option<SpecialPayload>) -> Self {
        Self { success: true, error: None, data }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), data: None }
    }
}

const SPECIAL_HELP: &[(&str, &str)] = &[
    ("!create-project <template> <name>", "Scaffold a project (vanilla, node, react)"),
    ("!install-deps [npm|yarn|pnpm]", "Install dependencies (default npm)"),
    ("!preview [port]", "Open the preview pane"),
    ("!help", "Show special commands"),
];

pub struct SpecialCommands {
    scaffolder: Arc<dyn ProjectScaffolder>,
    bus: EventBus,
    default_port: u16,
}

impl SpecialCommands {
    pub fn new(scaffolder: Arc<dyn ProjectScaffolder>, bus: EventBus, default_port: u16) -> Self {
        Self { scaffolder, bus, default_port }
    }

    pub async fn execute(
        &self,
        command: SpecialCommand,
        dispatcher: &mut Dispatcher,
        conn: &mut ConnectionManager,
        surface: &mut dyn Surface,
    ) -> SpecialResult {
        tracing::debug!(?command, "special command");
        match command {
            SpecialCommand::CreateProject { template: Some(template), name: Some(name) } => {
                self.create_project(template, name, dispatcher, conn, surface).await
            }
            SpecialCommand::CreateProject { .. } => {
                let msg = "Usage: !create-project <template> <name>";
                output::write_error(surface, msg);
                SpecialResult::fail(msg)
            }
            SpecialCommand::InstallDeps { manager } => {
                let requested = manager.unwrap_or_else(|| "npm".to_string());
                let Some(pm) = PackageManager::parse(&requested) else {
                    let msg = format!("Unsupported package manager: {} (use npm, yarn or pnpm)", requested);
                    output::write_error(surface, &msg);
                    return SpecialResult::fail(msg);
                };
                surface.write_line(&format!("Installing dependencies with {}...", requested));
                dispatcher.dispatch(pm.install_command(), conn, surface).await;
                SpecialResult::ok(None)
            }
            SpecialCommand::Preview { port } => {
                let port = match port {
                    None => self.default_port,
                    Some(raw) => match raw.parse::<u16>() {
                        Ok(p) if p > 0 => p,
                        _ => {
                            let msg = format!("Invalid port: {}", raw);
                            output::write_error(surface, &msg);
                            return SpecialResult::fail(msg);
                        }
                    },
                };
                self.bus.publish(UiEvent::PreviewPort { port });
                surface.write_line(&format!("Opening preview on port {}", port));
                SpecialResult::ok(Some(SpecialPayload { port: Some(port), ..Default::default() }))
            }
            SpecialCommand::Help => {
                surface.write_line("Special commands:");
                for (cmd, desc) in SPECIAL_HELP {
                    surface.write_line(&format!("  {:<36} {}", cmd, desc));
                }
                SpecialResult::ok(None)
            }
            SpecialCommand::Unknown(name) => {
                let msg = format!("Unknown special command: !{}", name);
                output::write_error(surface, &msg);
                surface.write_line("Type !help for available special commands");
                SpecialResult::fail(msg)
            }
        }
    }

    async fn create_project(
        &self,
        template: String,
        name: String,
        dispatcher: &mut Dispatcher,
        conn: &mut ConnectionManager,
        surface: &mut dyn Surface,
    ) -> SpecialResult {
        surface.write_line(&format!("Creating {} project '{}'...", template, name));
        match self.scaffolder.create_project(&template, &name).await {
            Ok(dir) => {
                surface.write_line(&format!("Project created at {}", dir.display()));
                dispatcher.dispatch(&format!("cd {}", name), conn, surface).await;
                dispatcher.dispatch("ls", conn, surface).await;
                SpecialResult::ok(Some(SpecialPayload {
                    template: Some(template),
                    name: Some(name),
                    port: None,
                }))
            }
            Err(e) => {
                tracing::warn!(%template, %name, error = %e, "create-project failed");
                output::write_error(surface, &e.to_string());
                SpecialResult::fail(e.to_string())
            }
        }
    }
}
