//! Configuration management with XDG paths
//!
//! ~/.config/podterm/config.json - endpoints, retry policy, preferences (0600)
//! ~/.local/state/podterm/       - command history, log file, workspaces

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::RetryPolicy;

const APP_NAME: &str = "podterm";

/// Environment variable that overrides the terminal URL
pub const TERMINAL_URL_ENV: &str = "PODTERM_URL";

/// Get config directory (~/.config/podterm/)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get state directory (~/.local/state/podterm/)
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .context("Could not determine state directory")?;
    Ok(base.join(APP_NAME))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Ensure all directories exist
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(state_dir()?)?;
    Ok(())
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address of the page the terminal is embedded in; drives URL derivation
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// Explicit terminal WebSocket URL (skips derivation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_url: Option<String>,

    /// Backend HTTP base for the tool-invocation endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Enable `!` special commands
    #[serde(default)]
    pub build_mode: bool,

    /// `mcp` targets with this prefix go to the local tool endpoint
    #[serde(default = "default_tool_prefix")]
    pub tool_prefix: String,

    #[serde(default = "default_preview_port")]
    pub preview_port: u16,

    /// Where `!create-project` scaffolds into (defaults to state dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

fn default_page_url() -> String { "http://localhost:3000/".into() }
fn default_api_base() -> String { "http://localhost:5000".into() }
fn default_retry_base_ms() -> u64 { 1000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_max_retries() -> u32 { 5 }
fn default_tool_prefix() -> String { "docker-".into() }
fn default_preview_port() -> u16 { 3000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            terminal_url: None,
            api_base: default_api_base(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_retries: default_max_retries(),
            build_mode: false,
            tool_prefix: default_tool_prefix(),
            preview_port: default_preview_port(),
            workspace_dir: None,
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults
    pub fn load() -> Result<Self> {
        ensure_dirs()?;
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to disk with secure permissions
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;

        Ok(())
    }

    /// Apply a `config set <key> <value>` edit
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "page" | "page_url" => self.page_url = value.to_string(),
            "url" | "terminal_url" => {
                self.terminal_url = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "api" | "api_base" => self.api_base = value.trim_end_matches('/').to_string(),
            "retry_base_ms" => {
                self.retry_base_ms = value.parse().context("retry_base_ms must be an integer")?;
            }
            "retry_max_delay_ms" => {
                self.retry_max_delay_ms =
                    value.parse().context("retry_max_delay_ms must be an integer")?;
            }
            "max_retries" => {
                self.max_retries = value.parse().context("max_retries must be an integer")?;
            }
            "build" | "build_mode" => {
                self.build_mode = value.parse().context("build_mode must be true or false")?;
            }
            "tool_prefix" => self.tool_prefix = value.to_string(),
            "preview_port" => {
                self.preview_port = value.parse().context("preview_port must be a port number")?;
            }
            "workspace" | "workspace_dir" => self.workspace_dir = Some(PathBuf::from(value)),
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: page_url, terminal_url, api_base, \
                 retry_base_ms, retry_max_delay_ms, max_retries, build_mode, tool_prefix, \
                 preview_port, workspace_dir",
                key
            ),
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_retries: self.max_retries,
        }
    }

    /// Explicit terminal URL: environment first, then config
    pub fn explicit_terminal_url(&self) -> Option<String> {
        if let Ok(url) = std::env::var(TERMINAL_URL_ENV) {
            if !url.is_empty() {
                return Some(url);
            }
        }
        self.terminal_url.clone()
    }

    pub fn workspace_dir(&self) -> Result<PathBuf> {
        match &self.workspace_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(state_dir()?.join("workspaces")),
        }
    }
}
