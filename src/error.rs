//! Error types for terminal operations
//!
//! Library code returns `TerminalError`; the binary wraps everything in
//! `anyhow` at the edges.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("not connected")]
    NotConnected,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("tool request failed: {0}")]
    Tool(String),

    #[error("scaffolding failed: {0}")]
    Scaffold(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TerminalError>;

impl From<reqwest::Error> for TerminalError {
    fn from(e: reqwest::Error) -> Self {
        TerminalError::Tool(e.to_string())
    }
}
