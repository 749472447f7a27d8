//! Local tool invocation for `mcp <server> <query>`
//!
//! Targets matching the local tool prefix are answered by the backend's
//! tool endpoint over HTTP instead of the terminal transport.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Result, TerminalError};

pub const TOOL_ENDPOINT_PATH: &str = "/api/docker-mcp/query";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolRequest {
    pub server: String,
    pub query: String,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, request: &ToolRequest) -> Result<serde_json::Value>;
}

/// POSTs `{server, query}` to `<api_base>/api/docker-mcp/query`
pub struct HttpToolInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpToolInvoker {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}{}", api_base.trim_end_matches('/'), TOOL_ENDPOINT_PATH),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, request: &ToolRequest) -> Result<serde_json::Value> {
        tracing::info!(server = %request.server, endpoint = %self.endpoint, "invoking local tool");
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TerminalError::Tool(format!("{}: {}", status, body)));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Whether `mcp <target>` is answered locally
pub fn is_local_target(target: &str, prefix: &str) -> bool {
    !prefix.is_empty() && target.starts_with(prefix) && target.len() > prefix.len()
}

/// Check that the backend answers at all
pub async fn check_backend(api_base: &str) -> Result<reqwest::StatusCode> {
    let response = reqwest::Client::new()
        .get(api_base)
        .timeout(Duration::from_secs(5))
        .send()
        .await?;
    Ok(response.status())
}
