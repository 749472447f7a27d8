//! Project scaffolding for `!create-project <template> <name>`
//!
//! The terminal only asks a `ProjectScaffolder` to lay a project down; the
//! default one writes a small template tree into the workspace directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Result, TerminalError};

#[async_trait]
pub trait ProjectScaffolder: Send + Sync {
    async fn create_project(&self, template: &str, name: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Vanilla,
    Node,
    React,
}

impl Template {
    pub const ALL: [Template; 3] = [Template::Vanilla, Template::Node, Template::React];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vanilla" | "html" | "static" => Some(Template::Vanilla),
            "node" | "express" => Some(Template::Node),
            "react" => Some(Template::React),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Template::Vanilla => "vanilla",
            Template::Node => "node",
            Template::React => "react",
        }
    }

    fn files(&self, project: &str) -> Vec<(&'static str, String)> {
        match self {
            Template::Vanilla => vec![
                ("index.html", format!(
                    "<!doctype html>\n<html>\n<head>\n  <title>{project}</title>\n  <link rel=\"stylesheet\" href=\"style.css\">\n</head>\n<body>\n  <h1>{project}</h1>\n  <script src=\"main.js\"></script>\n</body>\n</html>\n"
                )),
                ("style.css", "body { font-family: sans-serif; margin: 2rem; }\n".to_string()),
                ("main.js", "console.log('ready');\n".to_string()),
            ],
            Template::Node => vec![
                ("package.json", package_json(project, "node index.js", &[])),
                ("index.js", "const http = require('http');\n\nhttp.createServer((req, res) => {\n  res.end('ok');\n}).listen(process.env.PORT || 3000);\n".to_string()),
            ],
            Template::React => vec![
                ("package.json", package_json(project, "vite", &[("react", "^18.2.0"), ("react-dom", "^18.2.0"), ("vite", "^5.0.0")])),
                ("index.html", "<!doctype html>\n<html>\n<body>\n  <div id=\"root\"></div>\n  <script type=\"module\" src=\"/src/main.jsx\"></script>\n</body>\n</html>\n".to_string()),
                ("src/main.jsx", format!(
                    "import React from 'react';\nimport {{ createRoot }} from 'react-dom/client';\n\ncreateRoot(document.getElementById('root')).render(<h1>{project}</h1>);\n"
                )),
            ],
        }
    }
}

fn package_json(name: &str, start: &str, deps: &[(&str, &str)]) -> String {
    let dependencies: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    let pkg = serde_json::json!({
        "name": name,
        "version": "0.1.0",
        "private": true,
        "scripts": { "start": start },
        "dependencies": dependencies,
    });
    // Serializing a json! literal cannot fail
    serde_json::to_string_pretty(&pkg).unwrap_or_default() + "\n"
}

/// Writes template trees under a root directory
#[derive(Debug, Clone)]
pub struct WorkspaceScaffolder {
    root: PathBuf,
}

impl WorkspaceScaffolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[async_trait]
impl ProjectScaffolder for WorkspaceScaffolder {
    async fn create_project(&self, template: &str, name: &str) -> Result<PathBuf> {
        let tpl = Template::parse(template).ok_or_else(|| {
            let known: Vec<_> = Template::ALL.iter().map(|t| t.name()).collect();
            TerminalError::Scaffold(format!(
                "unknown template '{}' (available: {})",
                template,
                known.join(", ")
            ))
        })?;
        if !valid_project_name(name) {
            return Err(TerminalError::Scaffold(format!("invalid project name '{}'", name)));
        }

        let dir = self.root.join(name);
        if dir.exists() {
            return Err(TerminalError::Scaffold(format!("{} already exists", dir.display())));
        }

        for (rel, content) in tpl.files(name) {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }
        tracing::info!(template = tpl.name(), dir = %dir.display(), "project scaffolded");
        Ok(dir)
    }
}
