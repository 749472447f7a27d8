//! Command history with up/down recall and JSONL persistence
//!
//! History lives in ~/.local/state/podterm/history.jsonl, one entry per line:
//! `{"command": "...", "timestamp": "..."}`. Only the most recent
//! `MAX_PERSISTED` entries are kept on disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config;

pub const MAX_PERSISTED: usize = 500;

/// In-memory history, most recent last
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: Vec<String>,
    /// Points past the end when not navigating
    cursor: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(mut entries: Vec<String>) -> Self {
        if entries.len() > MAX_PERSISTED {
            entries.drain(..entries.len() - MAX_PERSISTED);
        }
        let cursor = entries.len();
        Self { entries, cursor }
    }

    /// Append, dropping the oldest entry once `MAX_PERSISTED` is reached
    pub fn push(&mut self, line: &str) {
        if self.entries.len() >= MAX_PERSISTED {
            self.entries.remove(0);
        }
        self.entries.push(line.to_string());
        self.cursor = self.entries.len();
    }

    /// Step back; `None` when there is nothing to recall
    pub fn up(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Step forward; past the last entry yields an empty edit line
    pub fn down(&mut self) -> &str {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(String::as_str).unwrap_or("")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryEntry {
    command: String,
    timestamp: DateTime<Utc>,
}

/// Append-only history file
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the state directory
    pub fn default_location() -> Result<Self> {
        let dir = config::state_dir()?;
        fs::create_dir_all(&dir)?;
        Ok(Self::new(dir.join("history.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the most recent entries, skipping lines that fail to parse
    pub fn load(&self) -> Result<Vec<String>> {
        Ok(self.recent_entries()?.into_iter().map(|e| e.command).collect())
    }

    /// Append one entry, compacting once the file holds more than `MAX_PERSISTED` lines
    pub fn append(&self, command: &str) -> Result<()> {
        let entry = HistoryEntry { command: command.to_string(), timestamp: Utc::now() };
        {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        }
        if self.line_count()? > MAX_PERSISTED {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrite the file keeping only the newest entries (temp file + rename)
    pub fn compact(&self) -> Result<usize> {
        let entries = self.recent_entries()?;
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            for entry in &entries {
                writeln!(tmp, "{}", serde_json::to_string(entry)?)?;
            }
        }
        fs::rename(&tmp_path, &self.path)?;
        tracing::debug!(kept = entries.len(), path = %self.path.display(), "history compacted");
        Ok(entries.len())
    }

    /// Compact only when the file has grown past the cap
    pub fn compact_if_needed(&self) -> Result<bool> {
        if self.line_count()? <= MAX_PERSISTED {
            return Ok(false);
        }
        self.compact()?;
        Ok(true)
    }

    fn line_count(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        Ok(BufReader::new(file).lines().map_while(|line| line.ok()).count())
    }

    fn recent_entries(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut entries: Vec<HistoryEntry> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str::<HistoryEntry>(&line).ok())
            .collect();
        if entries.len() > MAX_PERSISTED {
            entries.drain(..entries.len() - MAX_PERSISTED);
        }
        Ok(entries)
    }
}
