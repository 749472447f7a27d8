//! Output surface and remote message rendering
//!
//! `Surface` is the write side of the visible terminal. `Scrollback` is the
//! in-memory surface the view layer draws from. `render_remote` unpacks a
//! transport payload onto a surface.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::events::{EventBus, UiEvent};

pub const PROMPT: &str = "$ ";
pub const LINE_END: &str = "\r\n";
/// Erase display + cursor home, as the remote `clear` emits it
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const ERROR_STYLE: &str = "\x1b[31m";
const RESET_STYLE: &str = "\x1b[0m";

/// Anything the terminal can write to
pub trait Surface {
    /// Append raw text, control sequences included
    fn write(&mut self, text: &str);

    fn write_line(&mut self, text: &str) {
        self.write(text);
        self.write(LINE_END);
    }

    /// Wipe everything visible
    fn clear(&mut self);

    fn prompt(&mut self) {
        self.write(PROMPT);
    }
}

/// Write an error line with the visible marker
pub fn write_error(surface: &mut dyn Surface, message: &str) {
    surface.write_line(&format!("{}Error: {}{}", ERROR_STYLE, message, RESET_STYLE));
}

// ═══════════════════════════════════════════════════════════════
// SCROLLBACK
// ═══════════════════════════════════════════════════════════════

/// In-memory terminal surface
#[derive(Debug, Default, Clone)]
pub struct Scrollback {
    buffer: String,
    max_bytes: usize,
}

impl Scrollback {
    pub fn new() -> Self {
        Self::with_limit(256 * 1024)
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self { buffer: String::new(), max_bytes }
    }

    /// Everything written since the last clear, verbatim
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    /// Display lines: text after the last clear-screen sequence, ANSI removed
    pub fn lines(&self) -> Vec<String> {
        let visible = match self.buffer.rfind(CLEAR_SCREEN) {
            Some(pos) => &self.buffer[pos + CLEAR_SCREEN.len()..],
            None => &self.buffer,
        };
        strip_ansi(visible)
            .split('\n')
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect()
    }

    fn trim_to_limit(&mut self) {
        if self.max_bytes == 0 || self.buffer.len() <= self.max_bytes {
            return;
        }
        let mut cut = self.buffer.len() - self.max_bytes;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        // Prefer dropping whole lines so an escape sequence is never split
        if let Some(nl) = self.buffer[cut..].find('\n') {
            cut += nl + 1;
        }
        self.buffer.drain(..cut);
    }
}

impl Surface for Scrollback {
    fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.trim_to_limit();
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07").expect("static ANSI pattern")
    })
}

pub fn strip_ansi(text: &str) -> String {
    ansi_regex().replace_all(text, "").into_owned()
}

// ═══════════════════════════════════════════════════════════════
// REMOTE MESSAGES
// ═══════════════════════════════════════════════════════════════

/// Decoded transport payload; fields may co-occur
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
}

impl RemoteMessage {
    /// `None` when the payload is not JSON or carries no recognized field
    pub fn parse(raw: &str) -> Option<Self> {
        let msg: RemoteMessage = serde_json::from_str(raw).ok()?;
        if msg.output.is_none() && msg.error.is_none() && msg.preview.is_none() {
            return None;
        }
        Some(msg)
    }
}

/// Render one transport payload in arrival order
pub fn render_remote(raw: &str, surface: &mut dyn Surface, bus: &EventBus) {
    let Some(msg) = RemoteMessage::parse(raw) else {
        surface.write(raw);
        return;
    };

    if let Some(output) = &msg.output {
        surface.write(output);
    }
    if let Some(error) = &msg.error {
        write_error(surface, error);
        surface.prompt();
    }
    if let Some(html) = msg.preview {
        bus.publish(UiEvent::Preview { html });
    }
}
