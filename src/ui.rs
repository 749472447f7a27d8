//! Full-screen view over a `Terminal`
//!
//! Features:
//! - Scrollback rendering with the edit line on the prompt row
//! - Up/Down history recall
//! - Connection status bar and auto-dismissing notices
//! - Preview HTML written to the state dir for an external viewer

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use unicode_width::UnicodeWidthStr;

use crate::config;
use crate::connection::ConnectionState;
use crate::events::{AppState, NoticeLevel, Notice, UiEvent};
use crate::terminal::{Terminal as PodTerminal, TerminalMode};

const NOTICE_TTL: Duration = Duration::from_secs(4);

/// View-side state folded from the event bus
struct ViewState {
    input: String,
    app: AppState,
    notice_until: Option<Instant>,
    tick: usize,
    /// Line currently being submitted, shown while the loop waits on it
    busy: Option<String>,
    preview_path: Option<PathBuf>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            input: String::new(),
            app: AppState::default(),
            notice_until: None,
            tick: 0,
            busy: None,
            preview_path: config::state_dir().ok().map(|d| d.join("preview.html")),
        }
    }

    fn fold(&mut self, rx: &mut broadcast::Receiver<UiEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "view fell behind the event bus");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if self.notice_until.map_or(false, |t| Instant::now() >= t) {
            self.app.notice = None;
            self.notice_until = None;
        }
    }

    fn apply(&mut self, event: UiEvent) {
        self.app.apply(&event);
        match &event {
            UiEvent::Notice(_) => self.notice_until = Some(Instant::now() + NOTICE_TTL),
            UiEvent::Preview { html } => self.publish_preview(html),
            UiEvent::PreviewPort { port } => {
                self.show(Notice::info(format!("Preview: http://localhost:{}/", port)));
            }
            UiEvent::ConnectionChanged(_) => {}
        }
    }

    fn publish_preview(&mut self, html: &str) {
        let Some(path) = self.preview_path.clone() else {
            return;
        };
        match std::fs::write(&path, html) {
            Ok(()) => self.show(Notice::info(format!("Preview updated: {}", path.display()))),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "could not write preview");
                self.show(Notice::warning(format!("Preview not written: {}", e)));
            }
        }
    }

    fn show(&mut self, notice: Notice) {
        self.app.notice = Some(notice);
        self.notice_until = Some(Instant::now() + NOTICE_TTL);
    }
}

// ═══════════════════════════════════════════════════════════════
// MAIN LOOP
// ═══════════════════════════════════════════════════════════════

pub async fn run_tui(mut terminal: PodTerminal, connect_url: Option<String>) -> Result<()> {
    let mut tui = setup_terminal()?;
    let result = run_tui_loop(&mut tui, &mut terminal, connect_url).await;
    terminal.close();
    restore_terminal(tui)?;
    result
}

async fn run_tui_loop(
    tui: &mut Terminal<CrosstermBackend<io::Stdout>>,
    terminal: &mut PodTerminal,
    connect_url: Option<String>,
) -> Result<()> {
    let mut state = ViewState::new();
    let mut rx = terminal.subscribe();

    terminal.write_line("podterm - Podplay Build terminal. Type 'help' for commands.");
    if terminal.mode() == TerminalMode::Build {
        terminal.write_line("Build mode: '!help' lists special commands.");
    }
    terminal.connect(connect_url.as_deref());
    terminal.prompt();

    loop {
        state.tick += 1;

        terminal.pump_events();
        state.fold(&mut rx);

        tui.draw(|f| render(f, &state, terminal))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => break,
            KeyCode::Char('c') if ctrl => break,
            KeyCode::Char('r') if ctrl => terminal.reconnect(),
            KeyCode::Enter => {
                let line = std::mem::take(&mut state.input);
                if !line.trim().is_empty() {
                    // Local tool calls can take a while; draw the busy line first
                    state.busy = Some(line.trim().to_string());
                    tui.draw(|f| render(f, &state, terminal))?;
                }
                terminal.submit(&line).await;
                state.busy = None;
            }
            KeyCode::Up => {
                if let Some(entry) = terminal.history_up() {
                    state.input = entry;
                }
            }
            KeyCode::Down => state.input = terminal.history_down(),
            KeyCode::Backspace => {
                state.input.pop();
            }
            KeyCode::Char(c) if !ctrl => state.input.push(c),
            _ => {}
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════

fn render(f: &mut Frame, state: &ViewState, terminal: &PodTerminal) {
    let area = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Scrollback
            Constraint::Length(1), // Status
        ])
        .split(area);

    render_header(f, state, terminal, chunks[0]);
    render_scrollback(f, state, terminal, chunks[1]);
    render_status(f, state, chunks[2]);
}

fn render_header(f: &mut Frame, state: &ViewState, terminal: &PodTerminal, area: Rect) {
    let conn = state.app.connection;
    let indicator = match conn {
        ConnectionState::Connecting | ConnectionState::Retrying => spinner_char(state.tick),
        ConnectionState::Open => '●',
        ConnectionState::Idle | ConnectionState::Failed => '○',
    };
    let target = terminal
        .connection()
        .target()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "-".into());
    let mode = match terminal.mode() {
        TerminalMode::Build => " | build",
        TerminalMode::Standard => "",
    };
    let preview = state
        .app
        .preview_port
        .map(|p| format!(" | preview :{}", p))
        .unwrap_or_default();

    let text = format!(" podterm {} {} | {}{}{}", indicator, conn.label(), target, mode, preview);
    let style = match conn {
        ConnectionState::Open => Style::default().fg(Color::Green),
        ConnectionState::Failed => Style::default().fg(Color::Red),
        ConnectionState::Connecting | ConnectionState::Retrying => Style::default().fg(Color::Yellow),
        ConnectionState::Idle => Style::default().fg(Color::DarkGray),
    };
    f.render_widget(Paragraph::new(text).style(style), area);
}

fn render_scrollback(f: &mut Frame, state: &ViewState, terminal: &PodTerminal, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Terminal");
    let inner = block.inner(area);
    let width = inner.width.max(1) as usize;

    let mut lines = terminal.surface().lines();
    match lines.last_mut() {
        Some(last) => last.push_str(&state.input),
        None => lines.push(state.input.clone()),
    }

    // Rows each line occupies once wrapped
    let rows: Vec<usize> = lines
        .iter()
        .map(|l| UnicodeWidthStr::width(l.as_str()).max(1).div_ceil(width))
        .collect();
    let total: usize = rows.iter().sum();
    let height = inner.height as usize;
    let scroll = total.saturating_sub(height);

    let para = Paragraph::new(lines.join("\n"))
        .wrap(Wrap { trim: false })
        .scroll((scroll.min(u16::MAX as usize) as u16, 0))
        .block(block);
    f.render_widget(para, area);

    // Cursor sits after the edit text on the last row
    let last_width = lines.last().map(|l| UnicodeWidthStr::width(l.as_str())).unwrap_or(0);
    let cursor_row = total.saturating_sub(1).saturating_sub(scroll);
    let cursor_col = last_width % width;
    if cursor_row < height {
        f.set_cursor(inner.x + cursor_col as u16, inner.y + cursor_row as u16);
    }
}

fn render_status(f: &mut Frame, state: &ViewState, area: Rect) {
    if let Some(line) = &state.busy {
        let text = format!(" {} running: {}", spinner_char(state.tick), line);
        f.render_widget(Paragraph::new(text).style(Style::default().fg(Color::Yellow)), area);
        return;
    }
    let (text, style) = match &state.app.notice {
        Some(notice) => {
            let color = match notice.level {
                NoticeLevel::Info => Color::Cyan,
                NoticeLevel::Warning => Color::Yellow,
                NoticeLevel::Error => Color::Red,
            };
            (format!(" {}", notice.text), Style::default().fg(color))
        }
        None => (
            " Enter:run  ↑↓:history  Ctrl-R:reconnect  Esc:quit".to_string(),
            Style::default().fg(Color::DarkGray),
        ),
    };
    f.render_widget(Paragraph::new(text).style(style), area);
}

fn spinner_char(tick: usize) -> char {
    const SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    SPINNER[tick % SPINNER.len()]
}

// ═══════════════════════════════════════════════════════════════
// TERMINAL SETUP
// ═══════════════════════════════════════════════════════════════

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_expires() {
        let bus = crate::events::EventBus::new();
        let mut rx = bus.subscribe();
        let mut state = ViewState::new();

        bus.publish(UiEvent::Notice(Notice::error("boom")));
        state.fold(&mut rx);
        assert!(state.app.notice.is_some());

        state.notice_until = Some(Instant::now() - Duration::from_millis(1));
        state.fold(&mut rx);
        assert!(state.app.notice.is_none());
    }

    #[test]
    fn test_preview_port_shows_notice() {
        let bus = crate::events::EventBus::new();
        let mut rx = bus.subscribe();
        let mut state = ViewState::new();

        bus.publish(UiEvent::PreviewPort { port: 4173 });
        state.fold(&mut rx);
        assert_eq!(state.app.preview_port, Some(4173));
        assert!(state.app.notice.as_ref().unwrap().text.contains("4173"));
    }

    fn status_text(state: &ViewState) -> String {
        let mut tui = Terminal::new(ratatui::backend::TestBackend::new(60, 1)).unwrap();
        tui.draw(|f| {
            let area = f.size();
            render_status(f, state, area);
        })
        .unwrap();
        tui.backend().buffer().content.iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn test_status_shows_busy_line_over_notice() {
        let mut state = ViewState::new();
        state.show(Notice::info("Connected to terminal server"));
        state.busy = Some("mcp docker-brave rust".into());
        assert!(status_text(&state).contains("running: mcp docker-brave rust"));

        state.busy = None;
        assert!(status_text(&state).contains("Connected to terminal server"));
    }

    #[test]
    fn test_preview_html_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ViewState::new();
        state.preview_path = Some(dir.path().join("preview.html"));

        state.apply(UiEvent::Preview { html: "<h1>hi</h1>".into() });
        assert_eq!(std::fs::read_to_string(dir.path().join("preview.html")).unwrap(), "<h1>hi</h1>");
        assert_eq!(state.app.last_preview.as_deref(), Some("<h1>hi</h1>"));
    }
}
