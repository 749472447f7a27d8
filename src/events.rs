//! Application state container with typed change events
//!
//! Core components publish `UiEvent`s on the bus; view layers subscribe and
//! fold them into an `AppState` snapshot. The bus is created at startup and
//! dropped with the terminal.

use tokio::sync::broadcast;

use crate::connection::ConnectionState;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient notification for the status area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ConnectionChanged(ConnectionState),
    Notice(Notice),
    /// HTML content for an external preview surface
    Preview { html: String },
    /// Preview pane should load the dev server on this port
    PreviewPort { port: u16 },
}

/// Publish side of the state container. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: UiEvent) {
        tracing::debug!(?event, "ui event");
        // No subscribers is fine: nothing is watching yet.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot a subscriber maintains from the event stream
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub connection: ConnectionState,
    pub notice: Option<Notice>,
    pub preview_port: Option<u16>,
    pub last_preview: Option<String>,
}

impl AppState {
    pub fn apply(&mut self, event: &UiEvent) {
        match event {
            UiEvent::ConnectionChanged(state) => self.connection = *state,
            UiEvent::Notice(notice) => self.notice = Some(notice.clone()),
            UiEvent::Preview { html } => self.last_preview = Some(html.clone()),
            UiEvent::PreviewPort { port } => self.preview_port = Some(*port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_sees_published_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(UiEvent::PreviewPort { port: 8080 });
        bus.publish(UiEvent::Notice(Notice::info("hello")));

        assert_eq!(rx.try_recv().unwrap(), UiEvent::PreviewPort { port: 8080 });
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Notice(Notice::info("hello")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(UiEvent::Preview { html: "<h1>hi</h1>".into() });
    }

    #[test]
    fn test_app_state_folds_events() {
        let mut state = AppState::default();
        state.apply(&UiEvent::ConnectionChanged(ConnectionState::Open));
        state.apply(&UiEvent::PreviewPort { port: 5173 });
        state.apply(&UiEvent::Preview { html: "<p>x</p>".into() });

        assert_eq!(state.connection, ConnectionState::Open);
        assert_eq!(state.preview_port, Some(5173));
        assert_eq!(state.last_preview.as_deref(), Some("<p>x</p>"));
        assert!(state.notice.is_none());
    }
}
