//! podterm - Podplay Build terminal
//!
//! A command terminal for the Podplay Build backend: one WebSocket to the
//! remote command service with bounded exponential-backoff reconnects,
//! local built-ins, registered commands, and build-mode `!` commands.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod output;
pub mod scaffold;
pub mod special;
pub mod terminal;
pub mod tools;
pub mod ui;

pub use connection::{ConnectionState, RetryPolicy};
pub use error::{Result, TerminalError};
pub use events::{EventBus, Notice, UiEvent};
pub use output::{Scrollback, Surface};
pub use terminal::{Terminal, TerminalMode};
