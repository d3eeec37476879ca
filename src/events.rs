//! Collaborator-facing notifications
//!
//! A presentation layer (user list, log view, log sink) subscribes here
//! instead of handing callbacks to the core. Emission goes through a
//! `tokio::sync::broadcast` channel, so it never blocks: a subscriber that
//! falls behind loses the oldest events and the server carries on.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::ServerState;

/// Event emitted by the server core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Registry changed; carries the full sorted name list
    MembershipChanged { names: Vec<String> },
    /// A human-readable log line (every broadcast, lifecycle and errors)
    Log { line: String },
    /// Server lifecycle transition
    StateChanged { state: ServerState },
}

/// Fan-out point for `ServerEvent`s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        // No subscribers is not an error.
        if self.sender.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    pub fn log(&self, line: impl Into<String>) {
        self.emit(ServerEvent::Log { line: line.into() });
    }

    pub fn membership(&self, names: Vec<String>) {
        self.emit(ServerEvent::MembershipChanged { names });
    }

    pub fn state(&self, state: ServerState) {
        self.emit(ServerEvent::StateChanged { state });
    }
}
