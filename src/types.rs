//! Basic type definitions for the chat server
//!
//! Provides:
//! - `SessionId`: UUID-based unique connection identifier
//! - `ServerState`: lifecycle state of a `Server`

use serde::Serialize;
use uuid::Uuid;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4 so that every accepted connection gets an opaque id,
/// independent of the display name it later negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server lifecycle state
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`.
/// Only `Running` accepts new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_server_state_display() {
        assert_eq!(ServerState::Running.to_string(), "running");
        assert_eq!(ServerState::Stopping.to_string(), "stopping");
    }
}
