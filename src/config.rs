//! Server configuration
//!
//! Defaults match the classic deployment (port 5001, "Anonymous"
//! placeholder, sender sees its own messages). A JSON file can override any
//! subset of fields, and a few `CHAT_*` environment variables override the
//! file.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:5001";

/// Placeholder used when a client submits an empty name
pub const DEFAULT_NAME: &str = "Anonymous";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Name substituted for an empty request
    pub default_name: String,
    /// Do not echo a user's message back to its sender
    pub exclude_sender_from_echo: bool,
    /// Do not deliver join/leave notices to the session they are about
    pub exclude_subject_from_notices: bool,
    /// Per-session outbound queue size; overflow tears the session down
    pub outbound_queue_capacity: usize,
    /// Longest accepted inbound line in bytes
    pub max_line_length: usize,
    /// Highest numeric suffix tried before falling back to a UUID suffix
    pub max_name_suffix: u32,
    /// How long a closing session may spend flushing queued lines
    pub close_grace_ms: u64,
    /// Event bus buffer; slow subscribers lag beyond this
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            default_name: DEFAULT_NAME.to_string(),
            exclude_sender_from_echo: false,
            exclude_subject_from_notices: false,
            outbound_queue_capacity: 256,
            max_line_length: 8192,
            max_name_suffix: 10_000,
            close_grace_ms: 1000,
            event_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CHAT_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(addr) = env::var("CHAT_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(name) = env::var("CHAT_DEFAULT_NAME") {
            if !name.trim().is_empty() {
                self.default_name = name.trim().to_string();
            }
        }
        if let Some(flag) = env_flag("CHAT_EXCLUDE_SENDER_ECHO") {
            self.exclude_sender_from_echo = flag;
        }
        if let Some(flag) = env_flag("CHAT_EXCLUDE_SUBJECT_NOTICES") {
            self.exclude_subject_from_notices = flag;
        }
        self
    }

    /// Builder-style bind address override
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
