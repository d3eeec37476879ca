//! Line protocol definitions
//!
//! Newline-delimited text in both directions. A handful of lines are
//! reserved control words; everything else is chat content.

use chrono::{DateTime, Local};

/// Server → client: prompt for a display name, first line on every connection
pub const SUBMIT_NAME: &str = "SUBMIT_NAME";

/// Server → client: prefix of the line announcing a substituted name
pub const NAME_CHANGED_PREFIX: &str = "NAME_CHANGED:";

/// Server → client: the server is shutting down
pub const SERVER_STOPPED: &str = "SERVER_STOPPED";

/// Client → server: graceful departure
pub const EXIT: &str = "EXIT";

/// Format used for the timestamp on user messages
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

/// Build the `NAME_CHANGED:<name>` control line
pub fn name_changed(name: &str) -> String {
    format!("{NAME_CHANGED_PREFIX}{name}")
}

/// Kind of a broadcast message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// User-authored chat line
    User,
    /// Someone joined
    Join,
    /// Someone left
    Leave,
    /// Server is stopping
    Shutdown,
}

impl MessageKind {
    /// Join, leave and shutdown notices are server-generated
    pub fn is_system(self) -> bool {
        !matches!(self, MessageKind::User)
    }
}

/// A message in flight
///
/// Exists only for the duration of one broadcast; never stored.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    /// Display name of the author or of the session a notice is about
    pub sender: Option<String>,
    pub body: String,
    pub timestamp: DateTime<Local>,
}

impl Message {
    /// A user line, stamped with the current local time
    pub fn user(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            sender: Some(sender.into()),
            body: body.into(),
            timestamp: Local::now(),
        }
    }

    pub fn join(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: MessageKind::Join,
            body: format!("{name} has joined the chat."),
            sender: Some(name),
            timestamp: Local::now(),
        }
    }

    pub fn leave(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: MessageKind::Leave,
            body: format!("{name} has left the chat."),
            sender: Some(name),
            timestamp: Local::now(),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: MessageKind::Shutdown,
            sender: None,
            body: SERVER_STOPPED.to_string(),
            timestamp: Local::now(),
        }
    }

    /// Render the outbound wire line (without the trailing newline)
    ///
    /// User lines become `"<timestamp> - <body>"`; notices are sent as is.
    pub fn to_line(&self) -> String {
        match self.kind {
            MessageKind::User => format!(
                "{} - {}",
                self.timestamp.format(TIMESTAMP_FORMAT),
                self.body
            ),
            _ => self.body.clone(),
        }
    }
}

/// Client → server line, after framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// The `EXIT` control word
    Exit,
    /// Anything else is chat content, forwarded untouched
    Text(String),
}

impl ClientLine {
    pub fn parse(line: String) -> Self {
        if line.trim() == EXIT {
            ClientLine::Exit
        } else {
            ClientLine::Text(line)
        }
    }
}
