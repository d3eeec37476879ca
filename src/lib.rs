//! Line Chat Server Library
//!
//! A multi-client chat server over plain TCP, one text line per message.
//! Every client negotiates a unique display name and every message is
//! broadcast to everyone connected.
//!
//! # Features
//! - `SUBMIT_NAME` handshake with collision-free name suffixing
//! - Timestamped user broadcasts, join/leave notices
//! - Configurable echo of a sender's own messages
//! - Graceful `EXIT`, abrupt disconnects, `SERVER_STOPPED` on shutdown
//! - Restartable server instances
//! - Event subscription for membership and log lines
//!
//! # Architecture
//! - `Server` owns the listener and the accept loop, one task per connection
//! - `Session` is the shared handle for one client; it writes through a
//!   bounded outbound queue drained by its own writer task
//! - `Registry` is the only shared mutable state, behind a single lock
//! - `Broadcaster` fans a message out over a registry snapshot
//! - `EventBus` lets a presentation layer follow along without blocking the core
//!
//! # Example
//! ```ignore
//! use line_chat_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new(ServerConfig::default());
//!     let addr = server.start("127.0.0.1:5001").await.unwrap();
//!     println!("listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await;
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use broadcast::Broadcaster;
pub use client::ChatClient;
pub use config::ServerConfig;
pub use error::{ConfigError, SendError, ServerError, SessionError};
pub use events::{EventBus, ServerEvent};
pub use message::{ClientLine, Message, MessageKind};
pub use registry::Registry;
pub use server::Server;
pub use session::{LoopEnd, Session};
pub use types::{ServerState, SessionId};
