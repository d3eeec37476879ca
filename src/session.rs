//! Session: one connected client
//!
//! A `Session` is shared (`Arc`) between its connection task, the
//! `Registry`, and any broadcast that is currently fanning out. It never
//! touches the socket directly: outbound lines go through a bounded queue
//! drained by the connection's writer task, so a slow peer can only hurt
//! itself.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::error::{SendError, SessionError};
use crate::message::{self, ClientLine};
use crate::registry::Registry;
use crate::types::SessionId;

/// How a receive loop ended
#[derive(Debug)]
pub enum LoopEnd {
    /// Client sent `EXIT`
    Exit,
    /// Transport reached end of stream
    Disconnected,
    /// Session was closed locally (shutdown, write failure, slow consumer)
    Closed,
    /// Read failed
    Failed(SessionError),
}

/// Connected client state
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this connection
    pub id: SessionId,
    /// Remote address, if the transport exposed one
    pub peer: Option<SocketAddr>,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Display name, set exactly once by the registry
    name: OnceLock<String>,
    /// Server → client line queue
    outbound: mpsc::Sender<String>,
    /// Cancelled on close; observed by the reader and writer
    closed: CancellationToken,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<String>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            name: OnceLock::new(),
            outbound,
            closed,
        }
    }

    /// Final display name, once negotiated
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Name for logging; "(unnamed)" before negotiation
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("(unnamed)")
    }

    /// Finalize the display name. Returns false if it was already set.
    pub(crate) fn finalize_name(&self, name: String) -> bool {
        self.name.set(name).is_ok()
    }

    /// Queue one outbound line
    ///
    /// Never fails towards the caller. A closed or full queue closes this
    /// session instead, which the connection task turns into teardown.
    pub fn send(&self, line: impl Into<String>) -> bool {
        match self.try_enqueue(line.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = %self.id, name = self.display_name(), error = %e, "send failed, closing session");
                self.close();
                false
            }
        }
    }

    fn try_enqueue(&self, line: String) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::ChannelClosed);
        }
        self.outbound.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Mark the session closed. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Negotiate a unique display name and register under it
    ///
    /// An empty (or whitespace) request becomes `default_name`. The
    /// registry picks the collision suffix atomically. If the result
    /// differs from what the client asked for, the client is told with a
    /// `NAME_CHANGED:` line, queued before the session becomes visible to
    /// broadcasts. Returns `None` when the session was closed
    /// before it could be registered.
    pub fn negotiate_name(
        self: &Arc<Self>,
        requested: &str,
        registry: &Registry,
        default_name: &str,
    ) -> Option<String> {
        let requested = requested.trim();
        let base = if requested.is_empty() {
            default_name
        } else {
            requested
        };

        registry.register_with(self, base, |final_name| {
            if final_name != requested {
                self.send(message::name_changed(final_name));
            }
        })
    }

    /// Read lines until `EXIT`, end of stream, a read error, or close
    ///
    /// Every other line is handed to the broadcaster in arrival order.
    pub async fn receive_loop<S>(&self, lines: &mut S, broadcaster: &Broadcaster) -> LoopEnd
    where
        S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => return LoopEnd::Closed,
                next = lines.next() => match next {
                    None => return LoopEnd::Disconnected,
                    Some(Err(e)) => return LoopEnd::Failed(e.into()),
                    Some(Ok(line)) => match ClientLine::parse(line) {
                        ClientLine::Exit => return LoopEnd::Exit,
                        ClientLine::Text(text) => {
                            debug!(session = %self.id, "received line");
                            broadcaster.broadcast_user(self, text);
                        }
                    },
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::events::EventBus;

    fn session(capacity: usize) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Session::new(SessionId::new(), None, tx, CancellationToken::new());
        (Arc::new(session), rx)
    }

    #[tokio::test]
    async fn test_session_creation() {
        let (session, _rx) = session(4);
        assert!(session.name().is_none());
        assert_eq!(session.display_name(), "(unnamed)");
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_name_is_final() {
        let (session, _rx) = session(4);
        assert!(session.finalize_name("alice".into()));
        assert!(!session.finalize_name("bob".into()));
        assert_eq!(session.name(), Some("alice"));
    }

    #[tokio::test]
    async fn test_send_queues_line() {
        let (session, mut rx) = session(4);
        assert!(session.send("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_full_queue_closes_session() {
        let (session, _rx) = session(1);
        assert!(session.send("one"));
        assert!(!session.send("two"));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_closes_session() {
        let (session, rx) = session(4);
        drop(rx);
        assert!(!session.send("lost"));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _rx) = session(4);
        session.close();
        session.close();
        assert!(session.is_closed());
        session.closed().await;
    }

    #[tokio::test]
    async fn test_negotiate_name_collision_notifies() {
        let registry = Registry::new(EventBus::new(16), 100);
        let (first, mut first_rx) = session(4);
        let (second, mut second_rx) = session(4);

        assert_eq!(
            first.negotiate_name("alice", &registry, "Anonymous").as_deref(),
            Some("alice")
        );
        assert_eq!(
            second.negotiate_name("alice", &registry, "Anonymous").as_deref(),
            Some("alice1")
        );

        assert!(first_rx.try_recv().is_err());
        assert_eq!(second_rx.recv().await.as_deref(), Some("NAME_CHANGED:alice1"));
    }

    #[tokio::test]
    async fn test_negotiate_empty_name_uses_default() {
        let registry = Registry::new(EventBus::new(16), 100);
        let (session, mut rx) = session(4);

        assert_eq!(
            session.negotiate_name("   ", &registry, "Anonymous").as_deref(),
            Some("Anonymous")
        );
        assert_eq!(rx.recv().await.as_deref(), Some("NAME_CHANGED:Anonymous"));
    }

    #[tokio::test]
    async fn test_negotiate_trims_without_notice_when_unchanged() {
        let registry = Registry::new(EventBus::new(16), 100);
        let (session, mut rx) = session(4);

        assert_eq!(
            session.negotiate_name("bob", &registry, "Anonymous").as_deref(),
            Some("bob")
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receive_loop_forwards_until_exit() {
        let events = EventBus::new(16);
        let registry = Arc::new(Registry::new(events.clone(), 100));
        let broadcaster = Broadcaster::new(registry.clone(), events, false, false);
        let (session, mut rx) = session(8);
        session.negotiate_name("alice", &registry, "Anonymous");

        let mut lines = stream::iter(vec![
            Ok("alice: one".to_string()),
            Ok("alice: two".to_string()),
            Ok("EXIT".to_string()),
            Ok("alice: never".to_string()),
        ]);

        let end = session.receive_loop(&mut lines, &broadcaster).await;
        assert!(matches!(end, LoopEnd::Exit));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.ends_with(" - alice: one"));
        assert!(second.ends_with(" - alice: two"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receive_loop_reports_disconnect_and_errors() {
        let events = EventBus::new(16);
        let registry = Arc::new(Registry::new(events.clone(), 100));
        let broadcaster = Broadcaster::new(registry, events, false, false);
        let (session, _rx) = session(8);

        let mut empty = stream::iter(Vec::<Result<String, LinesCodecError>>::new());
        assert!(matches!(
            session.receive_loop(&mut empty, &broadcaster).await,
            LoopEnd::Disconnected
        ));

        let mut too_long = stream::iter(vec![Err(LinesCodecError::MaxLineLengthExceeded)]);
        assert!(matches!(
            session.receive_loop(&mut too_long, &broadcaster).await,
            LoopEnd::Failed(SessionError::LineTooLong)
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_observes_close() {
        let events = EventBus::new(16);
        let registry = Arc::new(Registry::new(events.clone(), 100));
        let broadcaster = Broadcaster::new(registry, events, false, false);
        let (session, _rx) = session(8);
        session.close();

        let mut pending = stream::pending::<Result<String, LinesCodecError>>();
        assert!(matches!(
            session.receive_loop(&mut pending, &broadcaster).await,
            LoopEnd::Closed
        ));
    }
}
