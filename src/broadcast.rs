//! Broadcaster: fan-out policy
//!
//! Delivers a rendered line to every session in a registry snapshot.
//! Each recipient is independent: `Session::send` only enqueues, and a
//! failed enqueue closes that recipient without affecting the others.

use std::sync::Arc;

use tracing::debug;

use crate::events::EventBus;
use crate::message::Message;
use crate::registry::Registry;
use crate::session::Session;
use crate::types::SessionId;

#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    events: EventBus,
    /// Skip the author when fanning out user messages
    exclude_sender_from_echo: bool,
    /// Skip the session a join/leave notice is about
    exclude_subject_from_notices: bool,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<Registry>,
        events: EventBus,
        exclude_sender_from_echo: bool,
        exclude_subject_from_notices: bool,
    ) -> Self {
        Self {
            registry,
            events,
            exclude_sender_from_echo,
            exclude_subject_from_notices,
        }
    }

    /// Deliver a server notice
    ///
    /// `subject` is the session the notice is about (the joiner for a join
    /// notice); it only matters when `exclude_subject_from_notices` is set.
    /// Returns the number of sessions the line was queued for.
    pub fn broadcast_system(&self, message: &Message, subject: Option<SessionId>) -> usize {
        let skip = subject.filter(|_| self.exclude_subject_from_notices);
        self.fan_out(message, skip)
    }

    /// Announce that `departed` has left under `name`
    ///
    /// The session is already out of the registry, so it would not be in
    /// the snapshot; it still gets its own notice unless
    /// `exclude_subject_from_notices` is set.
    pub fn broadcast_departure(&self, departed: &Session, name: &str) -> usize {
        let message = Message::leave(name);
        let mut delivered = self.fan_out(&message, None);
        if !self.exclude_subject_from_notices && departed.send(message.to_line()) {
            delivered += 1;
        }
        delivered
    }

    /// Deliver a user line from `sender`, stamped with the current time
    pub fn broadcast_user(&self, sender: &Session, text: impl Into<String>) -> usize {
        let message = Message::user(sender.display_name(), text);
        let skip = Some(sender.id).filter(|_| self.exclude_sender_from_echo);
        self.fan_out(&message, skip)
    }

    fn fan_out(&self, message: &Message, skip: Option<SessionId>) -> usize {
        let line = message.to_line();
        self.events.log(line.clone());

        let mut delivered = 0;
        for session in self.registry.snapshot() {
            if Some(session.id) == skip {
                continue;
            }
            if session.send(line.clone()) {
                delivered += 1;
            }
        }

        debug!(kind = ?message.kind, delivered, "broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::ServerEvent;

    struct Peer {
        session: Arc<Session>,
        rx: mpsc::Receiver<String>,
    }

    fn join(registry: &Registry, name: &str, capacity: usize) -> Peer {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(Session::new(SessionId::new(), None, tx, CancellationToken::new()));
        registry.try_register(&session, name);
        Peer { session, rx }
    }

    fn setup(echo_excluded: bool, subject_excluded: bool) -> (Arc<Registry>, Broadcaster, EventBus) {
        let events = EventBus::new(64);
        let registry = Arc::new(Registry::new(events.clone(), 100));
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            events.clone(),
            echo_excluded,
            subject_excluded,
        );
        (registry, broadcaster, events)
    }

    #[tokio::test]
    async fn test_user_message_echoes_to_sender_by_default() {
        let (registry, broadcaster, _) = setup(false, false);
        let mut alice = join(&registry, "alice", 8);
        let mut bob = join(&registry, "bob", 8);

        assert_eq!(broadcaster.broadcast_user(&alice.session, "alice: hi"), 2);

        assert!(alice.rx.recv().await.unwrap().ends_with(" - alice: hi"));
        assert!(bob.rx.recv().await.unwrap().ends_with(" - alice: hi"));
    }

    #[tokio::test]
    async fn test_sender_excluded_when_configured() {
        let (registry, broadcaster, _) = setup(true, false);
        let mut alice = join(&registry, "alice", 8);
        let mut bob = join(&registry, "bob", 8);

        assert_eq!(broadcaster.broadcast_user(&alice.session, "alice: hi"), 1);

        assert!(alice.rx.try_recv().is_err());
        assert!(bob.rx.recv().await.unwrap().ends_with(" - alice: hi"));
    }

    #[tokio::test]
    async fn test_system_notice_reaches_subject_by_default() {
        let (registry, broadcaster, _) = setup(true, false);
        let mut alice = join(&registry, "alice", 8);

        let sent = broadcaster.broadcast_system(&Message::join("alice"), Some(alice.session.id));
        assert_eq!(sent, 1);
        assert_eq!(alice.rx.recv().await.unwrap(), "alice has joined the chat.");
    }

    #[tokio::test]
    async fn test_subject_excluded_when_configured() {
        let (registry, broadcaster, _) = setup(false, true);
        let mut alice = join(&registry, "alice", 8);
        let mut bob = join(&registry, "bob", 8);

        broadcaster.broadcast_system(&Message::join("bob"), Some(bob.session.id));

        assert_eq!(alice.rx.recv().await.unwrap(), "bob has joined the chat.");
        assert!(bob.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_departure_reaches_leaver_and_remaining() {
        let (registry, broadcaster, _) = setup(false, false);
        let mut alice = join(&registry, "alice", 8);
        let mut bob = join(&registry, "bob", 8);

        let name = registry.unregister(&bob.session).unwrap();
        assert_eq!(broadcaster.broadcast_departure(&bob.session, &name), 2);

        assert_eq!(alice.rx.recv().await.unwrap(), "bob has left the chat.");
        assert_eq!(bob.rx.recv().await.unwrap(), "bob has left the chat.");
    }

    #[tokio::test]
    async fn test_departure_skips_leaver_when_excluded() {
        let (registry, broadcaster, _) = setup(false, true);
        let mut alice = join(&registry, "alice", 8);
        let mut bob = join(&registry, "bob", 8);

        let name = registry.unregister(&bob.session).unwrap();
        assert_eq!(broadcaster.broadcast_departure(&bob.session, &name), 1);

        assert_eq!(alice.rx.recv().await.unwrap(), "bob has left the chat.");
        assert!(bob.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        let (registry, broadcaster, _) = setup(false, false);
        let mut alice = join(&registry, "alice", 8);
        let slow = join(&registry, "slow", 1);
        let mut bob = join(&registry, "bob", 8);

        // Fill the slow peer's queue, then overflow it.
        broadcaster.broadcast_user(&alice.session, "first");
        let delivered = broadcaster.broadcast_user(&alice.session, "second");

        assert_eq!(delivered, 2);
        assert!(slow.session.is_closed());
        assert!(!alice.session.is_closed());
        assert!(!bob.session.is_closed());

        for rx in [&mut alice.rx, &mut bob.rx] {
            assert!(rx.recv().await.unwrap().ends_with(" - first"));
            assert!(rx.recv().await.unwrap().ends_with(" - second"));
        }
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let (registry, broadcaster, _) = setup(false, false);
        let alice = join(&registry, "alice", 64);
        let mut bob = join(&registry, "bob", 64);

        for i in 0..20 {
            broadcaster.broadcast_user(&alice.session, format!("msg {i}"));
        }
        for i in 0..20 {
            let line = bob.rx.recv().await.unwrap();
            assert!(line.ends_with(&format!(" - msg {i}")), "out of order: {line}");
        }
    }

    #[tokio::test]
    async fn test_every_broadcast_is_logged() {
        let (registry, broadcaster, events) = setup(false, false);
        let mut log = events.subscribe();
        let _alice = join(&registry, "alice", 8);
        let _ = log.recv().await; // membership

        broadcaster.broadcast_system(&Message::leave("carol"), None);

        assert_eq!(
            log.recv().await.unwrap(),
            ServerEvent::Log {
                line: "carol has left the chat.".into()
            }
        );
    }
}
