//! Registry of live sessions
//!
//! Single source of truth for who is connected. One mutex guards both the
//! session list and the name set, so registration, removal and snapshots
//! are mutually exclusive: a broadcast sees a session either fully joined
//! or fully gone. Membership events are emitted while the lock is held so
//! subscribers observe them in mutation order.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::session::Session;
use crate::types::SessionId;

#[derive(Debug, Default)]
struct Inner {
    /// Live sessions in join order
    sessions: Vec<Arc<Session>>,
    /// Names in use; mirrors `sessions` exactly
    names: HashSet<String>,
}

impl Inner {
    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().cloned().collect();
        names.sort();
        names
    }

    /// Smallest free name: `base`, then `base1`, `base2`, ...
    fn pick_name(&self, base: &str, max_suffix: u32) -> String {
        if !self.names.contains(base) {
            return base.to_string();
        }
        for n in 1..=max_suffix {
            let candidate = format!("{base}{n}");
            if !self.names.contains(&candidate) {
                return candidate;
            }
        }
        warn!(base, max_suffix, "name suffixes exhausted, using synthetic name");
        format!("{base}-{}", Uuid::new_v4())
    }
}

/// Thread-safe collection of live sessions and their display names
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    events: EventBus,
    max_suffix: u32,
}

impl Registry {
    pub fn new(events: EventBus, max_suffix: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            max_suffix,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Pick a unique name derived from `proposed` and register the session
    ///
    /// The collision check, the name reservation and the insertion happen
    /// under one lock. Returns the existing name if the session is already
    /// registered, and `None` if the session has been closed (so a
    /// shutdown racing a handshake never leaves an orphan entry).
    pub fn try_register(&self, session: &Arc<Session>, proposed: &str) -> Option<String> {
        self.register_with(session, proposed, |_| {})
    }

    /// Like `try_register`, calling `on_insert` with the final name before
    /// the lock is released
    ///
    /// Anything `on_insert` queues on the session lands ahead of every
    /// broadcast that can see the new entry. It must not call back into
    /// the registry.
    pub fn register_with<F>(
        &self,
        session: &Arc<Session>,
        proposed: &str,
        on_insert: F,
    ) -> Option<String>
    where
        F: FnOnce(&str),
    {
        let mut inner = self.lock();

        if session.is_closed() {
            debug!(session = %session.id, "refusing to register closed session");
            return None;
        }
        if inner.position(session.id).is_some() {
            return session.name().map(str::to_string);
        }

        let name = inner.pick_name(proposed, self.max_suffix);
        if !session.finalize_name(name.clone()) {
            // Name was fixed by an earlier registration that has since been
            // removed; a session never changes name.
            warn!(session = %session.id, "session already named, not re-registering");
            return None;
        }

        on_insert(&name);
        inner.names.insert(name.clone());
        inner.sessions.push(Arc::clone(session));
        debug!(session = %session.id, name = %name, total = inner.sessions.len(), "registered");

        self.events.membership(inner.sorted_names());
        Some(name)
    }

    /// Remove a session and free its name
    ///
    /// Returns the freed name, or `None` if the session was not registered
    /// (already removed, cleared by shutdown, or never joined). Only the
    /// caller that gets `Some` should announce the departure.
    pub fn unregister(&self, session: &Session) -> Option<String> {
        let mut inner = self.lock();

        let idx = inner.position(session.id)?;
        let removed = inner.sessions.remove(idx);
        let name = removed.name().map(str::to_string)?;
        inner.names.remove(&name);
        debug!(session = %session.id, name = %name, total = inner.sessions.len(), "unregistered");

        self.events.membership(inner.sorted_names());
        Some(name)
    }

    /// Point-in-time copy of the live sessions, in join order
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().sessions.clone()
    }

    /// Names currently in use
    pub fn names(&self) -> BTreeSet<String> {
        self.lock().names.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().position(id).is_some()
    }

    /// Drop every entry, returning the sessions that were live
    pub fn clear(&self) -> Vec<Arc<Session>> {
        self.clear_with(|| {})
    }

    /// Drop every entry, then run `on_cleared` before the lock is released
    ///
    /// Shutdown closes sessions from `on_cleared`: no connection task can
    /// win `unregister` for a cleared entry, and no handshake can register
    /// an open session after the clear.
    pub fn clear_with<F>(&self, on_cleared: F) -> Vec<Arc<Session>>
    where
        F: FnOnce(),
    {
        let mut inner = self.lock();
        let sessions = std::mem::take(&mut inner.sessions);
        inner.names.clear();
        on_cleared();
        self.events.membership(Vec::new());
        sessions
    }
}
