//! Server: lifecycle owner
//!
//! Owns the listening socket, the accept loop, the session registry and
//! the broadcaster for one chat instance. Nothing here is global, so any
//! number of servers can run side by side (tests do exactly that).
//!
//! State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! `start` and `stop` are serialized by an async lifecycle lock; calls that
//! make no sense in the current state are ignored rather than failing.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{EventBus, ServerEvent};
use crate::handler::{handle_connection, ConnectionContext};
use crate::message::Message;
use crate::registry::Registry;
use crate::types::ServerState;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handles owned while the server is running
#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    /// Stops the accept loop
    accept_cancel: CancellationToken,
    /// Parent of every session's close token
    sessions: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// The chat server
#[derive(Debug)]
pub struct Server {
    config: Arc<ServerConfig>,
    events: EventBus,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    state: parking_lot::Mutex<ServerState>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    lifecycle: Mutex<Option<Running>>,
}

impl Server {
    /// Create a stopped server with its own registry and event bus
    pub fn new(config: ServerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(Registry::new(events.clone(), config.max_name_suffix));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            events.clone(),
            config.exclude_sender_from_echo,
            config.exclude_subject_from_notices,
        ));

        Self {
            config: Arc::new(config),
            events,
            registry,
            broadcaster,
            state: parking_lot::Mutex::new(ServerState::Stopped),
            local_addr: parking_lot::Mutex::new(None),
            lifecycle: Mutex::new(None),
        }
    }

    /// Bind `bind_addr` and start accepting connections
    ///
    /// Returns the bound address (useful with port 0). If the server is
    /// already running this is a no-op returning the current address.
    pub async fn start(&self, bind_addr: &str) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            warn!(addr = %running.local_addr, "start ignored, server already running");
            return Ok(running.local_addr);
        }

        self.set_state(ServerState::Starting);

        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.set_state(ServerState::Stopped);
                let err = ServerError::Bind {
                    addr: bind_addr.to_string(),
                    source,
                };
                self.events.log(format!("Error starting server: {err}"));
                return Err(err);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.set_state(ServerState::Stopped);
                return Err(ServerError::Io(e));
            }
        };

        let accept_cancel = CancellationToken::new();
        let sessions = CancellationToken::new();
        let ctx = ConnectionContext {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            broadcaster: Arc::clone(&self.broadcaster),
            events: self.events.clone(),
            shutdown: sessions.clone(),
        };
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            accept_cancel.clone(),
            self.config.close_grace() * 2,
        ));

        *lifecycle = Some(Running {
            local_addr,
            accept_cancel,
            sessions,
            accept_task,
        });
        *self.local_addr.lock() = Some(local_addr);
        self.set_state(ServerState::Running);

        info!(addr = %local_addr, "chat server started");
        self.events.log(format!("Chat server started on {local_addr}"));
        self.events
            .membership(self.registry.names().into_iter().collect());

        Ok(local_addr)
    }

    /// Stop accepting, notify and disconnect every session, release the port
    ///
    /// Safe to call from any task, any number of times; calls while
    /// already stopped are no-ops.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            debug!("stop ignored, server not running");
            return;
        };

        self.set_state(ServerState::Stopping);
        running.accept_cancel.cancel();

        let notified = self.broadcaster.broadcast_system(&Message::shutdown(), None);
        let cleared = self.registry.clear_with(|| running.sessions.cancel());
        debug!(notified, cleared = cleared.len(), "sessions closed");

        let wait = self.config.close_grace() * 3;
        match timeout(wait, running.accept_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "accept task failed"),
            Err(_) => warn!("accept task did not finish in time"),
        }

        *self.local_addr.lock() = None;
        self.set_state(ServerState::Stopped);
        info!("chat server stopped");
        self.events.log("Server stopped");
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.registry.names()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to membership, log and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
        debug!(%state, "server state");
        self.events.state(state);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.accept_cancel.cancel();
            running.sessions.cancel();
        }
    }
}

/// Accept connections until cancelled, one task per connection
///
/// On cancel the listener is dropped right away; connection tasks then get
/// `drain` to finish before being aborted.
async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    cancel: CancellationToken,
    drain: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    debug!(%peer, "new connection");
                    connections.spawn(handle_connection(stream, ctx.clone()));
                }
                Err(e) => accept_failed(&ctx.events, &e).await,
            },
            Some(done) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "connection task failed");
                }
            }
        }
    }

    drop(listener);

    let finished = timeout(drain, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if finished.is_err() {
        warn!(remaining = connections.len(), "aborting lingering connections");
        connections.abort_all();
    }
    debug!("accept loop ended");
}

async fn accept_failed(events: &EventBus, err: &io::Error) {
    warn!(error = %err, "failed to accept connection");
    events.log(format!("Error accepting client: {err}"));
    sleep(ACCEPT_BACKOFF).await;
}
