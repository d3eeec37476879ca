//! TCP connection handler
//!
//! Drives one client from accept to teardown: line framing, the name
//! handshake, the receive loop, the outbound writer task, and exactly-once
//! departure handling.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::events::EventBus;
use crate::message::{self, Message};
use crate::registry::Registry;
use crate::session::{LoopEnd, Session};
use crate::types::SessionId;

/// Everything a connection task needs from its server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub broadcaster: Arc<Broadcaster>,
    pub events: EventBus,
    /// Parent of every session's close token; cancelled on server stop
    pub shutdown: CancellationToken,
}

/// Handle a new TCP connection
///
/// Per-connection failures are logged and reported on the event bus here;
/// nothing is returned to the accept loop.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) {
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(ctx.config.max_line_length),
    );

    // Server -> client queue, drained by the writer task
    let (out_tx, out_rx) = mpsc::channel::<String>(ctx.config.outbound_queue_capacity.max(1));
    let closed = ctx.shutdown.child_token();
    let session = Arc::new(Session::new(SessionId::new(), peer, out_tx, closed.clone()));
    debug!(session = %session.id, ?peer, "connection accepted");

    let writer = tokio::spawn(write_loop(
        FramedWrite::new(write_half, LinesCodec::new()),
        out_rx,
        closed,
        ctx.config.close_grace(),
    ));

    session.send(message::SUBMIT_NAME);

    let requested = tokio::select! {
        _ = session.closed() => None,
        first = lines.next() => match first {
            Some(Ok(line)) => Some(line),
            Some(Err(e)) => {
                report_error(&ctx.events, &session, &SessionError::from(e));
                None
            }
            None => {
                debug!(session = %session.id, error = %SessionError::HandshakeClosed, "no name received");
                None
            }
        },
    };

    let joined = requested.and_then(|requested| {
        session.negotiate_name(&requested, &ctx.registry, &ctx.config.default_name)
    });

    if let Some(name) = joined {
        info!(session = %session.id, ?peer, name = %name, "client joined");
        ctx.events.log(format!("New client joined: {name}"));
        ctx.broadcaster
            .broadcast_system(&Message::join(&name), Some(session.id));

        match session.receive_loop(&mut lines, &ctx.broadcaster).await {
            LoopEnd::Exit => debug!(session = %session.id, "client sent EXIT"),
            LoopEnd::Disconnected => debug!(session = %session.id, "client disconnected"),
            LoopEnd::Closed => debug!(session = %session.id, "session closed by server"),
            LoopEnd::Failed(e) => report_error(&ctx.events, &session, &e),
        }

        depart(&ctx, &session);
    }

    session.close();
    drop(lines);
    if let Err(e) = writer.await {
        warn!(session = %session.id, error = %e, "writer task failed");
    }
    debug!(session = %session.id, "connection closed");
}

/// Remove the session and announce it, unless someone else already did
fn depart(ctx: &ConnectionContext, session: &Session) {
    let Some(name) = ctx.registry.unregister(session) else {
        return;
    };

    ctx.broadcaster.broadcast_departure(session, &name);
    info!(session = %session.id, name = %name, "client left");
    ctx.events.log(format!("Client {name} left"));
}

fn report_error(events: &EventBus, session: &Session, err: &SessionError) {
    warn!(session = %session.id, name = session.display_name(), error = %err, "session error");
    events.log(format!("Error with client {}: {}", session.display_name(), err));
}

/// Drain the outbound queue into the socket
///
/// After `closed` fires, whatever is still queued (e.g. `SERVER_STOPPED`)
/// is flushed for at most `grace`, then the write half is shut down.
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut rx: mpsc::Receiver<String>,
    closed: CancellationToken,
    grace: Duration,
) {
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => {
                let Some(line) = line else { break };
                // Poll the send first: a dequeued line must not be dropped
                // just because close raced it.
                tokio::select! {
                    biased;
                    res = sink.send(line) => {
                        if let Err(e) = res {
                            debug!(error = %e, "write failed");
                            closed.cancel();
                            return;
                        }
                    }
                    _ = closed.cancelled() => break,
                }
            }
            _ = closed.cancelled() => break,
        }
    }

    let flush = async {
        while let Ok(line) = rx.try_recv() {
            sink.feed(line).await?;
        }
        SinkExt::<String>::close(&mut sink).await
    };
    if timeout(grace, flush).await.is_err() {
        debug!("outbound flush timed out");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (OwnedWriteHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_read, write) = accepted.unwrap().0.into_split();
        (write, client.unwrap())
    }

    #[tokio::test]
    async fn test_write_loop_flushes_queue_after_close() {
        let (write_half, client) = connected_pair().await;
        let (tx, rx) = mpsc::channel(8);
        let closed = CancellationToken::new();

        tx.try_send("first".to_string()).unwrap();
        tx.try_send(message::SERVER_STOPPED.to_string()).unwrap();
        closed.cancel();

        write_loop(
            FramedWrite::new(write_half, LinesCodec::new()),
            rx,
            closed,
            Duration::from_millis(500),
        )
        .await;

        let mut lines = BufReader::new(client).lines();
        let mut received = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line);
        }
        assert_eq!(received, vec!["first".to_string(), "SERVER_STOPPED".to_string()]);
    }

    #[tokio::test]
    async fn test_write_loop_forwards_until_sender_dropped() {
        let (write_half, client) = connected_pair().await;
        let (tx, rx) = mpsc::channel(8);

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, LinesCodec::new()),
            rx,
            CancellationToken::new(),
            Duration::from_millis(500),
        ));
        tx.send("hello".to_string()).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
