//! One accepted connection: framed receive loop, handshake state machine,
//! and command dispatch into the queue store.
//!
//! A session starts in `AwaitingHello`.  The first frame must be a `Hello`;
//! the server echoes it back as the handshake ack and the session becomes
//! `Ready`.  Every inbound non-ack command in `Ready` is answered with a
//! `CommandAck` before its effect is applied.  Any protocol fault ends only
//! this session.

use crate::registry::{BrokerState, PeerHandle};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mq_protocol::{Command, CommandKind, FrameCodec, Message, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Outbound frames buffered per session before delivery attempts defer.
const SESSION_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("peer went away")]
    PeerGone,
}

/// Drive one connection to completion.  Never returns an error to the
/// accept loop; all faults are logged here and end only this session.
pub async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<BrokerState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let codec = FrameCodec::with_max_frame_bytes(state.config.max_frame_bytes);
    let (sink, mut frames) = Framed::new(stream, codec).split();

    let (out_tx, out_rx) = mpsc::channel(SESSION_OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_loop(sink, out_rx));

    // AwaitingHello: the first frame decides whether a session exists at all.
    let peer = tokio::select! {
        biased;
        // A dropped shutdown sender means the broker itself is gone.
        _ = shutdown_or_closed(&mut shutdown) => None,
        first = frames.next() => match first {
            Some(Ok(cmd)) if cmd.kind == CommandKind::Hello => {
                let peer = PeerHandle::new(cmd.message.peer_id, out_tx.clone());
                state.register_peer(peer.clone()).await;
                // The echoed hello is the handshake ack.
                if out_tx.send(cmd).await.is_err() { None } else { Some(peer) }
            }
            Some(Ok(cmd)) => {
                warn!(%addr, kind = %cmd.kind, "first frame was not hello; closing");
                None
            }
            Some(Err(e)) => {
                warn!(%addr, error = %e, "session failed before handshake");
                None
            }
            None => None,
        }
    };

    if let Some(peer) = peer {
        info!(%addr, peer_id = %peer.peer_id, "session ready");
        if let Err(e) = ready_loop(&mut frames, &peer, &state, &mut shutdown).await {
            match e {
                SessionError::PeerGone => debug!(%addr, "session writer closed"),
                e => warn!(%addr, peer_id = %peer.peer_id, error = %e, "session ended"),
            }
        }
        state.remove_peer(&peer).await;
        info!(%addr, peer_id = %peer.peer_id, "session closed");
    }

    drop(out_tx);
    let _ = writer.await;
}

/// Resolves when shutdown is signalled or the broker's shutdown sender is
/// dropped; pends across spurious non-shutdown updates.
async fn shutdown_or_closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        match shutdown.changed().await {
            Err(_) => return,
            Ok(()) if *shutdown.borrow() => return,
            Ok(()) => {}
        }
    }
}

async fn ready_loop(
    frames: &mut SplitStream<Framed<TcpStream, FrameCodec>>,
    peer: &PeerHandle,
    state: &Arc<BrokerState>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_or_closed(shutdown) => return Ok(()),
            frame = frames.next() => match frame {
                None => return Ok(()),
                Some(Err(e)) => return Err(SessionError::Wire(e)),
                Some(Ok(cmd)) => handle_command(cmd, peer, state).await?,
            }
        }
    }
}

async fn handle_command(
    cmd: Command,
    peer: &PeerHandle,
    state: &Arc<BrokerState>,
) -> Result<(), SessionError> {
    match cmd.kind {
        CommandKind::Hello => {
            // Idempotent re-hello.
            debug!(peer_id = %peer.peer_id, "hello while ready; acked");
            ack(peer, &cmd.message).await
        }
        CommandKind::Enqueue | CommandKind::ProcessMessage => {
            if cmd.message.queue_name.is_empty() {
                return Err(SessionError::Protocol(
                    "enqueue with empty queue name".to_owned(),
                ));
            }
            ack(peer, &cmd.message).await?;
            enqueue(cmd.message, peer, state).await;
            Ok(())
        }
        CommandKind::Subscribe => {
            let name = require_queue_name(&cmd.message, "subscribe")?;
            ack(peer, &cmd.message).await?;
            let queue = state.queue(name).await;
            queue
                .send(crate::queue::QueueCmd::Subscribe { peer: peer.clone() })
                .await;
            Ok(())
        }
        CommandKind::Unsubscribe => {
            let name = require_queue_name(&cmd.message, "unsubscribe")?;
            ack(peer, &cmd.message).await?;
            if let Some(queue) = state.queue_if_exists(name).await {
                queue
                    .send(crate::queue::QueueCmd::Unsubscribe {
                        peer_id: peer.peer_id,
                    })
                    .await;
            }
            Ok(())
        }
        CommandKind::Clear => {
            let name = require_queue_name(&cmd.message, "clear")?;
            ack(peer, &cmd.message).await?;
            if let Some(queue) = state.queue_if_exists(name).await {
                queue.send(crate::queue::QueueCmd::Clear).await;
            }
            Ok(())
        }
        CommandKind::CommandAck => {
            // Delivery receipt: route to the owning queue by the echoed name.
            if let Some(queue) = state.queue_if_exists(&cmd.message.queue_name).await {
                queue
                    .send(crate::queue::QueueCmd::Delivered {
                        message_id: cmd.message.message_id,
                        peer_id: peer.peer_id,
                    })
                    .await;
            }
            Ok(())
        }
    }
}

/// Publish into the named queue.  Replies route through the queue's open
/// query map; if the queue has never existed there is no open query either,
/// so the reply is dropped without creating one.
async fn enqueue(message: Message, peer: &PeerHandle, state: &Arc<BrokerState>) {
    if message.is_reply {
        if let Some(queue) = state.queue_if_exists(&message.queue_name).await {
            queue
                .send(crate::queue::QueueCmd::Enqueue {
                    message,
                    origin: peer.clone(),
                })
                .await;
        } else {
            debug!(peer_id = %peer.peer_id, "reply for unknown queue dropped");
        }
    } else {
        let queue = state.queue(&message.queue_name).await;
        queue
            .send(crate::queue::QueueCmd::Enqueue {
                message,
                origin: peer.clone(),
            })
            .await;
    }
}

fn require_queue_name<'m>(
    message: &'m Message,
    operation: &str,
) -> Result<&'m str, SessionError> {
    if message.queue_name.is_empty() {
        return Err(SessionError::Protocol(format!(
            "{operation} with empty queue name"
        )));
    }
    Ok(&message.queue_name)
}

async fn ack(peer: &PeerHandle, of: &Message) -> Result<(), SessionError> {
    peer.outbound
        .send(Command::ack_of(of, peer.peer_id))
        .await
        .map_err(|_| SessionError::PeerGone)
}

async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, FrameCodec>, Command>,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = sink.send(cmd).await {
            debug!(error = %e, "session write failed");
            break;
        }
    }
    let _ = sink.close().await;
}
