//! Broker client: connection management, publish/subscribe operations, and
//! query dispatch.
//!
//! A client owns one live session at a time.  The receive task decodes
//! frames and drives the event surface; a writer task drains the outbound
//! channel so sends never block the receive path; the supervisor task
//! (spawned at connect) reaps stale acks and reconnects after transport
//! loss, replaying every remembered subscription.

use crate::ack::AckTracker;
use crate::events::EventHandler;
use crate::query::QueryTable;
use crate::supervisor;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mq_protocol::{Command, CommandKind, FrameCodec, Message, WireError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound frames buffered before sends start failing fast.
const CLIENT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Operation requires a live session.  Fail fast; the caller decides
    /// whether to retry after the supervisor reconnects.
    #[error("not connected to a broker")]
    NotConnected,
    #[error("queue name must not be empty")]
    EmptyQueueName,
    #[error("broker did not answer the handshake in time")]
    HandshakeTimeout,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("event handler panicked")]
    HandlerPanicked,
}

/// Client tuning knobs; the defaults mirror the protocol constants.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ack_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub query_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ack_timeout_ms: mq_protocol::ACK_TIMEOUT_MS,
            reconnect_interval_ms: mq_protocol::RECONNECT_INTERVAL_MS,
            query_timeout_ms: mq_protocol::QUERY_TIMEOUT_MS,
            max_frame_bytes: mq_protocol::MAX_FRAME_BYTES,
        }
    }
}

/// Handle to one broker connection.  Cloning shares the underlying session.
#[derive(Clone)]
pub struct MqClient {
    inner: Arc<ClientInner>,
}

impl MqClient {
    /// Connect with default tuning.
    pub async fn connect(
        addr: impl Into<String>,
        events: Arc<dyn EventHandler>,
    ) -> Result<MqClient, ClientError> {
        MqClient::connect_with_config(addr, ClientConfig::default(), events).await
    }

    /// Connect, perform the hello handshake, and start the supervisor.
    pub async fn connect_with_config(
        addr: impl Into<String>,
        config: ClientConfig,
        events: Arc<dyn EventHandler>,
    ) -> Result<MqClient, ClientError> {
        let inner = Arc::new(ClientInner {
            peer_id: Uuid::new_v4(),
            addr: addr.into(),
            config,
            events,
            running: AtomicBool::new(true),
            conn: Mutex::new(None),
            subscribed: Mutex::new(Vec::new()),
            acks: AckTracker::new(),
            queries: QueryTable::new(),
        });
        inner.establish().await?;
        tokio::spawn(supervisor::supervisor_loop(Arc::clone(&inner)));
        Ok(MqClient { inner })
    }

    /// This client's peer identity, minted at construction.
    pub fn peer_id(&self) -> Uuid {
        self.inner.peer_id
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.conn.lock().await.is_some()
    }

    /// Commands abandoned without an ack so far (timeouts, reaps, and
    /// disconnect casualties).
    pub fn presumed_dead_command_count(&self) -> u64 {
        self.inner.acks.presumed_dead_count()
    }

    /// Subscribe to a queue.  Remembered for replay across reconnects.
    pub async fn subscribe(&self, queue: &str) -> Result<(), ClientError> {
        require_queue_name(queue)?;
        self.inner.require_connected().await?;
        {
            let mut subscribed = self.inner.subscribed.lock().await;
            if !subscribed.iter().any(|q| q == queue) {
                subscribed.push(queue.to_owned());
            }
        }
        self.inner
            .send_acked(Command::subscribe(self.inner.peer_id, queue))
            .await?;
        self.inner.events.queue_subscribed(queue);
        Ok(())
    }

    pub async fn unsubscribe(&self, queue: &str) -> Result<(), ClientError> {
        require_queue_name(queue)?;
        self.inner.require_connected().await?;
        self.inner
            .subscribed
            .lock()
            .await
            .retain(|q| q != queue);
        self.inner
            .send_acked(Command::unsubscribe(self.inner.peer_id, queue))
            .await?;
        self.inner.events.queue_unsubscribed(queue);
        Ok(())
    }

    /// Publish a notification.  Waits for the broker's receipt ack up to the
    /// ack timeout; a missing ack is counted, never an error.
    pub async fn enqueue(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        expire_seconds: u32,
    ) -> Result<Message, ClientError> {
        require_queue_name(queue)?;
        let message =
            Message::notification(self.inner.peer_id, queue, label, body, expire_seconds);
        self.inner
            .send_acked(Command::enqueue(message.clone()))
            .await?;
        self.inner.events.enqueued(&message);
        Ok(message)
    }

    /// Empty a queue's pending items; its subscribers stay.
    pub async fn clear(&self, queue: &str) -> Result<(), ClientError> {
        require_queue_name(queue)?;
        self.inner.require_connected().await?;
        self.inner
            .send_acked(Command::clear(self.inner.peer_id, queue))
            .await?;
        self.inner.events.queue_cleared(queue);
        Ok(())
    }

    /// Publish a query and wait for its correlated reply with the default
    /// query timeout.  `Ok(None)` means the reply did not arrive in time.
    pub async fn query(
        &self,
        queue: &str,
        label: &str,
        body: &str,
    ) -> Result<Option<Message>, ClientError> {
        let timeout = self.inner.config.query_timeout();
        self.query_with_timeout(queue, label, body, timeout).await
    }

    pub async fn query_with_timeout(
        &self,
        queue: &str,
        label: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<Option<Message>, ClientError> {
        require_queue_name(queue)?;
        let message = Message::query(
            self.inner.peer_id,
            queue,
            label,
            body,
            expire_seconds_for(timeout),
        );
        let message_id = message.message_id;
        let reply_rx = self.inner.queries.register(message_id);

        if let Err(e) = self.inner.send_acked(Command::enqueue(message)).await {
            self.inner.queries.remove(message_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.inner.queries.remove(message_id);
                Ok(None)
            }
        }
    }

    /// Fire-and-forget query: no waiter is registered, so the reply (if one
    /// comes) surfaces only through `query_reply_received`.
    pub async fn query_no_wait(
        &self,
        queue: &str,
        label: &str,
        body: &str,
    ) -> Result<Message, ClientError> {
        require_queue_name(queue)?;
        let expire = expire_seconds_for(self.inner.config.query_timeout());
        let message = Message::query(self.inner.peer_id, queue, label, body, expire);
        self.inner
            .send_acked_detached(Command::enqueue(message.clone()))
            .await?;
        Ok(message)
    }

    /// Orderly shutdown: stop the supervisor, close the session, release
    /// every blocked query waiter, and abandon outstanding acks.
    pub async fn disconnect(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        *self.inner.conn.lock().await = None;
        self.inner.queries.resolve_all_none();
        self.inner.acks.abandon_all();
        self.inner.fire(|events| events.disconnected());
        info!(peer_id = %self.inner.peer_id, "client disconnected");
    }
}

fn require_queue_name(queue: &str) -> Result<(), ClientError> {
    if queue.is_empty() {
        return Err(ClientError::EmptyQueueName);
    }
    Ok(())
}

/// Round a wait budget up to whole seconds for the wire's expiry field.
fn expire_seconds_for(timeout: Duration) -> u32 {
    let mut secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs += 1;
    }
    u32::try_from(secs).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Shared client internals
// ---------------------------------------------------------------------------

pub(crate) struct ClientInner {
    pub(crate) peer_id: Uuid,
    pub(crate) addr: String,
    pub(crate) config: ClientConfig,
    pub(crate) events: Arc<dyn EventHandler>,
    pub(crate) running: AtomicBool,
    pub(crate) conn: Mutex<Option<mpsc::Sender<Command>>>,
    subscribed: Mutex<Vec<String>>,
    pub(crate) acks: AckTracker,
    queries: QueryTable,
}

impl ClientInner {
    /// Open a socket, start the writer and receive tasks, perform the hello
    /// handshake, and replay remembered subscriptions.  Used by the first
    /// connect and by every supervisor reconnect.
    pub(crate) async fn establish(self: &Arc<Self>) -> Result<(), ClientError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        let stream = TcpStream::connect(&self.addr).await?;
        let codec = FrameCodec::with_max_frame_bytes(self.config.max_frame_bytes);
        let (sink, frames) = Framed::new(stream, codec).split();

        let (out_tx, out_rx) = mpsc::channel(CLIENT_OUTBOUND_CAPACITY);
        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(receive_loop(Arc::clone(self), frames, out_tx.clone()));
        *self.conn.lock().await = Some(out_tx.clone());

        // The echoed hello is the handshake ack; without it the session is
        // not usable.
        let hello = Command::hello(self.peer_id);
        let hello_id = hello.message.message_id;
        let ack_rx = self.acks.register(hello_id);
        if out_tx.send(hello).await.is_err() {
            self.acks.forget(hello_id);
            self.drop_conn_if_current(&out_tx).await;
            return Err(ClientError::NotConnected);
        }
        if !self
            .acks
            .wait(hello_id, ack_rx, self.config.ack_timeout())
            .await
        {
            self.drop_conn_if_current(&out_tx).await;
            return Err(ClientError::HandshakeTimeout);
        }

        let replay: Vec<String> = self.subscribed.lock().await.clone();
        for queue in replay {
            self.send_acked(Command::subscribe(self.peer_id, &queue))
                .await?;
        }

        // An orderly disconnect can race the handshake; don't revive a
        // session the caller already tore down.
        if !self.running.load(Ordering::Acquire) {
            self.drop_conn_if_current(&out_tx).await;
            return Err(ClientError::NotConnected);
        }

        self.fire(|events| events.connected());
        Ok(())
    }

    async fn require_connected(&self) -> Result<(), ClientError> {
        if self.conn.lock().await.is_some() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), ClientError> {
        let tx = self
            .conn
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        tx.send(cmd).await.map_err(|_| ClientError::NotConnected)
    }

    /// Slot-before-send ack round trip.  Returns whether the ack arrived;
    /// a missing ack is counted presumed dead, never an error.
    async fn send_acked(&self, cmd: Command) -> Result<bool, ClientError> {
        let message_id = cmd.message.message_id;
        let ack_rx = self.acks.register(message_id);
        if let Err(e) = self.send(cmd).await {
            self.acks.forget(message_id);
            return Err(e);
        }
        Ok(self
            .acks
            .wait(message_id, ack_rx, self.config.ack_timeout())
            .await)
    }

    /// Like `send_acked`, but the wait runs in the background so the caller
    /// returns as soon as the frame is queued.
    async fn send_acked_detached(self: &Arc<Self>, cmd: Command) -> Result<(), ClientError> {
        let message_id = cmd.message.message_id;
        let ack_rx = self.acks.register(message_id);
        if let Err(e) = self.send(cmd).await {
            self.acks.forget(message_id);
            return Err(e);
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner
                .acks
                .wait(message_id, ack_rx, inner.config.ack_timeout())
                .await;
        });
        Ok(())
    }

    async fn drop_conn_if_current(&self, out_tx: &mpsc::Sender<Command>) -> bool {
        let mut conn = self.conn.lock().await;
        if conn.as_ref().is_some_and(|tx| tx.same_channel(out_tx)) {
            *conn = None;
            true
        } else {
            false
        }
    }

    /// Receive-task exit path.  Only the session that is still current tears
    /// state down; a superseded session (reconnect already happened) or an
    /// explicit disconnect leaves it alone.
    async fn connection_lost(&self, out_tx: &mpsc::Sender<Command>) {
        if !self.drop_conn_if_current(out_tx).await {
            return;
        }
        debug!(peer_id = %self.peer_id, "connection lost");
        self.queries.resolve_all_none();
        self.fire(|events| events.disconnected());
    }

    async fn handle_inbound(&self, cmd: Command, out_tx: &mpsc::Sender<Command>) {
        match cmd.kind {
            CommandKind::Hello => {
                // Handshake echo.
                if !self.acks.resolve(cmd.message.message_id) {
                    debug!("unexpected hello echo");
                }
            }
            CommandKind::CommandAck => {
                if !self.acks.resolve(cmd.message.message_id) {
                    debug!(message_id = %cmd.message.message_id, "ack for unknown command");
                }
            }
            CommandKind::ProcessMessage => self.handle_delivery(cmd.message, out_tx).await,
            kind => debug!(%kind, "ignoring unexpected command from broker"),
        }
    }

    async fn handle_delivery(&self, message: Message, out_tx: &mpsc::Sender<Command>) {
        if message.is_reply {
            // Replies are correlated, not acked: the query machinery is the
            // receipt path, and acking here can deadlock against a waiter.
            let Some(correlation) = message.in_reply_to else {
                debug!("reply without correlation id dropped");
                return;
            };
            let waiter = self.queries.take(correlation);
            let has_open_query = waiter.is_some();
            self.fire(|events| events.query_reply_received(&message, has_open_query));
            if let Some(tx) = waiter {
                let _ = tx.send(Some(message));
            }
            return;
        }

        if message.is_query {
            let reply = self
                .fire_with(|events| events.query_received(&message))
                .flatten();
            if let Some(reply) = reply {
                let reply = Message::reply_to(&message, self.peer_id, reply.label, reply.body);
                // Fire-and-forget: no ack slot for replies.
                if out_tx.send(Command::enqueue(reply)).await.is_err() {
                    warn!("session closed while sending query reply");
                }
            }
        } else {
            self.fire(|events| events.message_received(&message));
        }

        // The delivery ack goes out after the handler returns: it doubles as
        // the pacing token for the per-subscriber inflight window.
        if out_tx
            .send(Command::ack_of(&message, self.peer_id))
            .await
            .is_err()
        {
            debug!("session closed while acking delivery");
        }
    }

    fn fire(&self, f: impl FnOnce(&dyn EventHandler)) {
        self.fire_with(f);
    }

    /// Run a handler, converting a panic into `exception_occurred`.
    fn fire_with<T>(&self, f: impl FnOnce(&dyn EventHandler) -> T) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(|| f(self.events.as_ref()))) {
            Ok(value) => Some(value),
            Err(_) => {
                let err = ClientError::HandlerPanicked;
                let _ = catch_unwind(AssertUnwindSafe(|| {
                    self.events.exception_occurred(&err);
                }));
                None
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<ClientInner>,
    mut frames: SplitStream<Framed<TcpStream, FrameCodec>>,
    out_tx: mpsc::Sender<Command>,
) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(cmd) => inner.handle_inbound(cmd, &out_tx).await,
            Err(e) => {
                let err = ClientError::Wire(e);
                warn!(error = %err, "session failed");
                inner.fire(|events| events.exception_occurred(&err));
                break;
            }
        }
    }
    inner.connection_lost(&out_tx).await;
}

async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, FrameCodec>, Command>,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = sink.send(cmd).await {
            debug!(error = %e, "client write failed");
            break;
        }
    }
    let _ = sink.close().await;
}
