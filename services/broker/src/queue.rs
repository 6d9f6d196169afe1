//! Queue state and the per-queue dispatcher task.
//!
//! Every queue is owned by exactly one tokio task with an mpsc inbox, so all
//! fan-out for a queue is single-threaded and per-subscriber FIFO holds by
//! construction.  The registry talks to a queue only through its
//! [`QueueHandle`].
//!
//! # Delivery policy
//!
//! - An item's subscriber snapshot is taken at its first delivery attempt;
//!   subscribers arriving later never join an existing snapshot.
//! - At most one delivery is inflight per (queue, subscriber); the next item
//!   for a subscriber is sent only after the previous one is acked.
//! - An item leaves the queue when every snapshot member has acked, when it
//!   expires, or when every snapshot member has been given up on.
//! - A delivery unacked past the ack timeout is presumed dead: the
//!   subscriber's slot is released and that subscriber is never sent the
//!   same item again.

use crate::registry::PeerHandle;
use mq_protocol::message::now_ms;
use mq_protocol::{Command, Message};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

/// Inbox capacity per queue task.
const QUEUE_INBOX_CAPACITY: usize = 256;

/// Commands accepted by a queue task.
#[derive(Debug)]
pub enum QueueCmd {
    /// A publisher enqueued a message (notification, query, or reply).
    Enqueue { message: Message, origin: PeerHandle },
    Subscribe { peer: PeerHandle },
    Unsubscribe { peer_id: Uuid },
    Clear,
    /// A subscriber acked a delivery.
    Delivered { message_id: Uuid, peer_id: Uuid },
    /// A peer's session ended; drop its subscription and open queries.
    PeerGone { peer_id: Uuid },
}

/// Cheap cloneable handle to one queue's dispatcher task.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    name: String,
    tx: mpsc::Sender<QueueCmd>,
}

impl QueueHandle {
    /// Display spelling of the queue name (first seen).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, cmd: QueueCmd) {
        if self.tx.send(cmd).await.is_err() {
            warn!(queue = %self.name, "queue task is gone; command dropped");
        }
    }
}

/// Spawn the dispatcher task for a new queue.
pub fn spawn_queue(
    name: String,
    ack_timeout: Duration,
    sweep_interval: Duration,
) -> QueueHandle {
    let (tx, rx) = mpsc::channel(QUEUE_INBOX_CAPACITY);
    let state = QueueState::new(name.clone(), ack_timeout);
    tokio::spawn(run_queue(state, rx, sweep_interval));
    QueueHandle { name, tx }
}

async fn run_queue(
    mut state: QueueState,
    mut rx: mpsc::Receiver<QueueCmd>,
    sweep_interval: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                None => break,
                Some(cmd) => state.apply(cmd),
            },
            _ = ticker.tick() => {}
        }
        state.pump();
    }
    debug!(queue = %state.name, "queue task stopped");
}

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

struct QueueItem {
    message: Message,
    /// Snapshot members that still owe an ack.  `None` until the first
    /// delivery attempt.
    remaining: Option<HashSet<Uuid>>,
}

struct SubscriberState {
    outbound: mpsc::Sender<Command>,
    inflight: Option<Inflight>,
}

struct Inflight {
    message_id: Uuid,
    sent_at: Instant,
}

struct OpenQuery {
    origin: mpsc::Sender<Command>,
    origin_peer: Uuid,
    /// Unix-ms deadline; `None` means the query waits indefinitely.
    deadline_ms: Option<i64>,
}

struct QueueState {
    name: String,
    items: VecDeque<QueueItem>,
    subscribers: HashMap<Uuid, SubscriberState>,
    open_queries: HashMap<Uuid, OpenQuery>,
    ack_timeout: Duration,
    presumed_dead: u64,
}

impl QueueState {
    fn new(name: String, ack_timeout: Duration) -> QueueState {
        QueueState {
            name,
            items: VecDeque::new(),
            subscribers: HashMap::new(),
            open_queries: HashMap::new(),
            ack_timeout,
            presumed_dead: 0,
        }
    }

    fn apply(&mut self, cmd: QueueCmd) {
        match cmd {
            QueueCmd::Enqueue { message, origin } => {
                if message.is_reply {
                    self.route_reply(message);
                } else {
                    self.append(message, &origin);
                }
            }
            QueueCmd::Subscribe { peer } => match self.subscribers.entry(peer.peer_id) {
                Entry::Occupied(mut entry) => {
                    // Re-subscribe over a new session: swap the outbound
                    // channel but keep the inflight slot, so an item sent on
                    // the old session is never sent a second time.
                    entry.get_mut().outbound = peer.outbound;
                }
                Entry::Vacant(entry) => {
                    entry.insert(SubscriberState {
                        outbound: peer.outbound,
                        inflight: None,
                    });
                }
            },
            QueueCmd::Unsubscribe { peer_id } => self.remove_subscriber(peer_id),
            QueueCmd::Clear => self.items.clear(),
            QueueCmd::Delivered {
                message_id,
                peer_id,
            } => {
                if let Some(sub) = self.subscribers.get_mut(&peer_id) {
                    if sub
                        .inflight
                        .as_ref()
                        .is_some_and(|inf| inf.message_id == message_id)
                    {
                        sub.inflight = None;
                    }
                }
                self.settle(message_id, peer_id);
            }
            QueueCmd::PeerGone { peer_id } => {
                self.remove_subscriber(peer_id);
                self.open_queries.retain(|_, q| q.origin_peer != peer_id);
            }
        }
    }

    fn append(&mut self, message: Message, origin: &PeerHandle) {
        if message.is_query {
            let deadline_ms = (message.expire_seconds > 0)
                .then(|| message.enqueued_at + i64::from(message.expire_seconds) * 1000);
            self.open_queries.insert(
                message.message_id,
                OpenQuery {
                    origin: origin.outbound.clone(),
                    origin_peer: origin.peer_id,
                    deadline_ms,
                },
            );
        }
        self.items.push_back(QueueItem {
            message,
            remaining: None,
        });
    }

    /// Route a reply to the matching query's origin; unmatched replies are
    /// dropped silently.
    fn route_reply(&mut self, reply: Message) {
        let Some(reply_to) = reply.in_reply_to else {
            debug!(queue = %self.name, "reply without correlation id dropped");
            return;
        };
        match self.open_queries.remove(&reply_to) {
            Some(query) => {
                if query
                    .origin
                    .try_send(Command::process_message(reply))
                    .is_err()
                {
                    debug!(queue = %self.name, %reply_to, "query origin unreachable; reply dropped");
                }
                // The reply ends the query's fan-out.
                self.items.retain(|i| i.message.message_id != reply_to);
            }
            None => debug!(queue = %self.name, %reply_to, "unmatched reply dropped"),
        }
    }

    fn remove_subscriber(&mut self, peer_id: Uuid) {
        self.subscribers.remove(&peer_id);
        for item in &mut self.items {
            if let Some(rem) = item.remaining.as_mut() {
                rem.remove(&peer_id);
            }
        }
        self.drop_completed();
    }

    /// Mark `message_id` acked by `peer_id` and drop the item if its
    /// snapshot is drained.  Tolerates an already-removed item (expired or
    /// reply-routed while the ack was in transit).
    fn settle(&mut self, message_id: Uuid, peer_id: Uuid) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.message.message_id == message_id)
        {
            if let Some(rem) = item.remaining.as_mut() {
                rem.remove(&peer_id);
            }
        }
        self.drop_completed();
    }

    fn drop_completed(&mut self) {
        self.items
            .retain(|i| !i.remaining.as_ref().is_some_and(HashSet::is_empty));
    }

    /// One maintenance-and-delivery pass.  Runs after every inbox command
    /// and on every sweep tick.
    fn pump(&mut self) {
        let wall_ms = now_ms();
        let now = Instant::now();

        // Expired items are removed before any delivery attempt.
        self.items.retain(|i| !i.message.is_expired_at(wall_ms));
        self.open_queries
            .retain(|_, q| q.deadline_ms.is_none_or(|d| d >= wall_ms));

        self.reap_stale_deliveries(now);
        self.deliver(now);
        self.drop_completed();
    }

    /// Give up on deliveries unacked past the timeout, releasing the
    /// subscriber's slot without ever re-sending the item.
    fn reap_stale_deliveries(&mut self, now: Instant) {
        let mut abandoned: Vec<(Uuid, Uuid)> = Vec::new();
        for (peer_id, sub) in &mut self.subscribers {
            if let Some(inf) = &sub.inflight {
                if now.duration_since(inf.sent_at) > self.ack_timeout {
                    abandoned.push((inf.message_id, *peer_id));
                    sub.inflight = None;
                }
            }
        }
        for (message_id, peer_id) in abandoned {
            self.presumed_dead += 1;
            warn!(
                queue = %self.name,
                %peer_id,
                %message_id,
                presumed_dead = self.presumed_dead,
                "delivery unacked past timeout; presumed dead"
            );
            self.settle(message_id, peer_id);
        }
    }

    fn deliver(&mut self, now: Instant) {
        for item in &mut self.items {
            if item.remaining.is_none() {
                if self.subscribers.is_empty() {
                    continue;
                }
                item.remaining = Some(self.subscribers.keys().copied().collect());
            }

            let snapshot: Vec<Uuid> = item
                .remaining
                .as_ref()
                .map(|r| r.iter().copied().collect())
                .unwrap_or_default();
            for peer_id in snapshot {
                let Some(sub) = self.subscribers.get_mut(&peer_id) else {
                    continue;
                };
                if sub.inflight.is_some() {
                    continue;
                }
                match sub
                    .outbound
                    .try_send(Command::process_message(item.message.clone()))
                {
                    Ok(()) => {
                        sub.inflight = Some(Inflight {
                            message_id: item.message.message_id,
                            sent_at: now,
                        });
                    }
                    Err(err) => {
                        // Writer backlogged or session tearing down; the
                        // attempt is retried on a later pump.
                        debug!(queue = %self.name, %peer_id, error = %err, "delivery deferred");
                    }
                }
            }
        }
    }
}
