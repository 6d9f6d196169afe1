//! Shared broker state: live peers and the named queue store.
//!
//! Queue names are case-insensitive-unique; the store keys queues by the
//! lowercased name and a queue keeps the spelling it was first created with.
//! Both maps are leaf locks: nothing is awaited while either is held.

use crate::config::BrokerConfig;
use crate::queue::{spawn_queue, QueueCmd, QueueHandle};
use mq_protocol::Command;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// The write side of one peer's session: identity plus the fire-and-forget
/// outbound channel drained by the session's writer task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub peer_id: Uuid,
    pub outbound: mpsc::Sender<Command>,
}

impl PeerHandle {
    pub fn new(peer_id: Uuid, outbound: mpsc::Sender<Command>) -> PeerHandle {
        PeerHandle { peer_id, outbound }
    }
}

pub struct BrokerState {
    pub config: BrokerConfig,
    peers: Mutex<HashMap<Uuid, PeerHandle>>,
    queues: Mutex<HashMap<String, QueueHandle>>,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> BrokerState {
        BrokerState {
            config,
            peers: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Record a peer that completed its handshake.  A peer reconnecting
    /// under the same id replaces its old handle.
    pub async fn register_peer(&self, peer: PeerHandle) {
        let old = self.peers.lock().await.insert(peer.peer_id, peer.clone());
        if old.is_some() {
            debug!(peer_id = %peer.peer_id, "peer re-registered over a new session");
        } else {
            info!(peer_id = %peer.peer_id, "peer registered");
        }
    }

    /// Tear down a peer's broker-side state when its session ends.
    ///
    /// Only removes the registration if it still belongs to this session's
    /// channel, so a reconnected peer is not unregistered by its old
    /// session's teardown.  Queue cleanup runs either way: the dead session's
    /// subscriptions must not linger.
    pub async fn remove_peer(&self, peer: &PeerHandle) {
        {
            let mut peers = self.peers.lock().await;
            let current = peers
                .get(&peer.peer_id)
                .is_some_and(|p| p.outbound.same_channel(&peer.outbound));
            if current {
                peers.remove(&peer.peer_id);
            } else {
                return;
            }
        }
        info!(peer_id = %peer.peer_id, "peer unregistered");

        let queues: Vec<QueueHandle> = self.queues.lock().await.values().cloned().collect();
        for queue in queues {
            queue
                .send(QueueCmd::PeerGone {
                    peer_id: peer.peer_id,
                })
                .await;
        }
    }

    /// Look up a queue, creating (and spawning) it on first use.
    pub async fn queue(&self, name: &str) -> QueueHandle {
        let key = name.to_lowercase();
        let mut queues = self.queues.lock().await;
        if let Some(handle) = queues.get(&key) {
            return handle.clone();
        }
        info!(queue = %name, "queue created");
        let handle = spawn_queue(
            name.to_owned(),
            self.config.ack_timeout(),
            self.config.sweep_interval(),
        );
        queues.insert(key, handle.clone());
        handle
    }

    pub async fn queue_if_exists(&self, name: &str) -> Option<QueueHandle> {
        self.queues.lock().await.get(&name.to_lowercase()).cloned()
    }
}
