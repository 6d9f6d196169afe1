//! Outbound query correlation.
//!
//! One entry per open query, keyed by the query's `message_id`.  The waiter
//! owns the receive half of a oneshot; the receive task resolves it with the
//! correlated reply.  Disconnect resolves every open entry with `None` so
//! blocked callers return instead of running out their full timeout.

use mq_protocol::Message;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

type ReplySender = oneshot::Sender<Option<Message>>;

#[derive(Default)]
pub(crate) struct QueryTable {
    open: Mutex<HashMap<Uuid, ReplySender>>,
}

impl QueryTable {
    pub fn new() -> QueryTable {
        QueryTable::default()
    }

    pub fn register(&self, message_id: Uuid) -> oneshot::Receiver<Option<Message>> {
        let (tx, rx) = oneshot::channel();
        self.open.lock().unwrap().insert(message_id, tx);
        rx
    }

    /// Detach the waiter for `message_id`, if one is still open.  The caller
    /// decides what to send, so the "reply received" event can observe
    /// whether a waiter existed before the reply is handed over.
    pub fn take(&self, message_id: Uuid) -> Option<ReplySender> {
        self.open.lock().unwrap().remove(&message_id)
    }

    /// Drop the waiter after its timeout ran out.
    pub fn remove(&self, message_id: Uuid) {
        self.open.lock().unwrap().remove(&message_id);
    }

    /// Complete every open query with no reply (disconnect path).
    pub fn resolve_all_none(&self) {
        for (_, tx) in self.open.lock().unwrap().drain() {
            let _ = tx.send(None);
        }
    }
}
