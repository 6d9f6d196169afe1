//! Outstanding-command acknowledgment tracking.
//!
//! The contract is allocate-before-send: the sender registers a slot keyed
//! by the command's `message_id`, writes the frame, then waits on the slot
//! up to the ack timeout.  The receive task resolves the slot when the
//! matching `CommandAck` (or echoed `Hello`) arrives.  A slot that times
//! out, is reaped, or is abandoned at disconnect counts into
//! `presumed_dead`: the ack protocol is liveness-only and never an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration, Instant};
use uuid::Uuid;

struct AckSlot {
    created: Instant,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
pub(crate) struct AckTracker {
    slots: Mutex<HashMap<Uuid, AckSlot>>,
    presumed_dead: AtomicU64,
}

impl AckTracker {
    pub fn new() -> AckTracker {
        AckTracker::default()
    }

    /// Allocate the slot for `message_id`.  Must happen before the command's
    /// bytes go out, or the ack could race the registration.
    pub fn register(&self, message_id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap().insert(
            message_id,
            AckSlot {
                created: Instant::now(),
                tx,
            },
        );
        rx
    }

    /// Resolve a slot from an inbound ack.  Returns false for an unknown id
    /// (already timed out, or never ours).
    pub fn resolve(&self, message_id: Uuid) -> bool {
        match self.slots.lock().unwrap().remove(&message_id) {
            Some(slot) => {
                let _ = slot.tx.send(());
                true
            }
            None => false,
        }
    }

    /// Wait for the slot to resolve.  Returns whether the ack arrived;
    /// a timeout removes the slot and counts it presumed dead.
    pub async fn wait(&self, message_id: Uuid, rx: oneshot::Receiver<()>, limit: Duration) -> bool {
        if timeout(limit, rx).await.is_ok_and(|r| r.is_ok()) {
            return true;
        }
        if self.slots.lock().unwrap().remove(&message_id).is_some() {
            self.presumed_dead.fetch_add(1, Ordering::Relaxed);
        }
        false
    }

    /// Drop the slot without counting it (send never happened).
    pub fn forget(&self, message_id: Uuid) {
        self.slots.lock().unwrap().remove(&message_id);
    }

    /// Remove slots older than `max_age`, counting each presumed dead.
    /// Reaping never signals the waiter; the waiter's own timeout does that.
    pub fn reap(&self, max_age: Duration) {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| now.duration_since(slot.created) <= max_age);
        let reaped = before - slots.len();
        if reaped > 0 {
            self.presumed_dead
                .fetch_add(reaped as u64, Ordering::Relaxed);
        }
    }

    /// Abandon every outstanding slot (disconnect path).
    pub fn abandon_all(&self) {
        let mut slots = self.slots.lock().unwrap();
        let abandoned = slots.len();
        slots.clear();
        if abandoned > 0 {
            self.presumed_dead
                .fetch_add(abandoned as u64, Ordering::Relaxed);
        }
    }

    pub fn presumed_dead_count(&self) -> u64 {
        self.presumed_dead.load(Ordering::Relaxed)
    }
}
