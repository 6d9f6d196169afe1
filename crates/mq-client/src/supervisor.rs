//! Client health loop.
//!
//! One task per client, started at connect and stopped by `disconnect`.
//! Each tick it reaps stale ack slots and, if the session is down, makes
//! exactly one reconnect attempt.  A successful reconnect replays every
//! remembered subscription and fires the `connected` event (that happens
//! inside `establish`); failures wait for the next tick.

use crate::client::ClientInner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub(crate) async fn supervisor_loop(inner: Arc<ClientInner>) {
    let mut ticker = tokio::time::interval(inner.config.reconnect_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        inner.acks.reap(inner.config.ack_timeout());

        let down = inner.conn.lock().await.is_none();
        if down {
            match inner.establish().await {
                Ok(()) => info!(addr = %inner.addr, "reconnected"),
                Err(e) => debug!(addr = %inner.addr, error = %e, "reconnect attempt failed"),
            }
        }
    }
    debug!(peer_id = %inner.peer_id, "supervisor stopped");
}
