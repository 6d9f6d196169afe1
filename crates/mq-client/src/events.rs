//! Client event surface.
//!
//! Handlers fire on the client's receive task, so they must not block for
//! longer than one message budget — a sleeping `message_received` delays the
//! delivery ack and therefore the next delivery on that queue.  A panicking
//! handler is caught and surfaced through `exception_occurred`; dispatch
//! continues.

use crate::client::ClientError;
use mq_protocol::Message;

/// The payload a `query_received` handler answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub label: String,
    pub body: String,
}

impl QueryReply {
    pub fn new(label: impl Into<String>, body: impl Into<String>) -> QueryReply {
        QueryReply {
            label: label.into(),
            body: body.into(),
        }
    }
}

/// Callback points for broker traffic and connection lifecycle.
///
/// Every method has a no-op default, so an implementation overrides only
/// what it cares about.
pub trait EventHandler: Send + Sync {
    /// A notification arrived on a subscribed queue.
    fn message_received(&self, _message: &Message) {}

    /// A query arrived on a subscribed queue.  Returning `Some` sends the
    /// reply back to the query's originator.
    fn query_received(&self, _query: &Message) -> Option<QueryReply> {
        None
    }

    /// A reply arrived; `has_open_query` tells whether a waiter was still
    /// registered for it.
    fn query_reply_received(&self, _reply: &Message, _has_open_query: bool) {}

    /// Fired on every successful connection attempt, including the first.
    fn connected(&self) {}

    /// Fired on every teardown, orderly or not.
    fn disconnected(&self) {}

    fn enqueued(&self, _message: &Message) {}

    fn queue_subscribed(&self, _queue: &str) {}

    fn queue_unsubscribed(&self, _queue: &str) {}

    fn queue_cleared(&self, _queue: &str) {}

    fn exception_occurred(&self, _error: &ClientError) {}
}

/// Ignores every event.
pub struct NoopEvents;

impl EventHandler for NoopEvents {}
