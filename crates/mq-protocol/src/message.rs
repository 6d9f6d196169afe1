use uuid::Uuid;

/// A single broker message.
///
/// The same record rides inside every command envelope; control commands
/// (subscribe, ack, ...) carry it with an empty label and body and use only
/// the identifying fields.
///
/// Invariants:
/// - `message_id` is unique per origin.
/// - `is_query` and `is_reply` are never both set.
/// - `is_reply` implies `in_reply_to` is `Some`.
/// - `expire_seconds == 0` means the message never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: Uuid,
    /// Originating peer.
    pub peer_id: Uuid,
    pub queue_name: String,
    pub label: String,
    pub body: String,
    pub expire_seconds: u32,
    /// Unix milliseconds at enqueue time, stamped by the origin.
    pub enqueued_at: i64,
    pub is_query: bool,
    pub is_reply: bool,
    pub in_reply_to: Option<Uuid>,
}

impl Message {
    /// A plain notification: fanned out to every subscriber of the queue.
    pub fn notification(
        peer_id: Uuid,
        queue_name: impl Into<String>,
        label: impl Into<String>,
        body: impl Into<String>,
        expire_seconds: u32,
    ) -> Message {
        Message {
            message_id: Uuid::new_v4(),
            peer_id,
            queue_name: queue_name.into(),
            label: label.into(),
            body: body.into(),
            expire_seconds,
            enqueued_at: now_ms(),
            is_query: false,
            is_reply: false,
            in_reply_to: None,
        }
    }

    /// A query: fanned out like a notification, with the reply routed back
    /// to this message's origin only.
    pub fn query(
        peer_id: Uuid,
        queue_name: impl Into<String>,
        label: impl Into<String>,
        body: impl Into<String>,
        expire_seconds: u32,
    ) -> Message {
        Message {
            is_query: true,
            ..Message::notification(peer_id, queue_name, label, body, expire_seconds)
        }
    }

    /// The reply to `query`, correlated through `in_reply_to`.
    pub fn reply_to(
        query: &Message,
        peer_id: Uuid,
        label: impl Into<String>,
        body: impl Into<String>,
    ) -> Message {
        Message {
            message_id: Uuid::new_v4(),
            peer_id,
            queue_name: query.queue_name.clone(),
            label: label.into(),
            body: body.into(),
            expire_seconds: 0,
            enqueued_at: now_ms(),
            is_query: false,
            is_reply: true,
            in_reply_to: Some(query.message_id),
        }
    }

    /// A control record: identifying fields only, empty label and body.
    pub fn control(peer_id: Uuid, queue_name: impl Into<String>) -> Message {
        Message::notification(peer_id, queue_name, "", "", 0)
    }

    /// Whether the message is past its expiry deadline at `now_ms`.
    /// Never true for `expire_seconds == 0`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expire_seconds > 0
            && self.enqueued_at + i64::from(self.expire_seconds) * 1000 < now_ms
    }
}

/// Current wall clock in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
