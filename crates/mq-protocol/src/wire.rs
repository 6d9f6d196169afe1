//! Frozen payload layout.
//!
//! Field order within a payload (all integers little-endian):
//!
//! | field           | encoding                    |
//! |-----------------|-----------------------------|
//! | kind            | u8                          |
//! | message_id      | 16 bytes                    |
//! | peer_id         | 16 bytes                    |
//! | queue_name      | u16 length + UTF-8          |
//! | label           | u32 length + UTF-8          |
//! | body            | u32 length + UTF-8          |
//! | expire_seconds  | u32                         |
//! | enqueued_at     | i64 unix-ms                 |
//! | is_query        | u8                          |
//! | is_reply        | u8                          |
//! | in_reply_to     | 16 bytes, all-zero = absent |
//!
//! Encoding the same command twice yields identical bytes.

use crate::command::{Command, CommandKind};
use crate::message::Message;
use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;
use uuid::Uuid;

/// Fatal wire-level faults.  Any of these desynchronizes the stream, so the
/// session they occur on is closed.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("payload CRC mismatch (declared {declared:#010x}, computed {computed:#010x})")]
    CrcMismatch { declared: u32, computed: u32 },
    #[error("unknown command kind {0}")]
    UnknownCommand(u8),
    #[error("payload truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{field} is not valid UTF-8")]
    InvalidString { field: &'static str },
    #[error("{field} exceeds its wire length limit")]
    FieldTooLong { field: &'static str },
}

/// Serialize `command` into `dst`.
pub fn encode_command(command: &Command, dst: &mut BytesMut) -> Result<(), WireError> {
    let m = &command.message;
    if m.queue_name.len() > usize::from(u16::MAX) {
        return Err(WireError::FieldTooLong { field: "queue_name" });
    }

    dst.put_u8(command.kind.as_u8());
    dst.put_slice(m.message_id.as_bytes());
    dst.put_slice(m.peer_id.as_bytes());
    dst.put_u16_le(m.queue_name.len() as u16);
    dst.put_slice(m.queue_name.as_bytes());
    dst.put_u32_le(m.label.len() as u32);
    dst.put_slice(m.label.as_bytes());
    dst.put_u32_le(m.body.len() as u32);
    dst.put_slice(m.body.as_bytes());
    dst.put_u32_le(m.expire_seconds);
    dst.put_i64_le(m.enqueued_at);
    dst.put_u8(u8::from(m.is_query));
    dst.put_u8(u8::from(m.is_reply));
    dst.put_slice(m.in_reply_to.unwrap_or_else(Uuid::nil).as_bytes());
    Ok(())
}

/// Deserialize one command from a complete payload.  Trailing bytes after
/// the record are tolerated (append-only layout).
pub fn decode_command(mut payload: &[u8]) -> Result<Command, WireError> {
    let kind_byte = take_u8(&mut payload, "kind")?;
    let kind = CommandKind::try_from(kind_byte).map_err(WireError::UnknownCommand)?;

    let message_id = take_uuid(&mut payload, "message_id")?;
    let peer_id = take_uuid(&mut payload, "peer_id")?;

    let queue_len = usize::from(take_u16_le(&mut payload, "queue_name length")?);
    let queue_name = take_string(&mut payload, queue_len, "queue_name")?;
    let label_len = take_u32_le(&mut payload, "label length")? as usize;
    let label = take_string(&mut payload, label_len, "label")?;
    let body_len = take_u32_le(&mut payload, "body length")? as usize;
    let body = take_string(&mut payload, body_len, "body")?;

    let expire_seconds = take_u32_le(&mut payload, "expire_seconds")?;
    let enqueued_at = take_i64_le(&mut payload, "enqueued_at")?;
    let is_query = take_u8(&mut payload, "is_query")? != 0;
    let is_reply = take_u8(&mut payload, "is_reply")? != 0;
    let in_reply_to = take_uuid(&mut payload, "in_reply_to")?;

    Ok(Command {
        kind,
        message: Message {
            message_id,
            peer_id,
            queue_name,
            label,
            body,
            expire_seconds,
            enqueued_at,
            is_query,
            is_reply,
            in_reply_to: if in_reply_to.is_nil() {
                None
            } else {
                Some(in_reply_to)
            },
        },
    })
}

fn take_u8(src: &mut &[u8], field: &'static str) -> Result<u8, WireError> {
    if src.remaining() < 1 {
        return Err(WireError::Truncated(field));
    }
    Ok(src.get_u8())
}

fn take_u16_le(src: &mut &[u8], field: &'static str) -> Result<u16, WireError> {
    if src.remaining() < 2 {
        return Err(WireError::Truncated(field));
    }
    Ok(src.get_u16_le())
}

fn take_u32_le(src: &mut &[u8], field: &'static str) -> Result<u32, WireError> {
    if src.remaining() < 4 {
        return Err(WireError::Truncated(field));
    }
    Ok(src.get_u32_le())
}

fn take_i64_le(src: &mut &[u8], field: &'static str) -> Result<i64, WireError> {
    if src.remaining() < 8 {
        return Err(WireError::Truncated(field));
    }
    Ok(src.get_i64_le())
}

fn take_uuid(src: &mut &[u8], field: &'static str) -> Result<Uuid, WireError> {
    if src.remaining() < 16 {
        return Err(WireError::Truncated(field));
    }
    let mut raw = [0u8; 16];
    src.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

fn take_string(src: &mut &[u8], len: usize, field: &'static str) -> Result<String, WireError> {
    if src.remaining() < len {
        return Err(WireError::Truncated(field));
    }
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| WireError::InvalidString { field })
}
