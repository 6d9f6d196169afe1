// mq-protocol: broker wire protocol types, payload layout, and frame codec.
//
// Every frame on the wire is `[u32 LE length][u32 LE CRC-32][payload]` where
// the CRC covers the payload only.  The payload is a self-describing binary
// encoding of one `Command`.  The layout is frozen; see `wire` for the
// field-by-field byte order.

pub mod codec;
pub mod command;
pub mod message;
pub mod wire;

pub use codec::FrameCodec;
pub use command::{Command, CommandKind};
pub use message::Message;
pub use wire::WireError;

/// Default broker listen port.  Protocol-compatible only when both ends agree.
pub const DEFAULT_PORT: u16 = 45784;

/// Hard ceiling on a single frame's payload.  A frame declaring more than
/// this is treated as stream desynchronization and ends the session.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// How long a sender waits for the `CommandAck` of a dispatched command
/// before presuming the peer dead for that command.
pub const ACK_TIMEOUT_MS: u64 = 15_000;

/// Client supervisor tick: stale-ack reaping and reconnect attempts.
pub const RECONNECT_INTERVAL_MS: u64 = 1_000;

/// Default wait for a query's correlated reply.
pub const QUERY_TIMEOUT_MS: u64 = 60_000;
