//! Umbrella crate for the in-memory message broker suite.
//!
//! Re-exports the client API and protocol types; the broker itself lives in
//! `services/broker`.  The workspace-level integration suites under
//! `tests/integration/` drive real sockets end to end.

pub use mq_client::{
    ClientConfig, ClientError, EventHandler, Message, MqClient, NoopEvents, QueryReply,
};
pub use mq_protocol::{Command, CommandKind, FrameCodec, DEFAULT_PORT};
