use crate::message::Message;
use std::convert::TryFrom;
use std::fmt;
use uuid::Uuid;

/// Discriminant byte for every command on the wire.
///
/// The vocabulary is append-only: new kinds may be added, and receivers must
/// treat an unknown discriminant as fatal for the session.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[repr(u8)]
pub enum CommandKind {
    Hello = 1,
    Enqueue = 2,
    Subscribe = 3,
    Unsubscribe = 4,
    Clear = 5,
    ProcessMessage = 6,
    CommandAck = 7,
}

impl CommandKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(CommandKind::Hello),
            2 => Ok(CommandKind::Enqueue),
            3 => Ok(CommandKind::Subscribe),
            4 => Ok(CommandKind::Unsubscribe),
            5 => Ok(CommandKind::Clear),
            6 => Ok(CommandKind::ProcessMessage),
            7 => Ok(CommandKind::CommandAck),
            other => Err(other),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CommandKind::Hello => "hello",
            CommandKind::Enqueue => "enqueue",
            CommandKind::Subscribe => "subscribe",
            CommandKind::Unsubscribe => "unsubscribe",
            CommandKind::Clear => "clear",
            CommandKind::ProcessMessage => "process_message",
            CommandKind::CommandAck => "command_ack",
        };
        write!(f, "{name}")
    }
}

/// One framed unit on the wire: a kind tag plus the full message record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub message: Message,
}

impl Command {
    pub fn new(kind: CommandKind, message: Message) -> Command {
        Command { kind, message }
    }

    /// Handshake announcement.  The server echoes this frame back verbatim
    /// as the handshake ack.
    pub fn hello(peer_id: Uuid) -> Command {
        Command::new(CommandKind::Hello, Message::control(peer_id, ""))
    }

    pub fn enqueue(message: Message) -> Command {
        Command::new(CommandKind::Enqueue, message)
    }

    pub fn subscribe(peer_id: Uuid, queue_name: impl Into<String>) -> Command {
        Command::new(CommandKind::Subscribe, Message::control(peer_id, queue_name))
    }

    pub fn unsubscribe(peer_id: Uuid, queue_name: impl Into<String>) -> Command {
        Command::new(
            CommandKind::Unsubscribe,
            Message::control(peer_id, queue_name),
        )
    }

    pub fn clear(peer_id: Uuid, queue_name: impl Into<String>) -> Command {
        Command::new(CommandKind::Clear, Message::control(peer_id, queue_name))
    }

    /// Delivery of `message` to one subscriber.
    pub fn process_message(message: Message) -> Command {
        Command::new(CommandKind::ProcessMessage, message)
    }

    /// Receipt acknowledgment for `of`, echoing its `message_id` and
    /// `queue_name` so the sender can correlate the slot (and, for
    /// deliveries, the owning queue).
    pub fn ack_of(of: &Message, peer_id: Uuid) -> Command {
        let mut ack = Message::control(peer_id, of.queue_name.clone());
        ack.message_id = of.message_id;
        Command::new(CommandKind::CommandAck, ack)
    }
}
