//! A hand-driven framed connection for protocol-level tests.
//!
//! Unlike the real client, this connection sends exactly what it is told —
//! including malformed frames — and never acks on its own, so tests can
//! observe the broker's fault handling and pacing directly.

use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use mq_protocol::codec::payload_crc;
use mq_protocol::{wire, Command, CommandKind, FrameCodec, Message, WireError};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;
use uuid::Uuid;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RawConnection {
    framed: Framed<TcpStream, FrameCodec>,
}

impl RawConnection {
    pub async fn connect(addr: SocketAddr) -> RawConnection {
        let stream = TcpStream::connect(addr).await.expect("connect");
        RawConnection {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    /// Perform the hello handshake and return the hello's `message_id`.
    pub async fn hello(&mut self, peer_id: Uuid) -> Uuid {
        let hello = Command::hello(peer_id);
        let hello_id = hello.message.message_id;
        self.send(hello).await;
        let echo = self.expect_command().await;
        assert_eq!(echo.kind, CommandKind::Hello, "expected hello echo");
        assert_eq!(echo.message.message_id, hello_id, "echo keeps the id");
        hello_id
    }

    pub async fn send(&mut self, cmd: Command) {
        self.framed.send(cmd).await.expect("send frame");
    }

    /// Ack a delivery the way a well-behaved subscriber would.
    pub async fn ack(&mut self, of: &Message, peer_id: Uuid) {
        self.send(Command::ack_of(of, peer_id)).await;
    }

    /// Next decoded frame, or `None` if the broker closed the connection.
    pub async fn recv(&mut self) -> Option<Result<Command, WireError>> {
        timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("recv timeout")
    }

    /// Next frame, asserting the session is still healthy.
    pub async fn expect_command(&mut self) -> Command {
        self.recv()
            .await
            .expect("connection closed by broker")
            .expect("frame decode")
    }

    /// Assert the broker closed this session (EOF within the timeout).
    pub async fn expect_closed(&mut self) {
        loop {
            match self.recv().await {
                None => return,
                Some(Err(_)) => return,
                Some(Ok(cmd)) => panic!("expected close, got {:?}", cmd.kind),
            }
        }
    }

    /// Write a frame whose payload carries an arbitrary kind byte; the frame
    /// itself (length + CRC) is well-formed.
    pub async fn send_kind_byte(&mut self, kind_byte: u8, peer_id: Uuid) {
        let mut payload = BytesMut::new();
        wire::encode_command(&Command::subscribe(peer_id, "t1"), &mut payload)
            .expect("encode payload");
        payload[0] = kind_byte;
        self.send_raw_frame(&payload, payload_crc(&payload)).await;
    }

    /// Write a well-formed frame with a deliberately wrong CRC.
    pub async fn send_corrupt_crc(&mut self, peer_id: Uuid) {
        let mut payload = BytesMut::new();
        wire::encode_command(&Command::subscribe(peer_id, "t1"), &mut payload)
            .expect("encode payload");
        let wrong = payload_crc(&payload) ^ 0xDEAD_BEEF;
        self.send_raw_frame(&payload, wrong).await;
    }

    /// Write a header that declares an oversize payload.
    pub async fn send_oversize_header(&mut self, declared_len: u32) {
        let mut frame = BytesMut::new();
        frame.put_u32_le(declared_len);
        frame.put_u32_le(0);
        self.write_bytes(&frame).await;
    }

    async fn send_raw_frame(&mut self, payload: &[u8], crc: u32) {
        let mut frame = BytesMut::with_capacity(8 + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_u32_le(crc);
        frame.put_slice(payload);
        self.write_bytes(&frame).await;
    }

    async fn write_bytes(&mut self, bytes: &[u8]) {
        // Flush any encoder-buffered frames before touching the socket.
        self.framed.flush().await.expect("flush");
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("raw write");
        stream.flush().await.expect("raw flush");
    }
}
