//! Length-delimited frame codec with CRC integrity.
//!
//! `[u32 LE payload length][u32 LE CRC-32 of payload][payload]`
//!
//! The CRC uses the IEEE polynomial (CRC-32/ISO-HDLC).  A CRC mismatch or an
//! oversize declared length means the stream is desynchronized: the decoder
//! returns an error and the session must be torn down.

use crate::command::Command;
use crate::wire::{self, WireError};
use crate::MAX_FRAME_BYTES;
use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_BYTES: usize = 8;

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum of a frame payload, as carried in the frame header.
pub fn payload_crc(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

/// Codec for one peer's byte stream.  Stateless apart from the configured
/// frame ceiling; the rolling receive buffer lives in `Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        FrameCodec {
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> FrameCodec {
        FrameCodec { max_frame_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Command;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, WireError> {
        if src.len() < HEADER_BYTES {
            return Ok(None);
        }

        let mut header = [0u8; 4];
        header.copy_from_slice(&src[0..4]);
        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        if src.len() < HEADER_BYTES + len {
            src.reserve(HEADER_BYTES + len - src.len());
            return Ok(None);
        }

        header.copy_from_slice(&src[4..8]);
        let declared = u32::from_le_bytes(header);

        let frame = src.split_to(HEADER_BYTES + len);
        let payload = &frame[HEADER_BYTES..];
        let computed = CRC32.checksum(payload);
        if computed != declared {
            return Err(WireError::CrcMismatch { declared, computed });
        }

        wire::decode_command(payload).map(Some)
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), WireError> {
        let mut payload = BytesMut::new();
        wire::encode_command(&command, &mut payload)?;
        if payload.len() > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_bytes,
            });
        }

        dst.reserve(HEADER_BYTES + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_u32_le(CRC32.checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}
