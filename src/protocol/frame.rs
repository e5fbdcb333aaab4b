//! Host-link framing between the gateway and the radio coordinator.
//!
//! The wire format is:
//! ```text
//! ┌──────────┬──────────────┬─────────────────┬──────────┐
//! │  0x7e    │  size (LE)   │    payload      │ checksum │
//! │  1 byte  │   2 bytes    │   size bytes    │  1 byte  │
//! └──────────┴──────────────┴─────────────────┴──────────┘
//! ```
//!
//! The checksum is `0xff - (sum(payload) & 0xff)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Frame start byte.
pub const FRAME_HEADER: u8 = 0x7e;

/// Maximum frame payload size.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Header plus the 2-byte length.
pub const MIN_FRAME_SIZE: usize = 3;

/// Computes the link checksum of a payload.
#[must_use]
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xff - sum
}

/// Wraps a payload in a link frame.
///
/// # Panics
///
/// Panics if the payload exceeds `MAX_FRAME_SIZE`.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    assert!(
        payload.len() <= MAX_FRAME_SIZE,
        "payload exceeds maximum frame size"
    );

    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len() + 1);
    buf.put_u8(FRAME_HEADER);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    buf.put_u8(checksum(payload));
    buf.freeze()
}

/// Link frame decoder that handles partial data and line noise.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// An empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Appends raw bytes read from the link.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pops the next whole frame, or `Ok(None)` until one has arrived.
    ///
    /// Bytes before a start byte are discarded. A frame with a bad checksum or
    /// an impossible length is consumed and reported as an error so the
    /// caller can keep decoding.
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        let skip = self
            .buffer
            .iter()
            .position(|&b| b == FRAME_HEADER)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            tracing::trace!("skipping {} bytes of line noise", skip);
            self.buffer.advance(skip);
        }

        if self.buffer.len() < MIN_FRAME_SIZE {
            return Ok(None);
        }

        let length = u16::from_le_bytes([self.buffer[1], self.buffer[2]]) as usize;
        if length > MAX_FRAME_SIZE {
            // Not a real frame; drop the start byte and resync
            self.buffer.advance(1);
            return Err(FrameError::TooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let total_frame_size = MIN_FRAME_SIZE + length + 1;
        if self.buffer.len() < total_frame_size {
            return Ok(None);
        }

        self.buffer.advance(MIN_FRAME_SIZE);
        let payload = self.buffer.split_to(length).freeze();
        let got = self.buffer.get_u8();
        let expected = checksum(&payload);
        if got != expected {
            return Err(FrameError::Checksum { expected, got });
        }

        Ok(Some(payload))
    }

    /// Bytes waiting for the rest of their frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops everything buffered, e.g. after the link was reopened.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
