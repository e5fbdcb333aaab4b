//! Error types for the meshgate library.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::NetworkAddress64;

/// The main error type for meshgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Negative status or unexpected answer from a peer.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// An exchange was abandoned after exhausting its retries.
    #[error("exchange timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// No node with this address is known.
    #[error("unknown node {addr64}")]
    UnknownNode { addr64: NetworkAddress64 },

    /// The node has no property with this name.
    #[error("node {addr64} has no property {property:?}")]
    UnknownProperty {
        addr64: NetworkAddress64,
        property: String,
    },

    /// The same request is already in flight for this node.
    #[error("a request for {addr64} is already pending")]
    Busy { addr64: NetworkAddress64 },

    /// A value could not be written to a property.
    #[error("invalid value for {property:?}: {reason}")]
    InvalidValue { property: String, reason: String },

    /// Snapshot could not be serialized or parsed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Channel send error.
    #[error("channel send error")]
    ChannelSend,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

/// Frame-specific errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer too short for the structure being decoded.
    #[error("{what} too short: need {need} bytes, got {got}")]
    TooShort {
        what: &'static str,
        need: usize,
        got: usize,
    },

    /// Frame payload exceeds maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Link checksum mismatch.
    #[error("bad checksum: expected 0x{expected:02x}, got 0x{got:02x}")]
    Checksum { expected: u8, got: u8 },

    /// Unrecognized API frame type.
    #[error("unknown frame type 0x{kind:02x} ({} bytes)", raw.len())]
    UnknownKind { kind: u8, raw: Bytes },

    /// Unrecognized management cluster.
    #[error("unknown management kind 0x{cluster:04x} ({} bytes)", raw.len())]
    UnknownManagementKind { cluster: u16, raw: Bytes },

    /// Unsupported attribute data type.
    #[error("unsupported data type 0x{0:02x}")]
    UnknownDataType(u8),

    /// Structurally invalid content.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl FrameError {
    pub(crate) fn need(what: &'static str, need: usize, got: usize) -> std::result::Result<(), Self> {
        if got < need {
            Err(Self::TooShort { what, need, got })
        } else {
            Ok(())
        }
    }
}

/// Result type alias for meshgate operations.
pub type Result<T> = std::result::Result<T, Error>;
