//! API frame types exchanged with the radio coordinator.
//!
//! The frame type is the first byte of every link payload and indicates
//! what kind of data follows.

/// API frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApiFrameType {
    // Host to radio
    /// Local command addressed to the coordinator radio itself.
    LocalCommand = 0x08,
    /// Transmit with explicit endpoint/cluster/profile addressing.
    ExplicitTx = 0x11,

    // Radio to host
    /// Answer to a local command.
    LocalResponse = 0x88,
    /// Radio state change (joined, coordinator started, ...).
    ModemStatus = 0x8A,
    /// Delivery report for an explicit transmit.
    TxStatus = 0x8B,
    /// Received frame with explicit addressing.
    ExplicitRx = 0x91,
}

impl ApiFrameType {
    /// Attempts to parse a frame type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x08 => Some(Self::LocalCommand),
            0x11 => Some(Self::ExplicitTx),
            0x88 => Some(Self::LocalResponse),
            0x8A => Some(Self::ModemStatus),
            0x8B => Some(Self::TxStatus),
            0x91 => Some(Self::ExplicitRx),
            _ => None,
        }
    }

    /// Returns true for frames produced by the radio.
    #[must_use]
    pub const fn is_inbound(&self) -> bool {
        (*self as u8) >= 0x80
    }
}

impl From<ApiFrameType> for u8 {
    fn from(kind: ApiFrameType) -> Self {
        kind as Self
    }
}
