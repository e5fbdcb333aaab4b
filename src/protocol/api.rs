//! API frames carried inside link frames.
//!
//! Explicit frames layout (after the type byte):
//! ```text
//! ExplicitTx: [frame_id:1] [addr64:8LE] [addr16:2LE] [src_ep:1] [dst_ep:1]
//!             [cluster:2LE] [profile:2LE] [radius:1] [options:1] [payload...]
//! ExplicitRx: [addr64:8LE] [addr16:2LE] [src_ep:1] [dst_ep:1]
//!             [cluster:2LE] [profile:2LE] [rx_options:1] [payload...]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::address::{NetworkAddress16, NetworkAddress64};
use crate::protocol::packet::ApiFrameType;
use crate::protocol::reader::Reader;

/// Local command reading the coordinator's 64-bit address.
pub const LOCAL_READ_ADDRESS64: [u8; 2] = *b"EU";

/// Local command reading the coordinator's 16-bit address.
pub const LOCAL_READ_ADDRESS16: [u8; 2] = *b"MY";

/// Local command opening the coordinator itself for joins; one byte of seconds.
pub const LOCAL_PERMIT_JOIN: [u8; 2] = *b"NJ";

/// Addressing shared by transmitted and received explicit frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitFrame {
    /// Frame id used to correlate the delivery report (transmit only).
    pub frame_id: u8,
    /// Remote 64-bit address.
    pub addr64: NetworkAddress64,
    /// Remote 16-bit address.
    pub addr16: NetworkAddress16,
    /// Source endpoint.
    pub source_endpoint: u8,
    /// Destination endpoint.
    pub destination_endpoint: u8,
    /// Cluster id.
    pub cluster_id: u16,
    /// Profile id.
    pub profile_id: u16,
    /// Broadcast radius (transmit) ; unused on receive.
    pub radius: u8,
    /// Transmit or receive options.
    pub options: u8,
    /// Management or application payload.
    pub payload: Bytes,
}

/// Delivery report for a transmitted explicit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    /// Correlates with `ExplicitFrame::frame_id`.
    pub frame_id: u8,
    /// Short address the frame was delivered to.
    pub addr16: NetworkAddress16,
    /// Number of MAC retries.
    pub retries: u8,
    /// Zero on success.
    pub delivery_status: u8,
    /// Route discovery information.
    pub discovery_status: u8,
}

/// Command to or answer from the coordinator radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFrame {
    /// Frame id used to correlate request and answer.
    pub frame_id: u8,
    /// Two-character command.
    pub command: [u8; 2],
    /// Status (answers only; zero is success).
    pub status: u8,
    /// Parameter (request) or returned data (answer).
    pub data: Bytes,
}

/// A decoded API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    LocalCommand(LocalFrame),
    ExplicitTx(ExplicitFrame),
    LocalResponse(LocalFrame),
    ModemStatus(u8),
    TxStatus(TxStatus),
    ExplicitRx(ExplicitFrame),
}

impl ApiFrame {
    /// Returns the frame type.
    #[must_use]
    pub const fn kind(&self) -> ApiFrameType {
        match self {
            Self::LocalCommand(_) => ApiFrameType::LocalCommand,
            Self::ExplicitTx(_) => ApiFrameType::ExplicitTx,
            Self::LocalResponse(_) => ApiFrameType::LocalResponse,
            Self::ModemStatus(_) => ApiFrameType::ModemStatus,
            Self::TxStatus(_) => ApiFrameType::TxStatus,
            Self::ExplicitRx(_) => ApiFrameType::ExplicitRx,
        }
    }

    /// Encodes the frame into a link payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(self.kind().into());
        match self {
            Self::LocalCommand(local) => {
                buf.put_u8(local.frame_id);
                buf.put_slice(&local.command);
                buf.put_slice(&local.data);
            }
            Self::LocalResponse(local) => {
                buf.put_u8(local.frame_id);
                buf.put_slice(&local.command);
                buf.put_u8(local.status);
                buf.put_slice(&local.data);
            }
            Self::ExplicitTx(frame) => {
                buf.put_u8(frame.frame_id);
                put_explicit_addressing(&mut buf, frame);
                buf.put_u8(frame.radius);
                buf.put_u8(frame.options);
                buf.put_slice(&frame.payload);
            }
            Self::ExplicitRx(frame) => {
                put_explicit_addressing(&mut buf, frame);
                buf.put_u8(frame.options);
                buf.put_slice(&frame.payload);
            }
            Self::ModemStatus(status) => buf.put_u8(*status),
            Self::TxStatus(status) => {
                buf.put_u8(status.frame_id);
                buf.put_slice(&status.addr16.to_wire());
                buf.put_u8(status.retries);
                buf.put_u8(status.delivery_status);
                buf.put_u8(status.discovery_status);
            }
        }
        buf.freeze()
    }

    /// Decodes a link payload.
    ///
    /// An unknown frame type is reported with the raw bytes attached.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut reader = Reader::new(data, "api frame");
        let kind_byte = reader.u8()?;
        let Some(kind) = ApiFrameType::from_byte(kind_byte) else {
            return Err(FrameError::UnknownKind {
                kind: kind_byte,
                raw: Bytes::copy_from_slice(data),
            });
        };

        let frame = match kind {
            ApiFrameType::LocalCommand => {
                let frame_id = reader.u8()?;
                let command = read_command(&mut reader)?;
                Self::LocalCommand(LocalFrame {
                    frame_id,
                    command,
                    status: 0,
                    data: Bytes::copy_from_slice(reader.rest()),
                })
            }
            ApiFrameType::LocalResponse => {
                let frame_id = reader.u8()?;
                let command = read_command(&mut reader)?;
                let status = reader.u8()?;
                Self::LocalResponse(LocalFrame {
                    frame_id,
                    command,
                    status,
                    data: Bytes::copy_from_slice(reader.rest()),
                })
            }
            ApiFrameType::ExplicitTx => {
                let frame_id = reader.u8()?;
                let mut frame = read_explicit_addressing(&mut reader)?;
                frame.frame_id = frame_id;
                frame.radius = reader.u8()?;
                frame.options = reader.u8()?;
                frame.payload = Bytes::copy_from_slice(reader.rest());
                Self::ExplicitTx(frame)
            }
            ApiFrameType::ExplicitRx => {
                let mut frame = read_explicit_addressing(&mut reader)?;
                frame.options = reader.u8()?;
                frame.payload = Bytes::copy_from_slice(reader.rest());
                Self::ExplicitRx(frame)
            }
            ApiFrameType::ModemStatus => Self::ModemStatus(reader.u8()?),
            ApiFrameType::TxStatus => Self::TxStatus(TxStatus {
                frame_id: reader.u8()?,
                addr16: reader.addr16()?,
                retries: reader.u8()?,
                delivery_status: reader.u8()?,
                discovery_status: reader.u8()?,
            }),
        };
        Ok(frame)
    }
}

fn put_explicit_addressing(buf: &mut BytesMut, frame: &ExplicitFrame) {
    buf.put_slice(&frame.addr64.to_wire());
    buf.put_slice(&frame.addr16.to_wire());
    buf.put_u8(frame.source_endpoint);
    buf.put_u8(frame.destination_endpoint);
    buf.put_u16_le(frame.cluster_id);
    buf.put_u16_le(frame.profile_id);
}

fn read_explicit_addressing(reader: &mut Reader<'_>) -> Result<ExplicitFrame, FrameError> {
    Ok(ExplicitFrame {
        frame_id: 0,
        addr64: reader.addr64()?,
        addr16: reader.addr16()?,
        source_endpoint: reader.u8()?,
        destination_endpoint: reader.u8()?,
        cluster_id: reader.u16()?,
        profile_id: reader.u16()?,
        radius: 0,
        options: 0,
        payload: Bytes::new(),
    })
}

fn read_command(reader: &mut Reader<'_>) -> Result<[u8; 2], FrameError> {
    let bytes = reader.take(2)?;
    Ok([bytes[0], bytes[1]])
}
