//! Protocol definitions for coordinator communication.
//!
//! This module contains the low-level protocol types including:
//! - Link framing and API frames
//! - Management (device discovery/binding) frames
//! - Application (attribute) frames
//! - Address types and the wire byte-order transform

pub mod address;
pub mod api;
pub mod cluster;
pub mod frame;
pub mod inbound;
pub mod packet;
pub(crate) mod reader;
pub mod zcl;
pub mod zdo;

pub use address::{NetworkAddress16, NetworkAddress64, hex_id, reverse_octets};
pub use api::{ApiFrame, ExplicitFrame, LocalFrame, TxStatus};
pub use frame::{FRAME_HEADER, FrameDecoder, MAX_FRAME_SIZE, encode as encode_frame};
pub use inbound::{InboundFrame, Source};
pub use packet::ApiFrameType;
pub use zcl::{
    AttributeRecord, AttributeValue, DataType, HA_PROFILE, ReadRecord, ReportingConfig,
    SequenceCounter, TypedValue, ZclCommand, ZclFrame, ZclHeader,
};
pub use zdo::{BindDestination, BindTarget, ManagementFrame, ZdoMessage};
