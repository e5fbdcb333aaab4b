//! Application frames (attribute read/write/report/configure).
//!
//! ```text
//! [frame_control:1] [manufacturer:2LE if bit 2] [seq:1] [command:1] [payload...]
//! ```
//! Frame control bits: 0-1 frame type (0 = global, 1 = cluster specific),
//! 2 manufacturer specific, 3 direction (1 = server to client),
//! 4 disable default response.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::protocol::address::NetworkAddress64;
use crate::protocol::reader::Reader;

/// Home-automation application profile.
pub const HA_PROFILE: u16 = 0x0104;

/// Global command ids.
pub mod global {
    pub const READ_ATTRIBUTES: u8 = 0x00;
    pub const READ_ATTRIBUTES_RESPONSE: u8 = 0x01;
    pub const WRITE_ATTRIBUTES: u8 = 0x02;
    pub const WRITE_ATTRIBUTES_RESPONSE: u8 = 0x04;
    pub const CONFIGURE_REPORTING: u8 = 0x06;
    pub const CONFIGURE_REPORTING_RESPONSE: u8 = 0x07;
    pub const REPORT_ATTRIBUTES: u8 = 0x0A;
    pub const DEFAULT_RESPONSE: u8 = 0x0B;
}

/// Application status codes.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
    pub const NOT_AUTHORIZED: u8 = 0x7E;
    pub const MALFORMED_COMMAND: u8 = 0x80;
    pub const UNSUPPORTED_CLUSTER_COMMAND: u8 = 0x81;
    pub const UNSUPPORTED_GENERAL_COMMAND: u8 = 0x82;
    pub const INVALID_FIELD: u8 = 0x85;
    pub const UNSUPPORTED_ATTRIBUTE: u8 = 0x86;
    pub const INVALID_VALUE: u8 = 0x87;
    pub const READ_ONLY: u8 = 0x88;
    pub const UNREPORTABLE_ATTRIBUTE: u8 = 0x8C;
    pub const INVALID_DATA_TYPE: u8 = 0x8D;
    pub const UNSUPPORTED_CLUSTER: u8 = 0xC3;
}

/// Counter producing sequence numbers 1..=255, skipping the reserved zero.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    /// Creates a counter whose first value is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Returns the next sequence number.
    pub fn next(&mut self) -> u8 {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        self.0
    }
}

/// Attribute wire data types.
///
/// Every type with a fixed width or a length prefix is listed; structured
/// types (arrays, sets, bags) are not, and stop attribute decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum DataType {
    NoData = 0x00,
    Data8 = 0x08,
    Data16 = 0x09,
    Data24 = 0x0A,
    Data32 = 0x0B,
    Data40 = 0x0C,
    Data48 = 0x0D,
    Data56 = 0x0E,
    Data64 = 0x0F,
    Bool = 0x10,
    Bitmap8 = 0x18,
    Bitmap16 = 0x19,
    Bitmap24 = 0x1A,
    Bitmap32 = 0x1B,
    Bitmap40 = 0x1C,
    Bitmap48 = 0x1D,
    Bitmap56 = 0x1E,
    Bitmap64 = 0x1F,
    Uint8 = 0x20,
    Uint16 = 0x21,
    Uint24 = 0x22,
    Uint32 = 0x23,
    Uint40 = 0x24,
    Uint48 = 0x25,
    Uint56 = 0x26,
    Uint64 = 0x27,
    Int8 = 0x28,
    Int16 = 0x29,
    Int24 = 0x2A,
    Int32 = 0x2B,
    Int40 = 0x2C,
    Int48 = 0x2D,
    Int56 = 0x2E,
    Int64 = 0x2F,
    Enum8 = 0x30,
    Enum16 = 0x31,
    Float16 = 0x38,
    Float32 = 0x39,
    Float64 = 0x3A,
    OctetString = 0x41,
    CharString = 0x42,
    LongOctetString = 0x43,
    LongCharString = 0x44,
    TimeOfDay = 0xE0,
    Date = 0xE1,
    UtcTime = 0xE2,
    ClusterId = 0xE8,
    AttributeId = 0xE9,
    BacnetOid = 0xEA,
    IeeeAddress = 0xF0,
    SecurityKey = 0xF1,
}

impl DataType {
    /// Parses a data type from a byte.
    pub const fn from_byte(byte: u8) -> Result<Self, FrameError> {
        Ok(match byte {
            0x00 => Self::NoData,
            0x08 => Self::Data8,
            0x09 => Self::Data16,
            0x0A => Self::Data24,
            0x0B => Self::Data32,
            0x0C => Self::Data40,
            0x0D => Self::Data48,
            0x0E => Self::Data56,
            0x0F => Self::Data64,
            0x10 => Self::Bool,
            0x18 => Self::Bitmap8,
            0x19 => Self::Bitmap16,
            0x1A => Self::Bitmap24,
            0x1B => Self::Bitmap32,
            0x1C => Self::Bitmap40,
            0x1D => Self::Bitmap48,
            0x1E => Self::Bitmap56,
            0x1F => Self::Bitmap64,
            0x20 => Self::Uint8,
            0x21 => Self::Uint16,
            0x22 => Self::Uint24,
            0x23 => Self::Uint32,
            0x24 => Self::Uint40,
            0x25 => Self::Uint48,
            0x26 => Self::Uint56,
            0x27 => Self::Uint64,
            0x28 => Self::Int8,
            0x29 => Self::Int16,
            0x2A => Self::Int24,
            0x2B => Self::Int32,
            0x2C => Self::Int40,
            0x2D => Self::Int48,
            0x2E => Self::Int56,
            0x2F => Self::Int64,
            0x30 => Self::Enum8,
            0x31 => Self::Enum16,
            0x38 => Self::Float16,
            0x39 => Self::Float32,
            0x3A => Self::Float64,
            0x41 => Self::OctetString,
            0x42 => Self::CharString,
            0x43 => Self::LongOctetString,
            0x44 => Self::LongCharString,
            0xE0 => Self::TimeOfDay,
            0xE1 => Self::Date,
            0xE2 => Self::UtcTime,
            0xE8 => Self::ClusterId,
            0xE9 => Self::AttributeId,
            0xEA => Self::BacnetOid,
            0xF0 => Self::IeeeAddress,
            0xF1 => Self::SecurityKey,
            other => return Err(FrameError::UnknownDataType(other)),
        })
    }

    /// Width in bytes of fixed-size types; zero for strings and no-data.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::NoData
            | Self::OctetString
            | Self::CharString
            | Self::LongOctetString
            | Self::LongCharString => 0,
            Self::Data8 | Self::Bool | Self::Bitmap8 | Self::Uint8 | Self::Int8 | Self::Enum8 => 1,
            Self::Data16
            | Self::Bitmap16
            | Self::Uint16
            | Self::Int16
            | Self::Enum16
            | Self::Float16
            | Self::ClusterId
            | Self::AttributeId => 2,
            Self::Data24 | Self::Bitmap24 | Self::Uint24 | Self::Int24 => 3,
            Self::Data32
            | Self::Bitmap32
            | Self::Uint32
            | Self::Int32
            | Self::Float32
            | Self::TimeOfDay
            | Self::Date
            | Self::UtcTime
            | Self::BacnetOid => 4,
            Self::Data40 | Self::Bitmap40 | Self::Uint40 | Self::Int40 => 5,
            Self::Data48 | Self::Bitmap48 | Self::Uint48 | Self::Int48 => 6,
            Self::Data56 | Self::Bitmap56 | Self::Uint56 | Self::Int56 => 7,
            Self::Data64
            | Self::Bitmap64
            | Self::Uint64
            | Self::Int64
            | Self::Float64
            | Self::IeeeAddress => 8,
            Self::SecurityKey => 16,
        }
    }

    /// Size of the length field in front of string types.
    #[must_use]
    pub const fn length_prefix(self) -> Option<usize> {
        match self {
            Self::OctetString | Self::CharString => Some(1),
            Self::LongOctetString | Self::LongCharString => Some(2),
            _ => None,
        }
    }

    /// Analog types carry a reportable-change field when configuring reports.
    #[must_use]
    pub const fn is_analog(self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Uint16
                | Self::Uint24
                | Self::Uint32
                | Self::Uint40
                | Self::Uint48
                | Self::Uint56
                | Self::Uint64
                | Self::Int8
                | Self::Int16
                | Self::Int24
                | Self::Int32
                | Self::Int40
                | Self::Int48
                | Self::Int56
                | Self::Int64
                | Self::Float16
                | Self::Float32
                | Self::Float64
                | Self::TimeOfDay
                | Self::Date
                | Self::UtcTime
        )
    }

    /// Two's-complement integer types.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int24
                | Self::Int32
                | Self::Int40
                | Self::Int48
                | Self::Int56
                | Self::Int64
        )
    }

    /// Types kept as opaque bytes: half and double floats, keys.
    const fn is_opaque(self) -> bool {
        matches!(self, Self::Float16 | Self::Float64 | Self::SecurityKey)
    }
}

impl From<DataType> for u8 {
    fn from(data_type: DataType) -> Self {
        data_type as Self
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    None,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    Text(String),
    Address(NetworkAddress64),
    /// Octet strings and types without a numeric reading.
    Raw(Bytes),
}

impl AttributeValue {
    /// Returns the value as an unsigned integer when it is integral.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Bool(b) => Some(u64::from(*b)),
            Self::Unsigned(v) => Some(*v),
            Self::Signed(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as a float when it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn bits(&self) -> u64 {
        match self {
            Self::Signed(v) => *v as u64,
            Self::Float(v) => *v as i64 as u64,
            other => other.as_u64().unwrap_or(0),
        }
    }
}

/// A value together with its wire type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub data_type: DataType,
    pub value: AttributeValue,
}

impl TypedValue {
    /// Creates a typed value.
    #[must_use]
    pub const fn new(data_type: DataType, value: AttributeValue) -> Self {
        Self { data_type, value }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.data_type.into());
        put_value(buf, self.data_type, &self.value);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        let data_type = DataType::from_byte(r.u8()?)?;
        let value = read_value(r, data_type)?;
        Ok(Self { data_type, value })
    }
}

#[allow(clippy::cast_precision_loss)]
fn put_value(buf: &mut BytesMut, data_type: DataType, value: &AttributeValue) {
    if let Some(prefix) = data_type.length_prefix() {
        let bytes = match value {
            AttributeValue::Text(text) => text.as_bytes(),
            AttributeValue::Raw(raw) => &raw[..],
            _ => &[],
        };
        // The all-ones length marks an invalid value.
        let max = if prefix == 1 { 0xFE } else { 0xFFFE };
        let len = bytes.len().min(max);
        buf.put_uint_le(len as u64, prefix);
        buf.put_slice(&bytes[..len]);
        return;
    }
    match data_type {
        DataType::NoData => {}
        DataType::Float32 => {
            let v = match value {
                AttributeValue::Float(v) => *v,
                other => other.as_f64().unwrap_or(0.0) as f32,
            };
            buf.put_f32_le(v);
        }
        DataType::IeeeAddress => {
            let addr = match value {
                AttributeValue::Address(addr) => *addr,
                other => NetworkAddress64::new(other.bits()),
            };
            buf.put_slice(&addr.to_wire());
        }
        opaque if opaque.is_opaque() => {
            let raw = match value {
                AttributeValue::Raw(raw) => &raw[..],
                _ => &[],
            };
            let width = opaque.width();
            let len = raw.len().min(width);
            buf.put_slice(&raw[..len]);
            buf.put_bytes(0, width - len);
        }
        fixed => buf.put_uint_le(value.bits(), fixed.width()),
    }
}

fn read_value(r: &mut Reader<'_>, data_type: DataType) -> Result<AttributeValue, FrameError> {
    if let Some(prefix) = data_type.length_prefix() {
        let len = r.uint(prefix)?;
        let invalid = if prefix == 1 { 0xFF } else { 0xFFFF };
        let bytes = if len == invalid {
            &[][..]
        } else {
            r.take(usize::try_from(len).unwrap_or(usize::MAX))?
        };
        return Ok(match data_type {
            DataType::CharString | DataType::LongCharString => {
                AttributeValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => AttributeValue::Raw(Bytes::copy_from_slice(bytes)),
        });
    }
    Ok(match data_type {
        DataType::NoData => AttributeValue::None,
        DataType::Bool => AttributeValue::Bool(r.u8()? == 1),
        DataType::Float32 => AttributeValue::Float(r.f32()?),
        DataType::IeeeAddress => AttributeValue::Address(r.addr64()?),
        opaque if opaque.is_opaque() => {
            AttributeValue::Raw(Bytes::copy_from_slice(r.take(opaque.width())?))
        }
        signed if signed.is_signed() => AttributeValue::Signed(r.int(signed.width())?),
        unsigned => AttributeValue::Unsigned(r.uint(unsigned.width())?),
    })
}

/// Decodes records until the payload ends.
///
/// A record whose data type has no known size ends the list: the rest of the
/// payload cannot be delimited, but everything before it is kept.
fn decode_records<T>(
    r: &mut Reader<'_>,
    mut record: impl FnMut(&mut Reader<'_>) -> Result<T, FrameError>,
) -> Result<Vec<T>, FrameError> {
    let mut records = Vec::new();
    while r.remaining() > 0 {
        match record(r) {
            Ok(item) => records.push(item),
            Err(FrameError::UnknownDataType(data_type)) => {
                tracing::debug!(
                    "attribute type 0x{:02x} cannot be sized, {} trailing bytes skipped",
                    data_type,
                    r.remaining()
                );
                r.rest();
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Frame type from the frame control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZclFrameType {
    Global,
    ClusterSpecific,
}

/// Direction from the frame control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Application frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZclHeader {
    pub frame_type: ZclFrameType,
    pub manufacturer_code: Option<u16>,
    pub direction: Direction,
    pub disable_default_response: bool,
    pub sequence: u8,
    pub command_id: u8,
}

impl ZclHeader {
    /// Header for a global command sent by the gateway.
    #[must_use]
    pub const fn global(sequence: u8, command_id: u8) -> Self {
        Self {
            frame_type: ZclFrameType::Global,
            manufacturer_code: None,
            direction: Direction::ClientToServer,
            disable_default_response: false,
            sequence,
            command_id,
        }
    }

    /// Header for a cluster-specific command sent by the gateway.
    #[must_use]
    pub const fn cluster(sequence: u8, command_id: u8) -> Self {
        Self {
            frame_type: ZclFrameType::ClusterSpecific,
            ..Self::global(sequence, command_id)
        }
    }

    /// Returns the same header with the direction flipped to server-to-client.
    #[must_use]
    pub const fn from_server(mut self) -> Self {
        self.direction = Direction::ServerToClient;
        self
    }

    fn frame_control(&self) -> u8 {
        let mut fc = match self.frame_type {
            ZclFrameType::Global => 0x00,
            ZclFrameType::ClusterSpecific => 0x01,
        };
        if self.manufacturer_code.is_some() {
            fc |= 0x04;
        }
        if self.direction == Direction::ServerToClient {
            fc |= 0x08;
        }
        if self.disable_default_response {
            fc |= 0x10;
        }
        fc
    }
}

/// One record of a read-attributes response.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    pub attr_id: u16,
    pub status: u8,
    /// Present when `status` is success.
    pub value: Option<TypedValue>,
}

/// Attribute id plus value, used by reports and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub attr_id: u16,
    pub value: TypedValue,
}

/// One record of a write-attributes response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub status: u8,
    /// Absent in the single-byte "all succeeded" form.
    pub attr_id: Option<u16>,
}

/// One attribute of a configure-reporting request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfig {
    pub attr_id: u16,
    pub data_type: DataType,
    pub min_interval: u16,
    pub max_interval: u16,
    /// Present for analog types only.
    pub reportable_change: Option<AttributeValue>,
}

/// One record of a configure-reporting response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureStatus {
    pub status: u8,
    pub direction: u8,
    /// Absent in the single-byte aggregate form.
    pub attr_id: Option<u16>,
}

/// Application command payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ZclCommand {
    ReadAttributes(Vec<u16>),
    ReadAttributesResponse(Vec<ReadRecord>),
    WriteAttributes(Vec<AttributeRecord>),
    WriteAttributesResponse(Vec<WriteStatus>),
    ConfigureReporting(Vec<ReportingConfig>),
    ConfigureReportingResponse(Vec<ConfigureStatus>),
    ReportAttributes(Vec<AttributeRecord>),
    DefaultResponse { command_id: u8, status: u8 },
    /// Cluster-specific payload, or a global command this codec does not model.
    Raw(Bytes),
}

/// A complete application frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ZclFrame {
    pub header: ZclHeader,
    pub command: ZclCommand,
}

impl ZclFrame {
    /// Creates a global frame whose command id follows from `command`.
    #[must_use]
    pub fn global(sequence: u8, command: ZclCommand) -> Self {
        let command_id = match &command {
            ZclCommand::ReadAttributes(_) => global::READ_ATTRIBUTES,
            ZclCommand::ReadAttributesResponse(_) => global::READ_ATTRIBUTES_RESPONSE,
            ZclCommand::WriteAttributes(_) => global::WRITE_ATTRIBUTES,
            ZclCommand::WriteAttributesResponse(_) => global::WRITE_ATTRIBUTES_RESPONSE,
            ZclCommand::ConfigureReporting(_) => global::CONFIGURE_REPORTING,
            ZclCommand::ConfigureReportingResponse(_) => global::CONFIGURE_REPORTING_RESPONSE,
            ZclCommand::ReportAttributes(_) => global::REPORT_ATTRIBUTES,
            ZclCommand::DefaultResponse { .. } => global::DEFAULT_RESPONSE,
            ZclCommand::Raw(_) => 0xFF,
        };
        Self {
            header: ZclHeader::global(sequence, command_id),
            command,
        }
    }

    /// Creates a cluster-specific frame sent by the gateway.
    #[must_use]
    pub fn cluster(sequence: u8, command_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            header: ZclHeader::cluster(sequence, command_id),
            command: ZclCommand::Raw(payload.into()),
        }
    }

    /// Returns false when the frame reports a failure for any attribute.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match &self.command {
            ZclCommand::DefaultResponse { status: s, .. } => *s == status::SUCCESS,
            ZclCommand::WriteAttributesResponse(records) => {
                records.iter().all(|r| r.status == status::SUCCESS)
            }
            ZclCommand::ConfigureReportingResponse(records) => {
                records.iter().all(|r| r.status == status::SUCCESS)
            }
            _ => true,
        }
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(self.header.frame_control());
        if let Some(code) = self.header.manufacturer_code {
            buf.put_u16_le(code);
        }
        buf.put_u8(self.header.sequence);
        buf.put_u8(self.header.command_id);

        match &self.command {
            ZclCommand::ReadAttributes(ids) => {
                for id in ids {
                    buf.put_u16_le(*id);
                }
            }
            ZclCommand::ReadAttributesResponse(records) => {
                for record in records {
                    buf.put_u16_le(record.attr_id);
                    buf.put_u8(record.status);
                    if let Some(value) = &record.value {
                        value.encode(&mut buf);
                    }
                }
            }
            ZclCommand::WriteAttributes(records) | ZclCommand::ReportAttributes(records) => {
                for record in records {
                    buf.put_u16_le(record.attr_id);
                    record.value.encode(&mut buf);
                }
            }
            ZclCommand::WriteAttributesResponse(records) => {
                for record in records {
                    buf.put_u8(record.status);
                    if let Some(id) = record.attr_id {
                        buf.put_u16_le(id);
                    }
                }
            }
            ZclCommand::ConfigureReporting(configs) => {
                for config in configs {
                    buf.put_u8(0x00);
                    buf.put_u16_le(config.attr_id);
                    buf.put_u8(config.data_type.into());
                    buf.put_u16_le(config.min_interval);
                    buf.put_u16_le(config.max_interval);
                    if config.data_type.is_analog() {
                        let change = config
                            .reportable_change
                            .clone()
                            .unwrap_or(AttributeValue::Unsigned(0));
                        put_value(&mut buf, config.data_type, &change);
                    }
                }
            }
            ZclCommand::ConfigureReportingResponse(records) => {
                for record in records {
                    buf.put_u8(record.status);
                    if let Some(id) = record.attr_id {
                        buf.put_u8(record.direction);
                        buf.put_u16_le(id);
                    }
                }
            }
            ZclCommand::DefaultResponse { command_id, status } => {
                buf.put_u8(*command_id);
                buf.put_u8(*status);
            }
            ZclCommand::Raw(payload) => buf.put_slice(payload),
        }
        buf.freeze()
    }

    /// Decodes an application frame.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data, "application frame");
        let fc = r.u8()?;
        let manufacturer_code = if fc & 0x04 != 0 { Some(r.u16()?) } else { None };
        let header = ZclHeader {
            frame_type: if fc & 0x03 == 0x01 {
                ZclFrameType::ClusterSpecific
            } else {
                ZclFrameType::Global
            },
            manufacturer_code,
            direction: if fc & 0x08 != 0 {
                Direction::ServerToClient
            } else {
                Direction::ClientToServer
            },
            disable_default_response: fc & 0x10 != 0,
            sequence: r.u8()?,
            command_id: r.u8()?,
        };

        if header.frame_type == ZclFrameType::ClusterSpecific {
            return Ok(Self {
                header,
                command: ZclCommand::Raw(Bytes::copy_from_slice(r.rest())),
            });
        }

        let command = match header.command_id {
            global::READ_ATTRIBUTES => {
                let mut ids = Vec::new();
                while r.remaining() > 0 {
                    ids.push(r.u16()?);
                }
                ZclCommand::ReadAttributes(ids)
            }
            global::READ_ATTRIBUTES_RESPONSE => {
                let records = decode_records(&mut r, |r| {
                    let attr_id = r.u16()?;
                    let status = r.u8()?;
                    let value = if status == status::SUCCESS {
                        Some(TypedValue::decode(r)?)
                    } else {
                        None
                    };
                    Ok(ReadRecord {
                        attr_id,
                        status,
                        value,
                    })
                })?;
                ZclCommand::ReadAttributesResponse(records)
            }
            global::WRITE_ATTRIBUTES | global::REPORT_ATTRIBUTES => {
                let records = decode_records(&mut r, |r| {
                    Ok(AttributeRecord {
                        attr_id: r.u16()?,
                        value: TypedValue::decode(r)?,
                    })
                })?;
                if header.command_id == global::WRITE_ATTRIBUTES {
                    ZclCommand::WriteAttributes(records)
                } else {
                    ZclCommand::ReportAttributes(records)
                }
            }
            global::WRITE_ATTRIBUTES_RESPONSE => {
                let mut records = Vec::new();
                if r.remaining() == 1 {
                    records.push(WriteStatus {
                        status: r.u8()?,
                        attr_id: None,
                    });
                }
                while r.remaining() > 0 {
                    records.push(WriteStatus {
                        status: r.u8()?,
                        attr_id: Some(r.u16()?),
                    });
                }
                ZclCommand::WriteAttributesResponse(records)
            }
            global::CONFIGURE_REPORTING => {
                let mut configs = Vec::new();
                while r.remaining() > 0 {
                    let direction = r.u8()?;
                    if direction != 0 {
                        return Err(FrameError::Malformed(format!(
                            "reporting direction {direction}"
                        )));
                    }
                    let attr_id = r.u16()?;
                    let data_type = DataType::from_byte(r.u8()?)?;
                    let min_interval = r.u16()?;
                    let max_interval = r.u16()?;
                    let reportable_change = if data_type.is_analog() {
                        Some(read_value(&mut r, data_type)?)
                    } else {
                        None
                    };
                    configs.push(ReportingConfig {
                        attr_id,
                        data_type,
                        min_interval,
                        max_interval,
                        reportable_change,
                    });
                }
                ZclCommand::ConfigureReporting(configs)
            }
            global::CONFIGURE_REPORTING_RESPONSE => {
                let mut records = Vec::new();
                if r.remaining() == 1 {
                    records.push(ConfigureStatus {
                        status: r.u8()?,
                        direction: 0,
                        attr_id: None,
                    });
                }
                while r.remaining() > 0 {
                    records.push(ConfigureStatus {
                        status: r.u8()?,
                        direction: r.u8()?,
                        attr_id: Some(r.u16()?),
                    });
                }
                ZclCommand::ConfigureReportingResponse(records)
            }
            global::DEFAULT_RESPONSE => ZclCommand::DefaultResponse {
                command_id: r.u8()?,
                status: r.u8()?,
            },
            _ => ZclCommand::Raw(Bytes::copy_from_slice(r.rest())),
        };
        Ok(Self { header, command })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_counter_skips_zero() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        for _ in 0..253 {
            counter.next();
        }
        assert_eq!(counter.next(), 255);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_read_attributes_layout() {
        let frame = ZclFrame::global(0x12, ZclCommand::ReadAttributes(vec![0x0000, 0x400A]));
        assert_eq!(&frame.encode()[..], &[0x00, 0x12, 0x00, 0x00, 0x00, 0x0A, 0x40]);
    }

    #[test]
    fn test_decode_report_from_device() {
        // on/off report: server to client, disable default response
        let data = [0x18, 0x05, 0x0A, 0x00, 0x00, 0x10, 0x01];
        let frame = ZclFrame::decode(&data).unwrap();
        assert_eq!(frame.header.direction, Direction::ServerToClient);
        assert!(frame.header.disable_default_response);
        assert_eq!(frame.header.sequence, 5);
        assert_eq!(
            frame.command,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: 0x0000,
                value: TypedValue::new(DataType::Bool, AttributeValue::Bool(true)),
            }])
        );
    }

    #[test]
    fn test_read_response_with_unsupported_attribute() {
        let data = [
            0x18, 0x07, 0x01, // header
            0x00, 0x00, 0x00, 0x29, 0x34, 0x08, // 0x0000 ok int16 2100
            0x01, 0x00, 0x86, // 0x0001 unsupported
        ];
        let frame = ZclFrame::decode(&data).unwrap();
        let ZclCommand::ReadAttributesResponse(records) = frame.command else {
            panic!("expected read response");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].value.as_ref().map(|v| &v.value),
            Some(&AttributeValue::Signed(2100))
        );
        assert_eq!(records[1].status, status::UNSUPPORTED_ATTRIBUTE);
        assert!(records[1].value.is_none());
    }

    #[test]
    fn test_negative_signed_value() {
        let frame = ZclFrame::global(
            1,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: 0x0000,
                value: TypedValue::new(DataType::Int16, AttributeValue::Signed(-550)),
            }]),
        );
        let decoded = ZclFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_configure_reporting_analog_and_discrete() {
        let frame = ZclFrame::global(
            9,
            ZclCommand::ConfigureReporting(vec![
                ReportingConfig {
                    attr_id: 0x0000,
                    data_type: DataType::Bool,
                    min_interval: 1,
                    max_interval: 3600,
                    reportable_change: None,
                },
                ReportingConfig {
                    attr_id: 0x0000,
                    data_type: DataType::Int16,
                    min_interval: 10,
                    max_interval: 600,
                    reportable_change: Some(AttributeValue::Signed(10)),
                },
            ]),
        );
        let encoded = frame.encode();
        // 3 header + 8 discrete + 10 analog
        assert_eq!(encoded.len(), 21);
        assert_eq!(ZclFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_single_status_configure_response() {
        let frame = ZclFrame::decode(&[0x18, 0x09, 0x07, 0x00]).unwrap();
        assert_eq!(
            frame.command,
            ZclCommand::ConfigureReportingResponse(vec![ConfigureStatus {
                status: status::SUCCESS,
                direction: 0,
                attr_id: None,
            }])
        );
        assert!(frame.is_success());
    }

    #[test]
    fn test_write_response_failure() {
        let frame = ZclFrame::decode(&[0x18, 0x02, 0x04, 0x86, 0x10, 0x00]).unwrap();
        assert!(!frame.is_success());
    }

    #[test]
    fn test_ieee_address_value() {
        let addr = NetworkAddress64::new(0x0013_A200_40AA_BBCC);
        let frame = ZclFrame::global(
            3,
            ZclCommand::WriteAttributes(vec![AttributeRecord {
                attr_id: 0x0010,
                value: TypedValue::new(DataType::IeeeAddress, AttributeValue::Address(addr)),
            }]),
        );
        assert_eq!(ZclFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_cluster_specific_is_raw() {
        let frame = ZclFrame::cluster(4, 0x01, Bytes::new());
        let encoded = frame.encode();
        assert_eq!(&encoded[..], &[0x01, 0x04, 0x01]);
        assert_eq!(ZclFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_manufacturer_specific_header() {
        let mut frame = ZclFrame::global(2, ZclCommand::ReadAttributes(vec![0x0001]));
        frame.header.manufacturer_code = Some(0x115F);
        let encoded = frame.encode();
        assert_eq!(&encoded[..3], &[0x04, 0x5F, 0x11]);
        assert_eq!(ZclFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_wide_integers_in_report() {
        let data = [
            0x18, 0x05, 0x0A, // header
            0x00, 0x00, 0x25, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // uint48
            0x00, 0x04, 0x21, 0x34, 0x12, // uint16
            0x01, 0x00, 0x2D, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // int48 -1
        ];
        let frame = ZclFrame::decode(&data).unwrap();
        let ZclCommand::ReportAttributes(records) = frame.command else {
            panic!("expected a report");
        };
        let values: Vec<_> = records.iter().map(|r| (r.attr_id, &r.value.value)).collect();
        assert_eq!(
            values,
            vec![
                (0x0000, &AttributeValue::Unsigned(0x0605_0403_0201)),
                (0x0400, &AttributeValue::Unsigned(0x1234)),
                (0x0001, &AttributeValue::Signed(-1)),
            ]
        );
    }

    #[test]
    fn test_string_and_time_types() {
        let data = [
            0x18, 0x02, 0x01, // header
            0x05, 0x00, 0x00, 0x41, 0x02, 0xAB, 0xCD, // octet string
            0x06, 0x00, 0x00, 0x44, 0x03, 0x00, b'a', b'b', b'c', // long char string
            0x07, 0x00, 0x00, 0xE2, 0x10, 0x00, 0x00, 0x00, // utc
        ];
        let frame = ZclFrame::decode(&data).unwrap();
        let ZclCommand::ReadAttributesResponse(records) = frame.command else {
            panic!("expected read response");
        };
        let values: Vec<_> = records
            .iter()
            .map(|r| r.value.as_ref().map(|v| v.value.clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                Some(AttributeValue::Raw(Bytes::from_static(&[0xAB, 0xCD]))),
                Some(AttributeValue::Text("abc".into())),
                Some(AttributeValue::Unsigned(0x10)),
            ]
        );
    }

    #[test]
    fn test_unsized_type_keeps_earlier_records() {
        // bool, then an array (0x48) whose extent this codec cannot know
        let data = [
            0x18, 0x01, 0x0A, 0x00, 0x00, 0x10, 0x01, 0x01, 0x00, 0x48, 0x20, 0x02, 0x00, 0x01,
            0x02,
        ];
        let frame = ZclFrame::decode(&data).unwrap();
        assert_eq!(
            frame.command,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: 0x0000,
                value: TypedValue::new(DataType::Bool, AttributeValue::Bool(true)),
            }])
        );
    }

    #[test]
    fn test_unknown_type_in_reporting_request() {
        let data = [0x00, 0x01, 0x06, 0x00, 0x00, 0x00, 0x48, 0x01, 0x00, 0x2C, 0x01];
        assert!(matches!(
            ZclFrame::decode(&data),
            Err(FrameError::UnknownDataType(0x48))
        ));
    }
}
