//! Cluster, attribute and command identifiers used by the gateway.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::reader::Reader;

pub const BASIC: u16 = 0x0000;
pub const POWER_CONFIGURATION: u16 = 0x0001;
pub const POLL_CONTROL: u16 = 0x0020;
pub const ON_OFF: u16 = 0x0006;
pub const LEVEL_CONTROL: u16 = 0x0008;
pub const COLOR_CONTROL: u16 = 0x0300;
pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
pub const OCCUPANCY_SENSING: u16 = 0x0406;
pub const IAS_ZONE: u16 = 0x0500;

/// Attribute ids, one module per cluster.
pub mod attr {
    pub mod power {
        /// Remaining battery in half percent.
        pub const BATTERY_PERCENTAGE: u16 = 0x0021;
    }

    pub mod poll_control {
        /// Checkin interval in quarter seconds.
        pub const CHECKIN_INTERVAL: u16 = 0x0000;
    }

    pub mod on_off {
        pub const ON_OFF: u16 = 0x0000;
    }

    pub mod level {
        pub const CURRENT_LEVEL: u16 = 0x0000;
    }

    pub mod color {
        pub const CURRENT_HUE: u16 = 0x0000;
        pub const CURRENT_SATURATION: u16 = 0x0001;
        pub const COLOR_TEMPERATURE: u16 = 0x0007;
        pub const CAPABILITIES: u16 = 0x400A;
    }

    pub mod measurement {
        /// Measured value, shared by illuminance, temperature, pressure and humidity.
        pub const MEASURED_VALUE: u16 = 0x0000;
    }

    pub mod occupancy {
        pub const OCCUPANCY: u16 = 0x0000;
    }

    pub mod zone {
        pub const STATE: u16 = 0x0000;
        pub const TYPE: u16 = 0x0001;
        pub const STATUS: u16 = 0x0002;
        pub const CIE_ADDRESS: u16 = 0x0010;
        pub const ZONE_ID: u16 = 0x0011;
    }
}

/// Cluster-specific command ids.
pub mod cmd {
    pub mod on_off {
        pub const OFF: u8 = 0x00;
        pub const ON: u8 = 0x01;
    }

    pub mod level {
        pub const MOVE_TO_LEVEL_WITH_ON_OFF: u8 = 0x04;
    }

    pub mod color {
        pub const MOVE_TO_HUE_AND_SATURATION: u8 = 0x06;
        pub const MOVE_TO_COLOR_TEMPERATURE: u8 = 0x0A;
    }

    pub mod poll_control {
        /// Device to gateway.
        pub const CHECKIN: u8 = 0x00;
        /// Gateway to device.
        pub const CHECKIN_RESPONSE: u8 = 0x00;
    }

    pub mod zone {
        /// Device to gateway.
        pub const STATUS_CHANGE_NOTIFICATION: u8 = 0x00;
        /// Device to gateway.
        pub const ENROLL_REQUEST: u8 = 0x01;
        /// Gateway to device.
        pub const ENROLL_RESPONSE: u8 = 0x00;
    }
}

/// Colour capability bits.
pub mod color_capability {
    pub const HUE_SATURATION: u64 = 0x0001;
    pub const COLOR_TEMPERATURE: u64 = 0x0010;
}

/// Alarm zone state and status bits.
pub mod zone {
    pub const STATE_NOT_ENROLLED: u8 = 0x00;
    pub const STATE_ENROLLED: u8 = 0x01;

    pub const STATUS_ALARM1: u64 = 0x0001;
    pub const STATUS_TAMPER: u64 = 0x0004;
    pub const STATUS_BATTERY: u64 = 0x0008;

    pub const TYPE_MOTION: u16 = 0x000D;
    pub const TYPE_CONTACT: u16 = 0x0015;
    pub const TYPE_FIRE: u16 = 0x0028;
    pub const TYPE_WATER: u16 = 0x002A;
    pub const TYPE_GAS: u16 = 0x002B;

    /// Enroll response code for success.
    pub const ENROLL_SUCCESS: u8 = 0x00;
}

/// Duration in tenths of a second for level and colour transitions.
pub const DEFAULT_TRANSITION: u16 = 10;

/// Payload of a move-to-level-with-on/off command.
#[must_use]
pub fn move_to_level(level: u8, transition: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(level);
    buf.put_u16_le(transition);
    buf.freeze()
}

/// Payload of a move-to-hue-and-saturation command.
#[must_use]
pub fn move_to_hue_saturation(hue: u8, saturation: u8, transition: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(hue);
    buf.put_u8(saturation);
    buf.put_u16_le(transition);
    buf.freeze()
}

/// Payload of a move-to-colour-temperature command.
#[must_use]
pub fn move_to_color_temperature(mireds: u16, transition: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16_le(mireds);
    buf.put_u16_le(transition);
    buf.freeze()
}

/// Payload of a checkin response that declines fast polling.
#[must_use]
pub fn checkin_response() -> Bytes {
    Bytes::from_static(&[0x00, 0x00, 0x00])
}

/// Payload of a zone enroll response.
#[must_use]
pub fn enroll_response(code: u8, zone_id: u8) -> Bytes {
    Bytes::copy_from_slice(&[code, zone_id])
}

/// Zone status change notification sent by an alarm zone device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStatusChange {
    pub zone_status: u16,
    pub extended_status: u8,
}

impl ZoneStatusChange {
    /// Decodes the notification payload.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data, "zone status change");
        Ok(Self {
            zone_status: r.u16()?,
            extended_status: if r.remaining() > 0 { r.u8()? } else { 0 },
        })
    }
}

/// Zone enroll request sent by an alarm zone device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneEnrollRequest {
    pub zone_type: u16,
    pub manufacturer_code: u16,
}

impl ZoneEnrollRequest {
    /// Decodes the request payload.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data, "zone enroll request");
        Ok(Self {
            zone_type: r.u16()?,
            manufacturer_code: r.u16()?,
        })
    }
}
