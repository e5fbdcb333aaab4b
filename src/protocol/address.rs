//! Network addresses.
//!
//! Every node has a stable 64-bit address, which is its identity, and a
//! volatile 16-bit short address assigned by the network. Both are carried
//! least-significant byte first on the wire and rendered most-significant
//! byte first as lowercase hex.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reverses the byte order of a fixed-size address.
///
/// This is the swap between the display order (most significant first) and
/// the wire order (least significant first). It is its own inverse.
#[must_use]
pub fn reverse_octets<const N: usize>(mut bytes: [u8; N]) -> [u8; N] {
    bytes.reverse();
    bytes
}

/// A stable 64-bit device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NetworkAddress64(u64);

impl NetworkAddress64 {
    /// Size of the address on the wire.
    pub const LEN: usize = 8;

    /// Address used by the radio when the 64-bit address is not known.
    pub const UNKNOWN: Self = Self(0xFFFF_FFFF_FFFF_FFFF);

    /// Destination of broadcasts; the short address selects the audience.
    pub const BROADCAST: Self = Self(0x0000_0000_0000_FFFF);

    /// Creates an address from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the address in wire order.
    #[must_use]
    pub fn to_wire(self) -> [u8; 8] {
        reverse_octets(self.0.to_be_bytes())
    }

    /// Reads an address from wire order.
    #[must_use]
    pub fn from_wire(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(reverse_octets(bytes)))
    }
}

impl fmt::Display for NetworkAddress64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for NetworkAddress64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkAddress64({self})")
    }
}

impl FromStr for NetworkAddress64 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl Serialize for NetworkAddress64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkAddress64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A volatile 16-bit network address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkAddress16(u16);

impl NetworkAddress16 {
    /// Size of the address on the wire.
    pub const LEN: usize = 2;

    /// The coordinator always owns short address zero.
    pub const COORDINATOR: Self = Self(0x0000);

    /// Sentinel for "short address not known".
    pub const UNKNOWN: Self = Self(0xFFFE);

    /// Broadcast to every device.
    pub const BROADCAST_ALL: Self = Self(0xFFFF);

    /// Broadcast to devices whose receiver stays on while idle.
    pub const BROADCAST_RX_ON: Self = Self(0xFFFD);

    /// Broadcast to routers and the coordinator.
    pub const BROADCAST_ROUTERS: Self = Self(0xFFFC);

    /// Creates an address from its numeric value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns true for the "not known" sentinel.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.0 == Self::UNKNOWN.0
    }

    /// Returns true for any broadcast address.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        matches!(self.0, 0xFFFC | 0xFFFD | 0xFFFF)
    }

    /// Returns the address in wire order.
    #[must_use]
    pub fn to_wire(self) -> [u8; 2] {
        reverse_octets(self.0.to_be_bytes())
    }

    /// Reads an address from wire order.
    #[must_use]
    pub fn from_wire(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(reverse_octets(bytes)))
    }
}

impl Default for NetworkAddress16 {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for NetworkAddress16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Debug for NetworkAddress16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkAddress16({self})")
    }
}

impl FromStr for NetworkAddress16 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 2];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(u16::from_be_bytes(bytes)))
    }
}

impl Serialize for NetworkAddress16 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkAddress16 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Renders a cluster or attribute id in its canonical text form.
#[must_use]
pub fn hex_id(id: u16) -> String {
    format!("{id:04x}")
}
