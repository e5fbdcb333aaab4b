//! Properties: typed, externally observable node attributes.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::cluster::{self, cmd};
use crate::protocol::zcl::{AttributeRecord, AttributeValue, DataType, TypedValue};

/// Completion token resolved when a write is confirmed or abandoned.
pub type Completion = oneshot::Sender<Result<()>>;

/// Logical value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    /// Returns the boolean, accepting numbers as truthiness.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            Self::Text(_) => None,
        }
    }

    /// Returns the number, accepting booleans as 0/1.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Returns the text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// How wire attribute values map onto the logical value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValueCodec {
    /// Non-zero is true.
    Bool,
    /// True when any bit of `mask` is set.
    Bitmask { mask: u64 },
    /// Wire value divided by `divisor`.
    Scaled { divisor: f64 },
    /// Logarithmic illuminance encoding, exposed in lux.
    Illuminance,
    /// Level 0..=254 exposed as percent.
    LevelPercent,
    /// Hue and saturation attributes exposed as `#rrggbb`.
    HueSaturation,
    /// Colour temperature in mireds exposed in kelvin.
    Mireds,
    Text,
}

/// How `set_value` reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteMethod {
    ReadOnly,
    /// On/off cluster commands.
    OnOff,
    /// Move-to-level-with-on/off command.
    Level,
    /// Move-to-hue-and-saturation command.
    HueSaturation,
    /// Move-to-colour-temperature command.
    ColorTemperature,
    /// Plain attribute write.
    Attribute,
}

/// Report configuration sent during binding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportThresholds {
    /// Seconds.
    pub min_interval: u16,
    /// Seconds.
    pub max_interval: u16,
    /// Minimum change in wire units; analog types only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reportable_change: Option<f64>,
}

impl ReportThresholds {
    /// Creates thresholds without a reportable change.
    #[must_use]
    pub const fn new(min_interval: u16, max_interval: u16) -> Self {
        Self {
            min_interval,
            max_interval,
            reportable_change: None,
        }
    }

    /// Sets the reportable change.
    #[must_use]
    pub const fn change(mut self, change: f64) -> Self {
        self.reportable_change = Some(change);
        self
    }
}

/// Outstanding configuration work and delivery mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFlags {
    pub needs_bind: bool,
    pub needs_config_report: bool,
    pub needs_initial_read: bool,
    /// Reports are best effort; no bind or report configuration is attempted.
    pub fire_and_forget: bool,
}

impl PropertyFlags {
    /// Flags of a property that still needs bind, report configuration and a read.
    #[must_use]
    pub const fn unbound() -> Self {
        Self {
            needs_bind: true,
            needs_config_report: true,
            needs_initial_read: true,
            fire_and_forget: false,
        }
    }

    /// Returns true while any configuration step is outstanding.
    #[must_use]
    pub const fn has_work(&self) -> bool {
        self.needs_bind || self.needs_config_report || self.needs_initial_read
    }
}

/// Frame contents that carry a write to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Command { command_id: u8, payload: Bytes },
    Attributes(Vec<AttributeRecord>),
}

/// A typed attribute bound to one endpoint and cluster.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    pub endpoint: u8,
    pub profile_id: u16,
    pub cluster_id: u16,
    /// Wire attributes; a composite property matches on any of them.
    pub attr_ids: Vec<u16>,
    pub data_type: DataType,
    pub codec: ValueCodec,
    pub write: WriteMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ReportThresholds>,
    /// Used when the device reports the attribute as unsupported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<PropertyValue>,
    pub value: Option<PropertyValue>,
    pub flags: PropertyFlags,
    /// Last raw value per attribute of a composite property.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw: BTreeMap<u16, u64>,
    #[serde(skip)]
    pub pending_write: Option<Completion>,
    /// Value the pending write asked for.
    #[serde(skip)]
    pub pending_value: Option<PropertyValue>,
}

impl Property {
    /// Creates a read-only property that needs bind, report configuration and a read.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        endpoint: u8,
        profile_id: u16,
        cluster_id: u16,
        attr_ids: Vec<u16>,
        data_type: DataType,
        codec: ValueCodec,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            profile_id,
            cluster_id,
            attr_ids,
            data_type,
            codec,
            write: WriteMethod::ReadOnly,
            thresholds: None,
            default_value: None,
            value: None,
            flags: PropertyFlags::unbound(),
            raw: BTreeMap::new(),
            pending_write: None,
            pending_value: None,
        }
    }

    /// Sets the write method.
    #[must_use]
    pub const fn writable(mut self, method: WriteMethod) -> Self {
        self.write = method;
        self
    }

    /// Sets report thresholds.
    #[must_use]
    pub const fn reporting(mut self, thresholds: ReportThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Sets the fallback value for unsupported attributes.
    #[must_use]
    pub fn default_value(mut self, value: PropertyValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Replaces the flags.
    #[must_use]
    pub const fn flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Returns true if this property is fed by the given wire attribute.
    #[must_use]
    pub fn matches(&self, profile_id: u16, endpoint: u8, cluster_id: u16, attr_id: u16) -> bool {
        self.profile_id == profile_id
            && self.endpoint == endpoint
            && self.cluster_id == cluster_id
            && self.attr_ids.contains(&attr_id)
    }

    /// Switches to best-effort delivery and drops outstanding bind/report work.
    pub const fn make_fire_and_forget(&mut self) {
        self.flags.fire_and_forget = true;
        self.flags.needs_bind = false;
        self.flags.needs_config_report = false;
    }

    /// Decodes a wire value into the cached value.
    ///
    /// Returns `None` if the value cannot be decoded, otherwise whether it changed.
    pub fn apply(&mut self, attr_id: u16, raw: &AttributeValue) -> Option<bool> {
        let value = self.decode(attr_id, raw)?;
        Some(self.set_cached(value))
    }

    /// Stores a value, returning true if it differs from the cached one.
    pub fn set_cached(&mut self, value: PropertyValue) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        true
    }

    /// Resolves the pending write, if any.
    pub fn resolve_write(&mut self, result: Result<()>) {
        self.pending_value = None;
        if let Some(completion) = self.pending_write.take() {
            // The caller may have stopped waiting.
            let _ = completion.send(result);
        }
    }

    /// Resolves the pending write once the cached value is the one it asked for.
    ///
    /// A report still carrying the previous value leaves the write pending.
    pub fn confirm_if_reported(&mut self) {
        if self.pending_value.is_some() && self.pending_value == self.value {
            self.resolve_write(Ok(()));
        }
    }

    /// Copy of the persistent part of the property, without the pending write.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            name: self.name.clone(),
            endpoint: self.endpoint,
            profile_id: self.profile_id,
            cluster_id: self.cluster_id,
            attr_ids: self.attr_ids.clone(),
            data_type: self.data_type,
            codec: self.codec,
            write: self.write,
            thresholds: self.thresholds,
            default_value: self.default_value.clone(),
            value: self.value.clone(),
            flags: self.flags,
            raw: self.raw.clone(),
            pending_write: None,
            pending_value: None,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn decode(&mut self, attr_id: u16, raw: &AttributeValue) -> Option<PropertyValue> {
        let value = match self.codec {
            ValueCodec::Bool => PropertyValue::Bool(raw.as_u64()? != 0),
            ValueCodec::Bitmask { mask } => PropertyValue::Bool(raw.as_u64()? & mask != 0),
            ValueCodec::Scaled { divisor } => {
                PropertyValue::Number(round2(raw.as_f64()? / divisor))
            }
            ValueCodec::Illuminance => {
                let measured = raw.as_f64()?;
                let lux = if measured <= 0.0 {
                    0.0
                } else {
                    10f64.powf((measured - 1.0) / 10_000.0).round()
                };
                PropertyValue::Number(lux)
            }
            ValueCodec::LevelPercent => {
                PropertyValue::Number((raw.as_f64()? * 100.0 / 254.0).round().min(100.0))
            }
            ValueCodec::Mireds => {
                let mireds = raw.as_f64()?;
                if mireds <= 0.0 {
                    return None;
                }
                PropertyValue::Number((1_000_000.0 / mireds).round())
            }
            ValueCodec::HueSaturation => {
                self.raw.insert(attr_id, raw.as_u64()?);
                let hue = self
                    .attr_ids
                    .first()
                    .and_then(|id| self.raw.get(id))
                    .copied()
                    .unwrap_or(0);
                let saturation = self
                    .attr_ids
                    .get(1)
                    .and_then(|id| self.raw.get(id))
                    .copied()
                    .unwrap_or(0);
                PropertyValue::Text(hsv_to_hex(
                    hue as f64 * 360.0 / 254.0,
                    (saturation as f64 / 254.0).min(1.0),
                ))
            }
            ValueCodec::Text => match raw {
                AttributeValue::Text(text) => PropertyValue::Text(text.clone()),
                _ => return None,
            },
        };
        Some(value)
    }

    /// Builds the frame contents that write `value` to the device.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode_write(&self, value: &PropertyValue) -> Result<WriteRequest> {
        let invalid = |reason: &str| Error::InvalidValue {
            property: self.name.clone(),
            reason: reason.to_owned(),
        };

        match self.write {
            WriteMethod::ReadOnly => Err(invalid("property is read-only")),
            WriteMethod::OnOff => {
                let on = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
                Ok(WriteRequest::Command {
                    command_id: if on { cmd::on_off::ON } else { cmd::on_off::OFF },
                    payload: Bytes::new(),
                })
            }
            WriteMethod::Level => {
                let percent = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                let level = (percent.clamp(0.0, 100.0) * 254.0 / 100.0).round() as u8;
                Ok(WriteRequest::Command {
                    command_id: cmd::level::MOVE_TO_LEVEL_WITH_ON_OFF,
                    payload: cluster::move_to_level(level, cluster::DEFAULT_TRANSITION),
                })
            }
            WriteMethod::HueSaturation => {
                let (hue, saturation) = value
                    .as_str()
                    .and_then(hex_to_hue_saturation)
                    .ok_or_else(|| invalid("expected #rrggbb"))?;
                Ok(WriteRequest::Command {
                    command_id: cmd::color::MOVE_TO_HUE_AND_SATURATION,
                    payload: cluster::move_to_hue_saturation(
                        (hue * 254.0 / 360.0).round() as u8,
                        (saturation * 254.0).round() as u8,
                        cluster::DEFAULT_TRANSITION,
                    ),
                })
            }
            WriteMethod::ColorTemperature => {
                let kelvin = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if kelvin <= 0.0 {
                    return Err(invalid("colour temperature must be positive"));
                }
                let mireds = (1_000_000.0 / kelvin).round().clamp(1.0, 65_279.0) as u16;
                Ok(WriteRequest::Command {
                    command_id: cmd::color::MOVE_TO_COLOR_TEMPERATURE,
                    payload: cluster::move_to_color_temperature(
                        mireds,
                        cluster::DEFAULT_TRANSITION,
                    ),
                })
            }
            WriteMethod::Attribute => {
                let attr_id = *self
                    .attr_ids
                    .first()
                    .ok_or_else(|| invalid("no attribute to write"))?;
                let wire = match (self.codec, value) {
                    (ValueCodec::Bool, v) => AttributeValue::Bool(
                        v.as_bool().ok_or_else(|| invalid("expected a boolean"))?,
                    ),
                    (ValueCodec::Scaled { divisor }, v) => {
                        let n = v.as_f64().ok_or_else(|| invalid("expected a number"))? * divisor;
                        if self.data_type.is_signed() {
                            AttributeValue::Signed(n.round() as i64)
                        } else if n < 0.0 {
                            return Err(invalid("value must not be negative"));
                        } else {
                            AttributeValue::Unsigned(n.round() as u64)
                        }
                    }
                    (ValueCodec::Text, PropertyValue::Text(text)) => {
                        AttributeValue::Text(text.clone())
                    }
                    _ => return Err(invalid("value cannot be written as an attribute")),
                };
                Ok(WriteRequest::Attributes(vec![AttributeRecord {
                    attr_id,
                    value: TypedValue::new(self.data_type, wire),
                }]))
            }
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Renders a fully bright colour as `#rrggbb`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn hsv_to_hex(hue: f64, saturation: f64) -> String {
    let chroma = saturation;
    let sector = (hue.rem_euclid(360.0)) / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = 1.0 - chroma;
    let byte = |c: f64| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", byte(r), byte(g), byte(b))
}

/// Parses `#rrggbb` into hue in degrees and saturation in 0..=1.
fn hex_to_hue_saturation(text: &str) -> Option<(f64, f64)> {
    let mut rgb = [0u8; 3];
    hex::decode_to_slice(text.strip_prefix('#').unwrap_or(text), &mut rgb).ok()?;
    let [r, g, b] = rgb.map(|c| f64::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    Some((hue, saturation))
}
