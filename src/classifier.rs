//! Maps discovered endpoint clusters onto gateway properties.
//!
//! Classification runs once every endpoint of a node is primed. It is
//! idempotent: properties that already exist (for example restored from a
//! snapshot) are left untouched.

use crate::protocol::cluster::{self, attr, color_capability, zone};
use crate::protocol::zcl::DataType;
use crate::types::{
    DeviceKind, Endpoint, Node, Property, PropertyFlags, ReportThresholds, ValueCodec,
    WriteMethod,
};

/// Adds the properties of every endpoint and derives the device kind.
pub fn classify(node: &mut Node) {
    let mut found = Vec::new();
    for endpoint in node.endpoints.values() {
        found.extend(endpoint_properties(endpoint));
    }
    for property in found {
        insert(node, property);
    }
    node.kind = device_kind(node);
    tracing::debug!(
        "node {} classified as {:?} with {} properties",
        node.addr64,
        node.kind,
        node.properties.len()
    );
}

fn insert(node: &mut Node, mut property: Property) {
    if let Some(existing) = node.properties.get(&property.name) {
        if existing.endpoint == property.endpoint {
            return;
        }
        // Second endpoint with the same cluster: suffix with the endpoint id.
        property.name = format!("{}{}", property.name, property.endpoint);
        if node.properties.contains_key(&property.name) {
            return;
        }
    }
    node.properties.insert(property.name.clone(), property);
}

fn endpoint_properties(endpoint: &Endpoint) -> Vec<Property> {
    let Some(descriptor) = &endpoint.descriptor else {
        return Vec::new();
    };
    let ep = endpoint.id;
    let profile = descriptor.profile_id;
    let mut properties = Vec::new();

    for &cluster_id in &descriptor.input_clusters {
        let property = |name: &str, attr_ids: Vec<u16>, data_type, codec| {
            Property::new(name, ep, profile, cluster_id, attr_ids, data_type, codec)
        };
        match cluster_id {
            cluster::ON_OFF => properties.push(
                property("on", vec![attr::on_off::ON_OFF], DataType::Bool, ValueCodec::Bool)
                    .writable(WriteMethod::OnOff)
                    .reporting(ReportThresholds::new(0, 300)),
            ),
            cluster::LEVEL_CONTROL => properties.push(
                property(
                    "level",
                    vec![attr::level::CURRENT_LEVEL],
                    DataType::Uint8,
                    ValueCodec::LevelPercent,
                )
                .writable(WriteMethod::Level)
                .reporting(ReportThresholds::new(1, 300).change(1.0)),
            ),
            cluster::COLOR_CONTROL => {
                let caps = u64::from(endpoint.color_capabilities.unwrap_or(0));
                if caps & color_capability::HUE_SATURATION != 0 {
                    properties.push(
                        property(
                            "color",
                            vec![attr::color::CURRENT_HUE, attr::color::CURRENT_SATURATION],
                            DataType::Uint8,
                            ValueCodec::HueSaturation,
                        )
                        .writable(WriteMethod::HueSaturation)
                        .reporting(ReportThresholds::new(1, 300).change(1.0)),
                    );
                }
                if caps & color_capability::COLOR_TEMPERATURE != 0 {
                    properties.push(
                        property(
                            "colorTemperature",
                            vec![attr::color::COLOR_TEMPERATURE],
                            DataType::Uint16,
                            ValueCodec::Mireds,
                        )
                        .writable(WriteMethod::ColorTemperature)
                        .reporting(ReportThresholds::new(1, 300).change(10.0)),
                    );
                }
            }
            cluster::TEMPERATURE_MEASUREMENT => properties.push(
                property(
                    "temperature",
                    vec![attr::measurement::MEASURED_VALUE],
                    DataType::Int16,
                    ValueCodec::Scaled { divisor: 100.0 },
                )
                .reporting(ReportThresholds::new(10, 600).change(10.0)),
            ),
            cluster::HUMIDITY_MEASUREMENT => properties.push(
                property(
                    "humidity",
                    vec![attr::measurement::MEASURED_VALUE],
                    DataType::Uint16,
                    ValueCodec::Scaled { divisor: 100.0 },
                )
                .reporting(ReportThresholds::new(10, 600).change(100.0)),
            ),
            cluster::PRESSURE_MEASUREMENT => properties.push(
                property(
                    "pressure",
                    vec![attr::measurement::MEASURED_VALUE],
                    DataType::Int16,
                    ValueCodec::Scaled { divisor: 1.0 },
                )
                .reporting(ReportThresholds::new(10, 600).change(1.0)),
            ),
            cluster::ILLUMINANCE_MEASUREMENT => properties.push(
                property(
                    "illuminance",
                    vec![attr::measurement::MEASURED_VALUE],
                    DataType::Uint16,
                    ValueCodec::Illuminance,
                )
                .reporting(ReportThresholds::new(10, 600).change(500.0)),
            ),
            cluster::OCCUPANCY_SENSING => properties.push(
                property(
                    "occupied",
                    vec![attr::occupancy::OCCUPANCY],
                    DataType::Bitmap8,
                    ValueCodec::Bitmask { mask: 0x01 },
                )
                .reporting(ReportThresholds::new(0, 600)),
            ),
            cluster::POWER_CONFIGURATION => properties.push(
                property(
                    "batteryPercentage",
                    vec![attr::power::BATTERY_PERCENTAGE],
                    DataType::Uint8,
                    ValueCodec::Scaled { divisor: 2.0 },
                )
                .reporting(ReportThresholds::new(3600, 43_200).change(2.0)),
            ),
            cluster::IAS_ZONE => {
                // Zones push status change notifications once enrolled; only
                // the initial status read is needed.
                let flags = PropertyFlags {
                    needs_initial_read: true,
                    ..PropertyFlags::default()
                };
                let zone_type = endpoint.zone_type.unwrap_or(0xFFFF);
                for (name, mask) in [
                    (zone_property_name(zone_type), zone::STATUS_ALARM1),
                    ("tamper", zone::STATUS_TAMPER),
                    ("lowBattery", zone::STATUS_BATTERY),
                ] {
                    properties.push(
                        property(
                            name,
                            vec![attr::zone::STATUS],
                            DataType::Bitmap16,
                            ValueCodec::Bitmask { mask },
                        )
                        .flags(flags),
                    );
                }
            }
            _ => {}
        }
    }
    properties
}

/// Name of the main alarm property for a zone type.
#[must_use]
pub const fn zone_property_name(zone_type: u16) -> &'static str {
    match zone_type {
        zone::TYPE_MOTION => "motion",
        zone::TYPE_CONTACT => "open",
        zone::TYPE_FIRE => "smoke",
        zone::TYPE_WATER => "waterLeak",
        _ => "alarm",
    }
}

fn device_kind(node: &Node) -> DeviceKind {
    let has = |name: &str| node.properties.contains_key(name);
    if has("color") {
        DeviceKind::ColorLight
    } else if has("colorTemperature") {
        DeviceKind::ColorTemperatureLight
    } else if has("level") {
        DeviceKind::DimmableLight
    } else if has("on") {
        DeviceKind::OnOffSwitch
    } else if has("motion") {
        DeviceKind::MotionSensor
    } else if has("open") {
        DeviceKind::ContactSensor
    } else if has("smoke") {
        DeviceKind::SmokeSensor
    } else if has("waterLeak") {
        DeviceKind::LeakSensor
    } else if has("alarm") {
        DeviceKind::AlarmSensor
    } else if has("occupied") {
        DeviceKind::OccupancySensor
    } else if ["temperature", "humidity", "pressure", "illuminance"]
        .iter()
        .any(|n| has(n))
    {
        DeviceKind::EnvironmentSensor
    } else {
        DeviceKind::Unknown
    }
}
