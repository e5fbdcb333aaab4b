//! Endpoints: numbered sub-interfaces of a node.

use serde::{Deserialize, Serialize};

use crate::protocol::cluster::{self, attr};

/// Colour capabilities assumed when a light does not report them.
pub const FALLBACK_COLOR_CAPABILITIES: u16 = 0x0001;

/// Zone type used when an alarm zone does not report one.
pub const FALLBACK_ZONE_TYPE: u16 = 0xFFFF;

/// Profile, device and cluster lists from the simple descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub profile_id: u16,
    pub device_id: u16,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

/// Discovery progress of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointPhase {
    #[default]
    NeedsDescriptor,
    /// Guards against a duplicate descriptor request.
    DescriptorRequested,
    NeedsClassifier,
    /// Guards against a duplicate classifier read.
    ClassifierRequested,
    Primed,
}

/// A numbered sub-interface of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    /// Colour control capability bitmap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_capabilities: Option<u16>,
    /// Alarm zone type code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_type: Option<u16>,
    #[serde(skip)]
    pub phase: EndpointPhase,
}

impl Endpoint {
    /// Creates an endpoint whose descriptor is not yet known.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self {
            id,
            descriptor: None,
            color_capabilities: None,
            zone_type: None,
            phase: EndpointPhase::NeedsDescriptor,
        }
    }

    /// Returns true if the endpoint serves `cluster_id`.
    #[must_use]
    pub fn has_input(&self, cluster_id: u16) -> bool {
        self.descriptor
            .as_ref()
            .is_some_and(|d| d.input_clusters.contains(&cluster_id))
    }

    /// Returns the profile id, if the descriptor is known.
    #[must_use]
    pub fn profile_id(&self) -> Option<u16> {
        self.descriptor.as_ref().map(|d| d.profile_id)
    }

    /// The next classifier attribute that must be read before typing, as
    /// `(cluster, attribute)`.
    #[must_use]
    pub fn missing_classifier_attribute(&self) -> Option<(u16, u16)> {
        if self.has_input(cluster::COLOR_CONTROL) && self.color_capabilities.is_none() {
            Some((cluster::COLOR_CONTROL, attr::color::CAPABILITIES))
        } else if self.has_input(cluster::IAS_ZONE) && self.zone_type.is_none() {
            Some((cluster::IAS_ZONE, attr::zone::TYPE))
        } else {
            None
        }
    }

    /// Stores a classifier attribute; `None` records the fallback.
    pub fn set_classifier_attribute(&mut self, cluster_id: u16, value: Option<u16>) {
        match cluster_id {
            cluster::COLOR_CONTROL => {
                self.color_capabilities = Some(value.unwrap_or(FALLBACK_COLOR_CAPABILITIES));
            }
            cluster::IAS_ZONE => self.zone_type = Some(value.unwrap_or(FALLBACK_ZONE_TYPE)),
            _ => {}
        }
    }

    /// Re-derives the phase after a restore; in-flight guards are not persisted.
    pub fn restore_phase(&mut self) {
        self.phase = if self.descriptor.is_none() {
            EndpointPhase::NeedsDescriptor
        } else if self.missing_classifier_attribute().is_some() {
            EndpointPhase::NeedsClassifier
        } else {
            EndpointPhase::Primed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(clusters: &[u16]) -> Endpoint {
        let mut endpoint = Endpoint::new(1);
        endpoint.descriptor = Some(Descriptor {
            profile_id: 0x0104,
            device_id: 0x0102,
            input_clusters: clusters.to_vec(),
            output_clusters: Vec::new(),
        });
        endpoint
    }

    #[test]
    fn test_classifier_attributes_in_order() {
        let mut ep = endpoint(&[cluster::COLOR_CONTROL, cluster::IAS_ZONE]);
        assert_eq!(
            ep.missing_classifier_attribute(),
            Some((cluster::COLOR_CONTROL, attr::color::CAPABILITIES))
        );
        ep.set_classifier_attribute(cluster::COLOR_CONTROL, Some(0x0010));
        assert_eq!(
            ep.missing_classifier_attribute(),
            Some((cluster::IAS_ZONE, attr::zone::TYPE))
        );
        ep.set_classifier_attribute(cluster::IAS_ZONE, None);
        assert_eq!(ep.zone_type, Some(FALLBACK_ZONE_TYPE));
        assert_eq!(ep.missing_classifier_attribute(), None);
    }

    #[test]
    fn test_restore_phase() {
        let mut ep = Endpoint::new(3);
        ep.restore_phase();
        assert_eq!(ep.phase, EndpointPhase::NeedsDescriptor);

        let mut ep = endpoint(&[cluster::ON_OFF]);
        ep.restore_phase();
        assert_eq!(ep.phase, EndpointPhase::Primed);

        let mut ep = endpoint(&[cluster::COLOR_CONTROL]);
        ep.restore_phase();
        assert_eq!(ep.phase, EndpointPhase::NeedsClassifier);
    }
}
