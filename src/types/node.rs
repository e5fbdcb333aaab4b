//! Nodes: one entry per mesh peer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::cluster::{self, zone};
use crate::protocol::zcl::SequenceCounter;
use crate::protocol::{NetworkAddress16, NetworkAddress64};
use crate::types::endpoint::{Endpoint, EndpointPhase};
use crate::types::property::{Property, PropertyValue};

/// Node-level discovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryState {
    #[default]
    Unknown,
    /// Active endpoint request in flight; `attempts` counts requests sent.
    EndpointsRequested { attempts: u8 },
    /// Endpoint list received; descriptors and classifiers may still be pending.
    EndpointsKnown,
    /// Every endpoint is primed and the node has been classified.
    Ready,
}

/// Binding and report configuration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingState {
    #[default]
    Required,
    /// One binding step is in flight.
    InProgress,
    Bound,
}

/// Classification derived from the node's properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    #[default]
    Unknown,
    OnOffSwitch,
    DimmableLight,
    ColorLight,
    ColorTemperatureLight,
    MotionSensor,
    ContactSensor,
    SmokeSensor,
    LeakSensor,
    AlarmSensor,
    OccupancySensor,
    EnvironmentSensor,
}

/// Alarm zone enrollment state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    /// Zero is not enrolled, one is enrolled.
    pub state: Option<u8>,
    pub zone_type: Option<u16>,
    pub status: Option<u16>,
    /// Where the zone sends its alarms.
    pub cie_address: Option<NetworkAddress64>,
    pub zone_id: Option<u8>,
}

impl ZoneInfo {
    /// Returns true once the zone is enrolled and reports to `coordinator`.
    #[must_use]
    pub fn is_complete(&self, coordinator: NetworkAddress64) -> bool {
        self.state == Some(zone::STATE_ENROLLED) && self.cie_address == Some(coordinator)
    }
}

/// One neighbor table entry as seen by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborLink {
    pub addr64: NetworkAddress64,
    pub addr16: NetworkAddress16,
    pub device_type: u8,
    pub relationship: u8,
    pub lqi: u8,
}

/// One routing table entry of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteLink {
    pub destination: NetworkAddress16,
    pub next_hop: NetworkAddress16,
    pub status: u8,
}

/// Neighbor and routing snapshot from the last network scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLinks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<NeighborLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteLink>,
}

/// Read-only view of a node handed to applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub addr64: NetworkAddress64,
    pub addr16: NetworkAddress16,
    pub kind: DeviceKind,
    pub discovery: DiscoveryState,
    pub binding: BindingState,
    /// Property name to cached value.
    pub properties: BTreeMap<String, Option<PropertyValue>>,
}

/// A mesh peer.
#[derive(Debug)]
pub struct Node {
    /// Identity; never changes.
    pub addr64: NetworkAddress64,
    /// Cached short address; may be unknown.
    pub addr16: NetworkAddress16,
    pub is_coordinator: bool,
    pub rx_on_when_idle: bool,
    /// Waits use the extended timeout (sleepy end devices).
    pub extended_timeout: bool,
    pub endpoints: BTreeMap<u8, Endpoint>,
    pub properties: BTreeMap<String, Property>,
    pub kind: DeviceKind,
    /// Poll control checkin interval in quarter seconds.
    pub checkin_interval: Option<u32>,
    pub checkin_bound: bool,
    pub zone: Option<ZoneInfo>,
    pub links: NetworkLinks,
    pub discovery: DiscoveryState,
    pub binding: BindingState,
    /// Exposed to the platform.
    pub added: bool,
    pub removed: bool,
    sequence: SequenceCounter,
}

impl Node {
    /// Creates a node that has not been discovered yet.
    #[must_use]
    pub fn new(addr64: NetworkAddress64, addr16: NetworkAddress16) -> Self {
        Self {
            addr64,
            addr16,
            is_coordinator: false,
            rx_on_when_idle: true,
            extended_timeout: false,
            endpoints: BTreeMap::new(),
            properties: BTreeMap::new(),
            kind: DeviceKind::Unknown,
            checkin_interval: None,
            checkin_bound: false,
            zone: None,
            links: NetworkLinks::default(),
            discovery: DiscoveryState::Unknown,
            binding: BindingState::Required,
            added: false,
            removed: false,
            sequence: SequenceCounter::new(),
        }
    }

    /// Snapshot of the externally visible state.
    #[must_use]
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            addr64: self.addr64,
            addr16: self.addr16,
            kind: self.kind,
            discovery: self.discovery,
            binding: self.binding,
            properties: self
                .properties
                .iter()
                .map(|(name, p)| (name.clone(), p.value.clone()))
                .collect(),
        }
    }

    /// Next application sequence number for this node.
    pub fn next_sequence(&mut self) -> u8 {
        self.sequence.next()
    }

    /// Records a short address learned from the network.
    ///
    /// The most recent confirmed source wins. Returns true if it changed.
    pub fn update_addr16(&mut self, addr16: NetworkAddress16) -> bool {
        if addr16.is_unknown() || addr16.is_broadcast() || addr16 == self.addr16 {
            return false;
        }
        tracing::debug!("node {} short address {} -> {}", self.addr64, self.addr16, addr16);
        self.addr16 = addr16;
        true
    }

    /// Records whether the radio stays on; sleepy devices get extended waits.
    pub const fn set_rx_on_when_idle(&mut self, rx_on: bool) {
        self.rx_on_when_idle = rx_on;
        self.extended_timeout = !rx_on;
    }

    /// First endpoint serving `cluster_id`.
    #[must_use]
    pub fn endpoint_with(&self, cluster_id: u16) -> Option<u8> {
        self.endpoints
            .values()
            .find(|e| e.has_input(cluster_id))
            .map(|e| e.id)
    }

    /// Returns true once every endpoint has its descriptor and classifier attributes.
    #[must_use]
    pub fn all_endpoints_primed(&self) -> bool {
        self.endpoints
            .values()
            .all(|e| e.phase == EndpointPhase::Primed)
    }

    /// Names of the properties fed by one wire attribute.
    #[must_use]
    pub fn matching_properties(
        &self,
        profile_id: u16,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    ) -> Vec<String> {
        self.properties
            .values()
            .filter(|p| p.matches(profile_id, endpoint, cluster_id, attr_id))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Returns true while checkin binding is still outstanding.
    #[must_use]
    pub fn needs_checkin_bind(&self) -> bool {
        !self.checkin_bound && self.endpoint_with(cluster::POLL_CONTROL).is_some()
    }

    /// Returns true while alarm zone enrollment is still outstanding.
    #[must_use]
    pub fn needs_zone_enrollment(&self, coordinator: NetworkAddress64) -> bool {
        self.endpoint_with(cluster::IAS_ZONE).is_some()
            && !self.zone.is_some_and(|z| z.is_complete(coordinator))
    }

    /// Returns true while any binding loop step remains.
    #[must_use]
    pub fn needs_rebind(&self, coordinator: NetworkAddress64) -> bool {
        self.addr16.is_unknown()
            || self.needs_checkin_bind()
            || self.needs_zone_enrollment(coordinator)
            || self.properties.values().any(|p| p.flags.has_work())
    }

    /// Marks every property best effort after the node rejected a bind.
    pub fn make_fire_and_forget(&mut self) {
        for property in self.properties.values_mut() {
            property.make_fire_and_forget();
        }
    }
}
