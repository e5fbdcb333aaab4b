//! Node registry and its persistent snapshot form.
//!
//! The registry is owned by exactly one engine; several engines in one
//! process each have their own. Snapshots are plain serde structures keyed
//! by `BTreeMap`, so serializing the same registry twice yields the same
//! bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{NetworkAddress16, NetworkAddress64};
use crate::types::{
    BindingState, DeviceKind, DiscoveryState, Endpoint, NetworkLinks, Node, Property, ZoneInfo,
};

/// All known nodes, keyed by 64-bit address.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: BTreeMap<NetworkAddress64, Node>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, addr64: NetworkAddress64) -> Option<&Node> {
        self.nodes.get(&addr64)
    }

    pub fn get_mut(&mut self, addr64: NetworkAddress64) -> Option<&mut Node> {
        self.nodes.get_mut(&addr64)
    }

    #[must_use]
    pub fn contains(&self, addr64: NetworkAddress64) -> bool {
        self.nodes.contains_key(&addr64)
    }

    /// Returns the node, creating it on first reference.
    ///
    /// The boolean is true when the node was created. For an existing node
    /// the short address is updated.
    pub fn get_or_insert(
        &mut self,
        addr64: NetworkAddress64,
        addr16: NetworkAddress16,
    ) -> (&mut Node, bool) {
        let mut created = false;
        let node = self.nodes.entry(addr64).or_insert_with(|| {
            created = true;
            tracing::info!("new node {} ({})", addr64, addr16);
            Node::new(addr64, addr16)
        });
        if !created {
            node.update_addr16(addr16);
        }
        (node, created)
    }

    /// Evicts a node.
    pub fn remove(&mut self, addr64: NetworkAddress64) -> Option<Node> {
        self.nodes.remove(&addr64)
    }

    /// Looks up a node by its cached short address.
    #[must_use]
    pub fn find_by_addr16(&self, addr16: NetworkAddress16) -> Option<NetworkAddress64> {
        if addr16.is_unknown() {
            return None;
        }
        self.nodes
            .values()
            .find(|n| n.addr16 == addr16)
            .map(|n| n.addr64)
    }

    /// Addresses of all nodes, in key order.
    #[must_use]
    pub fn addresses(&self) -> Vec<NetworkAddress64> {
        self.nodes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Captures the persistent state of every node.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self
                .nodes
                .values()
                .filter(|n| !n.removed)
                .map(|n| (n.addr64, NodeSnapshot::from_node(n)))
                .collect(),
        }
    }

    /// Rebuilds a registry from a snapshot.
    #[must_use]
    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        Self {
            nodes: snapshot
                .nodes
                .into_iter()
                .map(|(addr64, snap)| (addr64, snap.into_node(addr64)))
                .collect(),
        }
    }
}

/// Persistent form of the whole registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub nodes: BTreeMap<NetworkAddress64, NodeSnapshot>,
}

/// Persistent form of one node.
///
/// Transient progress is normalized: an endpoint request in flight is saved
/// as not started, a binding step in flight as still required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub addr16: NetworkAddress16,
    #[serde(default)]
    pub is_coordinator: bool,
    pub rx_on_when_idle: bool,
    #[serde(default)]
    pub extended_timeout: bool,
    #[serde(default)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub discovery: DiscoveryState,
    #[serde(default)]
    pub binding: BindingState,
    #[serde(default)]
    pub endpoints: BTreeMap<u8, Endpoint>,
    #[serde(default)]
    pub properties: BTreeMap<String, SnapshotProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_interval: Option<u32>,
    #[serde(default)]
    pub checkin_bound: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneInfo>,
    #[serde(default)]
    pub links: NetworkLinks,
}

/// A property as stored in a snapshot.
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotProperty(pub Property);

impl Clone for SnapshotProperty {
    fn clone(&self) -> Self {
        Self(self.0.snapshot())
    }
}

impl PartialEq for SnapshotProperty {
    fn eq(&self, other: &Self) -> bool {
        // Properties have no equality of their own; compare the stored form.
        serde_json::to_value(&self.0).ok() == serde_json::to_value(&other.0).ok()
    }
}

impl NodeSnapshot {
    fn from_node(node: &Node) -> Self {
        let discovery = match node.discovery {
            DiscoveryState::EndpointsRequested { .. } => DiscoveryState::Unknown,
            other => other,
        };
        let binding = match node.binding {
            BindingState::InProgress => BindingState::Required,
            other => other,
        };
        Self {
            addr16: node.addr16,
            is_coordinator: node.is_coordinator,
            rx_on_when_idle: node.rx_on_when_idle,
            extended_timeout: node.extended_timeout,
            kind: node.kind,
            discovery,
            binding,
            endpoints: node.endpoints.clone(),
            properties: node
                .properties
                .iter()
                .map(|(name, p)| (name.clone(), SnapshotProperty(p.snapshot())))
                .collect(),
            checkin_interval: node.checkin_interval,
            checkin_bound: node.checkin_bound,
            zone: node.zone,
            links: node.links.clone(),
        }
    }

    fn into_node(self, addr64: NetworkAddress64) -> Node {
        let mut node = Node::new(addr64, self.addr16);
        node.is_coordinator = self.is_coordinator;
        node.rx_on_when_idle = self.rx_on_when_idle;
        node.extended_timeout = self.extended_timeout;
        node.kind = self.kind;
        node.discovery = self.discovery;
        node.binding = self.binding;
        node.endpoints = self.endpoints;
        for endpoint in node.endpoints.values_mut() {
            endpoint.restore_phase();
        }
        node.properties = self
            .properties
            .into_iter()
            .map(|(name, p)| (name, p.0))
            .collect();
        node.checkin_interval = self.checkin_interval;
        node.checkin_bound = self.checkin_bound;
        node.zone = self.zone;
        node.links = self.links;
        node
    }
}
