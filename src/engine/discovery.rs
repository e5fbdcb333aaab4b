//! Coordinator identity, network scan and node discovery.

use std::collections::HashSet;

use bytes::Bytes;

use crate::classifier;
use crate::event::Event;
use crate::protocol::api::{LOCAL_READ_ADDRESS16, LOCAL_READ_ADDRESS64};
use crate::protocol::zdo::{Neighbor, TablePage, cluster as zdo_cluster, status as zdo_status};
use crate::protocol::{
    AttributeValue, InboundFrame, NetworkAddress16, NetworkAddress64, ZclCommand, ZclFrame,
    ZdoMessage, hex_id,
};
use crate::registry::Registry;
use crate::scheduler::{FrameMatcher, Scheduler, WaitSpec};
use crate::types::{
    BindingState, Descriptor, DiscoveryState, Endpoint, EndpointPhase, NeighborLink, RouteLink,
};

use super::{
    Core, PRIORITY_REPLY, ScanState, Step, exchange, management_message, read_value, zcl_command,
};

impl Core {
    pub(super) fn start(&mut self, queue: &mut Scheduler<Step>) {
        for (command, step) in [
            (LOCAL_READ_ADDRESS64, Step::CoordinatorAddress64),
            (LOCAL_READ_ADDRESS16, Step::CoordinatorAddress16),
        ] {
            let (frame, frame_id) = self.local_command(command, Bytes::new());
            let wait = WaitSpec::new(FrameMatcher::local(frame_id))
                .retry_max(self.config.retry_max)
                .on_either(step);
            exchange(queue, frame, wait, PRIORITY_REPLY);
        }

        self.restore();
        let ready: Vec<_> = self
            .registry
            .iter()
            .filter(|n| n.discovery == DiscoveryState::Ready && !n.is_coordinator)
            .map(|n| n.addr64)
            .collect();
        for addr64 in ready {
            self.ensure_added(addr64);
        }
    }

    fn restore(&mut self) {
        match self.store.load() {
            Ok(Some(snapshot)) => {
                self.registry = Registry::restore(snapshot);
                tracing::info!("restored {} nodes from snapshot", self.registry.len());
            }
            Ok(None) => tracing::debug!("no registry snapshot, starting empty"),
            Err(e) => tracing::warn!("cannot load registry snapshot, starting empty: {}", e),
        }
    }

    pub(super) fn on_coordinator_address64(
        &mut self,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let addr64 = match frame {
            Some(InboundFrame::LocalResponse(local)) if local.status == 0 => local
                .data
                .get(..NetworkAddress64::LEN)
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(NetworkAddress64::from_wire),
            _ => None,
        };

        match addr64 {
            Some(addr64) => {
                tracing::info!("coordinator address {}", addr64);
                self.coordinator = Some(addr64);
                let (node, _) = self.registry.get_or_insert(addr64, self.coordinator16);
                node.is_coordinator = true;
                node.discovery = DiscoveryState::Ready;
                node.binding = BindingState::Bound;
            }
            None => tracing::warn!("coordinator did not report its address, binding disabled"),
        }

        if self.config.scan_on_start && self.coordinator.is_some() {
            self.start_scan(queue);
        } else {
            self.populate_all(queue);
        }
    }

    pub(super) fn on_coordinator_address16(&mut self, frame: Option<&InboundFrame>) {
        let addr16 = match frame {
            Some(InboundFrame::LocalResponse(local)) if local.status == 0 => local
                .data
                .get(..NetworkAddress16::LEN)
                .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
                .map(NetworkAddress16::from_wire),
            _ => None,
        };
        let Some(addr16) = addr16 else {
            tracing::warn!("coordinator did not report its short address");
            return;
        };
        self.coordinator16 = addr16;
        if let Some(node) = self.coordinator.and_then(|c| self.registry.get_mut(c)) {
            node.update_addr16(addr16);
        }
    }

    /// Walks neighbor and routing tables from the coordinator outwards.
    pub(super) fn start_scan(&mut self, queue: &mut Scheduler<Step>) {
        let Some(coordinator) = self.coordinator else {
            return;
        };
        tracing::info!("scanning network");
        self.scan = ScanState {
            active: true,
            pending: 0,
            visited: HashSet::from([coordinator]),
        };
        self.request_neighbors(coordinator, 0, queue);
        self.request_routes(coordinator, 0, queue);
    }

    fn request_neighbors(
        &mut self,
        addr64: NetworkAddress64,
        start_index: u8,
        queue: &mut Scheduler<Step>,
    ) {
        self.scan.pending += 1;
        let addr16 = self.addr16_of(addr64);
        let (frame, tsn) =
            self.management(addr64, addr16, ZdoMessage::LqiRequest { start_index });
        let matcher = FrameMatcher::management(
            Some(addr64),
            zdo_cluster::LQI_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        let wait = self.wait(addr64, matcher).on_either(Step::NeighborTable { addr64 });
        exchange(queue, frame, wait, None);
    }

    fn request_routes(
        &mut self,
        addr64: NetworkAddress64,
        start_index: u8,
        queue: &mut Scheduler<Step>,
    ) {
        self.scan.pending += 1;
        let addr16 = self.addr16_of(addr64);
        let (frame, tsn) =
            self.management(addr64, addr16, ZdoMessage::RoutingTableRequest { start_index });
        let matcher = FrameMatcher::management(
            Some(addr64),
            zdo_cluster::ROUTING_TABLE_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        let wait = self.wait(addr64, matcher).on_either(Step::RoutingTable { addr64 });
        exchange(queue, frame, wait, None);
    }

    pub(super) fn on_neighbor_table(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        match management_message(frame) {
            Some(ZdoMessage::LqiResponse(page)) if page.status == zdo_status::SUCCESS => {
                self.record_neighbors(addr64, page, queue);
                if let Some(next) = page.next_index() {
                    self.request_neighbors(addr64, next, queue);
                }
            }
            Some(message) => tracing::debug!(
                "neighbor table of {} unavailable: status {:?}",
                addr64,
                message.status()
            ),
            None => tracing::debug!("no neighbor table from {}", addr64),
        }
        self.scan_request_done(queue);
    }

    fn record_neighbors(
        &mut self,
        addr64: NetworkAddress64,
        page: &TablePage<Neighbor>,
        queue: &mut Scheduler<Step>,
    ) {
        if let Some(node) = self.registry.get_mut(addr64) {
            if page.start_index == 0 {
                node.links.neighbors.clear();
            }
            node.links.neighbors.extend(page.entries.iter().map(|n| NeighborLink {
                addr64: n.addr64,
                addr16: n.addr16,
                device_type: n.device_type,
                relationship: n.relationship,
                lqi: n.lqi,
            }));
        }

        for neighbor in &page.entries {
            if Some(neighbor.addr64) == self.coordinator
                || neighbor.addr64 == NetworkAddress64::UNKNOWN
                || neighbor.addr64.value() == 0
            {
                continue;
            }
            let (node, _) = self.registry.get_or_insert(neighbor.addr64, neighbor.addr16);
            match neighbor.rx_on_when_idle {
                0 => node.set_rx_on_when_idle(false),
                1 => node.set_rx_on_when_idle(true),
                _ => {}
            }
            if neighbor.is_router() && self.scan.visited.insert(neighbor.addr64) {
                self.request_neighbors(neighbor.addr64, 0, queue);
                self.request_routes(neighbor.addr64, 0, queue);
            }
        }
        self.schedule_save();
    }

    pub(super) fn on_routing_table(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        match management_message(frame) {
            Some(ZdoMessage::RoutingTableResponse(page))
                if page.status == zdo_status::SUCCESS =>
            {
                if let Some(node) = self.registry.get_mut(addr64) {
                    if page.start_index == 0 {
                        node.links.routes.clear();
                    }
                    node.links.routes.extend(page.entries.iter().map(|r| RouteLink {
                        destination: r.destination,
                        next_hop: r.next_hop,
                        status: r.status,
                    }));
                }
                if let Some(next) = page.next_index() {
                    self.request_routes(addr64, next, queue);
                }
            }
            // Many routers do not implement the routing table request.
            Some(message) => tracing::debug!(
                "routing table of {} unavailable: status {:?}",
                addr64,
                message.status()
            ),
            None => tracing::debug!("no routing table from {}", addr64),
        }
        self.scan_request_done(queue);
    }

    fn scan_request_done(&mut self, queue: &mut Scheduler<Step>) {
        self.scan.pending = self.scan.pending.saturating_sub(1);
        if self.scan.pending > 0 || !self.scan.active {
            return;
        }
        self.scan.active = false;
        self.scan.visited.clear();
        let nodes = self.registry.iter().filter(|n| !n.is_coordinator).count();
        tracing::info!("network scan complete, {} nodes", nodes);
        self.platform.event(Event::ScanComplete { nodes });
        self.schedule_save();
        self.populate_all(queue);
    }

    pub(super) fn populate_all(&mut self, queue: &mut Scheduler<Step>) {
        for addr64 in self.registry.addresses() {
            self.populate(addr64, queue);
        }
    }

    /// Moves a node one step further through discovery, or into binding once ready.
    pub(super) fn populate(&mut self, addr64: NetworkAddress64, queue: &mut Scheduler<Step>) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if node.is_coordinator || node.removed {
            return;
        }
        if node.discovery == DiscoveryState::Ready && !node.all_endpoints_primed() {
            node.discovery = DiscoveryState::EndpointsKnown;
        }
        let discovery = node.discovery;
        match discovery {
            DiscoveryState::Unknown => self.request_active_endpoints(addr64, queue),
            DiscoveryState::EndpointsRequested { .. } => {}
            DiscoveryState::EndpointsKnown => self.advance_endpoints(addr64, queue),
            DiscoveryState::Ready => {
                self.ensure_added(addr64);
                if !self.scan.active {
                    self.rebind(addr64, queue);
                }
            }
        }
    }

    fn request_active_endpoints(
        &mut self,
        addr64: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        let attempts = match node.discovery {
            DiscoveryState::EndpointsRequested { attempts } => attempts.saturating_add(1),
            _ => 1,
        };
        node.discovery = DiscoveryState::EndpointsRequested { attempts };
        let addr16 = node.addr16;
        tracing::debug!("requesting endpoints of {} (attempt {})", addr64, attempts);

        let (frame, tsn) =
            self.management(addr64, addr16, ZdoMessage::ActiveEndpointsRequest { addr16 });
        let matcher = FrameMatcher::management(
            Some(addr64),
            zdo_cluster::ACTIVE_ENDPOINTS_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        // Retries are counted per node, not per wait.
        let wait = self
            .wait(addr64, matcher)
            .retry_max(1)
            .on_either(Step::ActiveEndpoints { addr64 });
        exchange(queue, frame, wait, None);
    }

    pub(super) fn on_active_endpoints(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        match management_message(frame) {
            Some(ZdoMessage::ActiveEndpointsResponse {
                status, endpoints, ..
            }) if *status == zdo_status::SUCCESS => {
                tracing::debug!("{} has endpoints {:?}", addr64, endpoints);
                for &id in endpoints {
                    node.endpoints.entry(id).or_insert_with(|| Endpoint::new(id));
                }
                node.discovery = DiscoveryState::EndpointsKnown;
                self.schedule_save();
                self.advance_endpoints(addr64, queue);
            }
            _ => {
                let attempts = match node.discovery {
                    DiscoveryState::EndpointsRequested { attempts } => attempts,
                    _ => 0,
                };
                if attempts < self.config.endpoint_retry_max {
                    self.request_active_endpoints(addr64, queue);
                } else {
                    tracing::warn!(
                        "{} did not report its endpoints after {} attempts",
                        addr64,
                        attempts
                    );
                    node.discovery = DiscoveryState::Unknown;
                }
            }
        }
    }

    /// Requests whatever each endpoint still lacks; marks the node ready once all are primed.
    pub(super) fn advance_endpoints(
        &mut self,
        addr64: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        let mut descriptors = Vec::new();
        let mut classifiers = Vec::new();
        for endpoint in node.endpoints.values_mut() {
            match endpoint.phase {
                EndpointPhase::NeedsDescriptor => {
                    endpoint.phase = EndpointPhase::DescriptorRequested;
                    descriptors.push(endpoint.id);
                }
                EndpointPhase::NeedsClassifier => match endpoint.missing_classifier_attribute() {
                    Some((cluster_id, attr_id)) => {
                        endpoint.phase = EndpointPhase::ClassifierRequested;
                        classifiers.push((endpoint.id, cluster_id, attr_id));
                    }
                    None => endpoint.phase = EndpointPhase::Primed,
                },
                EndpointPhase::DescriptorRequested
                | EndpointPhase::ClassifierRequested
                | EndpointPhase::Primed => {}
            }
        }
        let primed = node.all_endpoints_primed();

        for endpoint in descriptors {
            self.request_descriptor(addr64, endpoint, queue);
        }
        for (endpoint, cluster_id, attr_id) in classifiers {
            self.request_classifier(addr64, endpoint, cluster_id, attr_id, queue);
        }
        if primed {
            self.node_ready(addr64, queue);
        }
    }

    fn request_descriptor(
        &mut self,
        addr64: NetworkAddress64,
        endpoint: u8,
        queue: &mut Scheduler<Step>,
    ) {
        let addr16 = self.addr16_of(addr64);
        let (frame, tsn) = self.management(
            addr64,
            addr16,
            ZdoMessage::SimpleDescriptorRequest { addr16, endpoint },
        );
        let matcher = FrameMatcher::management(
            Some(addr64),
            zdo_cluster::SIMPLE_DESCRIPTOR_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        let wait = self
            .wait(addr64, matcher)
            .on_either(Step::Descriptor { addr64, endpoint });
        exchange(queue, frame, wait, None);
    }

    pub(super) fn on_descriptor(
        &mut self,
        addr64: NetworkAddress64,
        endpoint_id: u8,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(endpoint) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.endpoints.get_mut(&endpoint_id))
        else {
            return;
        };
        match management_message(frame) {
            Some(ZdoMessage::SimpleDescriptorResponse {
                status,
                descriptor: Some(descriptor),
                ..
            }) if *status == zdo_status::SUCCESS => {
                tracing::debug!(
                    "{} endpoint {}: profile {} device {} in {:?}",
                    addr64,
                    endpoint_id,
                    hex_id(descriptor.profile_id),
                    hex_id(descriptor.device_id),
                    descriptor.input_clusters
                );
                endpoint.descriptor = Some(Descriptor {
                    profile_id: descriptor.profile_id,
                    device_id: descriptor.device_id,
                    input_clusters: descriptor.input_clusters.clone(),
                    output_clusters: descriptor.output_clusters.clone(),
                });
                endpoint.restore_phase();
                self.schedule_save();
                self.advance_endpoints(addr64, queue);
            }
            _ => {
                tracing::warn!("no descriptor for {} endpoint {}", addr64, endpoint_id);
                endpoint.phase = EndpointPhase::NeedsDescriptor;
            }
        }
    }

    fn request_classifier(
        &mut self,
        addr64: NetworkAddress64,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        queue: &mut Scheduler<Step>,
    ) {
        let Some((frame, sequence)) = self.application(addr64, endpoint, cluster_id, |sequence| {
            ZclFrame::global(sequence, ZclCommand::ReadAttributes(vec![attr_id]))
        }) else {
            return;
        };
        let matcher = FrameMatcher::application(addr64, endpoint, cluster_id, sequence);
        let wait = self.wait(addr64, matcher).on_either(Step::Classifier {
            addr64,
            endpoint,
            cluster_id,
        });
        exchange(queue, frame, wait, None);
    }

    pub(super) fn on_classifier(
        &mut self,
        addr64: NetworkAddress64,
        endpoint_id: u8,
        cluster_id: u16,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(endpoint) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.endpoints.get_mut(&endpoint_id))
        else {
            return;
        };
        let value = match (endpoint.missing_classifier_attribute(), zcl_command(frame)) {
            (Some((_, attr_id)), Some(ZclCommand::ReadAttributesResponse(records))) => {
                read_value(records, attr_id)
                    .and_then(AttributeValue::as_u64)
                    .and_then(|v| u16::try_from(v).ok())
            }
            _ => None,
        };
        if value.is_none() {
            tracing::debug!(
                "{} endpoint {}: no classifier value for {}, using fallback",
                addr64,
                endpoint_id,
                hex_id(cluster_id)
            );
        }
        endpoint.set_classifier_attribute(cluster_id, value);
        endpoint.restore_phase();
        self.schedule_save();
        self.advance_endpoints(addr64, queue);
    }

    fn node_ready(&mut self, addr64: NetworkAddress64, queue: &mut Scheduler<Step>) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if node.discovery != DiscoveryState::Ready {
            classifier::classify(node);
            node.discovery = DiscoveryState::Ready;
            tracing::info!("node {} ready as {:?}", addr64, node.kind);
            self.schedule_save();
        }
        self.ensure_added(addr64);
        if !self.scan.active {
            self.rebind(addr64, queue);
        }
    }

    /// Exposes a ready node to the platform, once.
    pub(super) fn ensure_added(&mut self, addr64: NetworkAddress64) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if node.added || node.is_coordinator {
            return;
        }
        node.added = true;
        self.platform.add_device(node);
    }
}
