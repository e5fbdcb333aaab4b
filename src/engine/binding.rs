//! The binding loop.
//!
//! A ready node is brought to `Bound` one step per pass: learn its short
//! address, bind poll control checkins, enroll its alarm zone, then for each
//! property bind, configure reporting and read the initial value. Every step
//! ends in a continuation that marks the node `Required` and runs the next
//! pass, so exactly one step per node is ever in flight.

use crate::protocol::cluster::{self, attr, cmd, zone};
use crate::protocol::zcl::status as zcl_status;
use crate::protocol::zdo::{cluster as zdo_cluster, status as zdo_status};
use crate::protocol::{
    ApiFrame, AttributeRecord, AttributeValue, BindDestination, BindTarget, DataType, InboundFrame,
    NetworkAddress16, NetworkAddress64, ReportingConfig, TypedValue, ZclCommand, ZclFrame,
    ZdoMessage,
};
use crate::scheduler::{Command, FrameMatcher, Outbound, Scheduler};
use crate::types::{BindingState, DiscoveryState, Node, ZoneInfo};

use super::{Core, Step, exchange, management_message, read_value, zcl_command};

/// The next thing a node needs before it counts as bound.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Work {
    Address,
    Checkin,
    Zone,
    Property(String),
}

fn next_work(node: &Node, coordinator: NetworkAddress64) -> Option<Work> {
    if node.addr16.is_unknown() {
        Some(Work::Address)
    } else if node.needs_checkin_bind() {
        Some(Work::Checkin)
    } else if node.needs_zone_enrollment(coordinator) {
        Some(Work::Zone)
    } else {
        node.properties
            .values()
            .find(|p| p.flags.has_work())
            .map(|p| Work::Property(p.name.clone()))
    }
}

/// Reportable change in the attribute's own type.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn reportable_change(data_type: DataType, change: f64) -> AttributeValue {
    match data_type {
        DataType::Float32 => AttributeValue::Float(change as f32),
        signed if signed.is_signed() => AttributeValue::Signed(change.round() as i64),
        _ => AttributeValue::Unsigned(change.max(0.0).round() as u64),
    }
}

fn succeeded(frame: Option<&InboundFrame>) -> bool {
    frame.is_some_and(InboundFrame::is_success)
}

impl Core {
    /// Runs one pass of the binding loop for a node.
    pub(super) fn rebind(&mut self, addr64: NetworkAddress64, queue: &mut Scheduler<Step>) {
        let Some(coordinator) = self.coordinator else {
            tracing::debug!("coordinator address unknown, not binding {}", addr64);
            return;
        };
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if node.is_coordinator
            || node.removed
            || node.discovery != DiscoveryState::Ready
            || node.binding == BindingState::InProgress
        {
            return;
        }

        let work = if node.needs_rebind(coordinator) {
            next_work(node, coordinator)
        } else {
            None
        };
        let Some(work) = work else {
            if node.binding != BindingState::Bound {
                node.binding = BindingState::Bound;
                tracing::info!("node {} bound", addr64);
                self.schedule_save();
            }
            return;
        };

        node.binding = BindingState::InProgress;
        tracing::debug!("binding {}: {:?}", addr64, work);
        match work {
            Work::Address => self.request_address(addr64, queue),
            Work::Checkin => self.bind_checkin(addr64, coordinator, queue),
            Work::Zone => self.enroll_zone(addr64, coordinator, queue),
            Work::Property(name) => self.configure_property(addr64, &name, coordinator, queue),
        }
    }

    /// Marks the node ready for another pass and runs it.
    fn continue_binding(&mut self, addr64: NetworkAddress64, queue: &mut Scheduler<Step>) {
        if let Some(node) = self.registry.get_mut(addr64) {
            node.binding = BindingState::Required;
        }
        self.schedule_save();
        self.rebind(addr64, queue);
    }

    /// Leaves the node `Required` until it is heard from again.
    pub(super) fn abandon_rebind(&mut self, addr64: NetworkAddress64) {
        if let Some(node) = self.registry.get_mut(addr64) {
            if node.binding == BindingState::InProgress {
                node.binding = BindingState::Required;
            }
            tracing::debug!("binding of {} paused until it is heard from", addr64);
        }
    }

    fn bind_request(
        &mut self,
        addr64: NetworkAddress64,
        endpoint: u8,
        cluster_id: u16,
        coordinator: NetworkAddress64,
    ) -> (ApiFrame, u8) {
        let addr16 = self.addr16_of(addr64);
        let target = BindTarget {
            source: addr64,
            source_endpoint: endpoint,
            cluster_id,
            destination: BindDestination::Device {
                addr64: coordinator,
                endpoint: self.config.gateway_endpoint,
            },
        };
        self.management(addr64, addr16, ZdoMessage::BindRequest(target))
    }

    fn bind_matcher(addr64: NetworkAddress64, tsn: u8) -> FrameMatcher {
        FrameMatcher::management(
            Some(addr64),
            zdo_cluster::BIND_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        )
    }

    fn request_address(&mut self, addr64: NetworkAddress64, queue: &mut Scheduler<Step>) {
        let request = ZdoMessage::NetworkAddressRequest {
            addr64,
            request_type: 0,
            start_index: 0,
        };
        let (frame, tsn) = self.management(
            NetworkAddress64::BROADCAST,
            NetworkAddress16::BROADCAST_ROUTERS,
            request,
        );
        // Any router that knows the node may answer.
        let matcher = FrameMatcher::management(
            None,
            zdo_cluster::NETWORK_ADDRESS_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        let wait = self
            .wait(addr64, matcher)
            .on_success(Step::AddressLearned { addr64 })
            .on_timeout(Step::RebindAbandoned { addr64 });
        exchange(queue, frame, wait, None);
    }

    pub(super) fn on_address_learned(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let learned = match management_message(frame) {
            Some(ZdoMessage::NetworkAddressResponse(rsp))
                if rsp.status == zdo_status::SUCCESS && rsp.addr64 == addr64 =>
            {
                Some(rsp.addr16)
            }
            _ => None,
        };
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if let Some(addr16) = learned {
            node.update_addr16(addr16);
        }
        if node.addr16.is_unknown() {
            tracing::warn!("short address of {} still unknown", addr64);
            self.abandon_rebind(addr64);
            return;
        }
        self.continue_binding(addr64, queue);
    }

    /// Binds poll control to the gateway, then reads the checkin interval.
    fn bind_checkin(
        &mut self,
        addr64: NetworkAddress64,
        coordinator: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        let endpoint = self
            .registry
            .get(addr64)
            .and_then(|n| n.endpoint_with(cluster::POLL_CONTROL));
        let Some(endpoint) = endpoint else {
            self.abandon_rebind(addr64);
            return;
        };
        let read = self.application(addr64, endpoint, cluster::POLL_CONTROL, |sequence| {
            let attrs = vec![attr::poll_control::CHECKIN_INTERVAL];
            ZclFrame::global(sequence, ZclCommand::ReadAttributes(attrs))
        });
        let Some((read, sequence)) = read else {
            return;
        };
        let read_wait = self
            .wait(
                addr64,
                FrameMatcher::application(addr64, endpoint, cluster::POLL_CONTROL, sequence),
            )
            .on_either(Step::CheckinInterval { addr64 });

        let (bind, tsn) = self.bind_request(addr64, endpoint, cluster::POLL_CONTROL, coordinator);
        let wait = self
            .wait(addr64, Self::bind_matcher(addr64, tsn))
            .on_success(Step::CheckinBound { addr64 })
            .on_timeout(Step::RebindAbandoned { addr64 })
            .send_on_success(vec![
                Command::Send(Outbound::new(read)),
                Command::Wait(read_wait),
            ]);
        exchange(queue, bind, wait, None);
    }

    pub(super) fn on_checkin_bound(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let accepted = succeeded(frame);
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        node.checkin_bound = true;
        if !accepted {
            tracing::warn!("{} rejected the checkin bind, reports are best effort", addr64);
            node.make_fire_and_forget();
        }
        self.continue_binding(addr64, queue);
    }

    pub(super) fn on_checkin_interval(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
    ) {
        let interval = match zcl_command(frame) {
            Some(ZclCommand::ReadAttributesResponse(records)) => {
                read_value(records, attr::poll_control::CHECKIN_INTERVAL)
                    .and_then(AttributeValue::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
            }
            _ => None,
        };
        let Some(interval) = interval else {
            tracing::debug!("checkin interval of {} unavailable", addr64);
            return;
        };
        if let Some(node) = self.registry.get_mut(addr64) {
            tracing::debug!("{} checks in every {} quarter seconds", addr64, interval);
            node.checkin_interval = Some(interval);
            self.schedule_save();
        }
    }

    /// One alarm zone step: read state, point the zone at us, or enroll it.
    fn enroll_zone(
        &mut self,
        addr64: NetworkAddress64,
        coordinator: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get(addr64) else {
            return;
        };
        let Some(endpoint) = node.endpoint_with(cluster::IAS_ZONE) else {
            self.abandon_rebind(addr64);
            return;
        };
        let zone = node.zone.unwrap_or_default();

        if zone.state.is_none() {
            let frame = self.application(addr64, endpoint, cluster::IAS_ZONE, |sequence| {
                let attrs = vec![
                    attr::zone::STATE,
                    attr::zone::TYPE,
                    attr::zone::STATUS,
                    attr::zone::CIE_ADDRESS,
                ];
                ZclFrame::global(sequence, ZclCommand::ReadAttributes(attrs))
            });
            let Some((frame, sequence)) = frame else {
                return;
            };
            let matcher = FrameMatcher::application(addr64, endpoint, cluster::IAS_ZONE, sequence);
            let wait = self
                .wait(addr64, matcher)
                .on_success(Step::ZoneAttributes { addr64 })
                .on_timeout(Step::RebindAbandoned { addr64 });
            exchange(queue, frame, wait, None);
        } else if zone.cie_address != Some(coordinator) {
            let frame = self.application(addr64, endpoint, cluster::IAS_ZONE, |sequence| {
                let record = AttributeRecord {
                    attr_id: attr::zone::CIE_ADDRESS,
                    value: TypedValue::new(
                        DataType::IeeeAddress,
                        AttributeValue::Address(coordinator),
                    ),
                };
                ZclFrame::global(sequence, ZclCommand::WriteAttributes(vec![record]))
            });
            let Some((frame, sequence)) = frame else {
                return;
            };
            let matcher = FrameMatcher::application(addr64, endpoint, cluster::IAS_ZONE, sequence);
            let wait = self
                .wait(addr64, matcher)
                .on_success(Step::ZoneCieWritten { addr64 })
                .on_timeout(Step::RebindAbandoned { addr64 });
            exchange(queue, frame, wait, None);
        } else {
            let frame = self.application(addr64, endpoint, cluster::IAS_ZONE, |sequence| {
                let payload = cluster::enroll_response(zone::ENROLL_SUCCESS, 0);
                ZclFrame::cluster(sequence, cmd::zone::ENROLL_RESPONSE, payload)
            });
            let Some((frame, _)) = frame else {
                return;
            };
            queue.enqueue(
                vec![
                    Command::Send(Outbound::new(frame)),
                    Command::Run(Step::ZoneEnrolled { addr64 }),
                ],
                None,
            );
        }
    }

    pub(super) fn on_zone_attributes(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        let mut zone = node.zone.unwrap_or_default();
        if let Some(ZclCommand::ReadAttributesResponse(records)) = zcl_command(frame) {
            let number = |attr_id| read_value(records, attr_id).and_then(AttributeValue::as_u64);
            if let Some(state) = number(attr::zone::STATE).and_then(|v| u8::try_from(v).ok()) {
                zone.state = Some(state);
            }
            if let Some(kind) = number(attr::zone::TYPE).and_then(|v| u16::try_from(v).ok()) {
                zone.zone_type = Some(kind);
            }
            if let Some(status) = number(attr::zone::STATUS).and_then(|v| u16::try_from(v).ok()) {
                zone.status = Some(status);
            }
            if let Some(AttributeValue::Address(cie)) = read_value(records, attr::zone::CIE_ADDRESS)
            {
                zone.cie_address = Some(*cie);
            }
        }
        zone.state.get_or_insert(zone::STATE_NOT_ENROLLED);
        node.zone = Some(zone);
        self.continue_binding(addr64, queue);
    }

    pub(super) fn on_zone_cie_written(
        &mut self,
        addr64: NetworkAddress64,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let accepted = succeeded(frame);
        let coordinator = self.coordinator;
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if !accepted {
            tracing::warn!("{} refused the alarm destination", addr64);
            self.abandon_rebind(addr64);
            return;
        }
        node.zone.get_or_insert_with(ZoneInfo::default).cie_address = coordinator;
        self.continue_binding(addr64, queue);
    }

    pub(super) fn on_zone_enrolled(
        &mut self,
        addr64: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        if self.transmit_failed {
            self.abandon_rebind(addr64);
            return;
        }
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        let zone = node.zone.get_or_insert_with(ZoneInfo::default);
        zone.state = Some(zone::STATE_ENROLLED);
        zone.zone_id = Some(0);
        tracing::info!("{} enrolled as alarm zone", addr64);
        self.continue_binding(addr64, queue);
    }

    /// One property step: bind, configure reporting, or the initial read.
    fn configure_property(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        coordinator: NetworkAddress64,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(property) = self
            .registry
            .get(addr64)
            .and_then(|n| n.properties.get(name))
        else {
            self.abandon_rebind(addr64);
            return;
        };
        let endpoint = property.endpoint;
        let cluster_id = property.cluster_id;
        let flags = property.flags;
        let data_type = property.data_type;
        let thresholds = property.thresholds;
        let attr_ids = property.attr_ids.clone();
        let property = name.to_owned();
        let abandoned = Step::PropertyAbandoned {
            addr64,
            property: property.clone(),
        };

        if flags.needs_bind {
            let (frame, tsn) = self.bind_request(addr64, endpoint, cluster_id, coordinator);
            let wait = self
                .wait(addr64, Self::bind_matcher(addr64, tsn))
                .on_success(Step::PropertyBound { addr64, property })
                .on_timeout(abandoned);
            exchange(queue, frame, wait, None);
        } else if flags.needs_config_report {
            let Some(thresholds) = thresholds else {
                if let Some(p) = self
                    .registry
                    .get_mut(addr64)
                    .and_then(|n| n.properties.get_mut(name))
                {
                    p.flags.needs_config_report = false;
                }
                self.continue_binding(addr64, queue);
                return;
            };
            let configs: Vec<_> = attr_ids
                .iter()
                .map(|&attr_id| ReportingConfig {
                    attr_id,
                    data_type,
                    min_interval: thresholds.min_interval,
                    max_interval: thresholds.max_interval,
                    reportable_change: data_type.is_analog().then(|| {
                        reportable_change(data_type, thresholds.reportable_change.unwrap_or(0.0))
                    }),
                })
                .collect();
            let frame = self.application(addr64, endpoint, cluster_id, |sequence| {
                ZclFrame::global(sequence, ZclCommand::ConfigureReporting(configs))
            });
            let Some((frame, sequence)) = frame else {
                return;
            };
            let matcher = FrameMatcher::application(addr64, endpoint, cluster_id, sequence);
            let wait = self
                .wait(addr64, matcher)
                .on_success(Step::ReportingConfigured { addr64, property })
                .on_timeout(abandoned);
            exchange(queue, frame, wait, None);
        } else {
            let frame = self.application(addr64, endpoint, cluster_id, |sequence| {
                ZclFrame::global(sequence, ZclCommand::ReadAttributes(attr_ids))
            });
            let Some((frame, sequence)) = frame else {
                return;
            };
            let matcher = FrameMatcher::application(addr64, endpoint, cluster_id, sequence);
            let wait = self
                .wait(addr64, matcher)
                .on_success(Step::InitialRead { addr64, property })
                .on_timeout(abandoned);
            exchange(queue, frame, wait, None);
        }
    }

    pub(super) fn on_property_bound(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let accepted = succeeded(frame);
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        if accepted {
            // One bind covers every property on the same endpoint and cluster.
            if let Some((endpoint, cluster_id)) =
                node.properties.get(name).map(|p| (p.endpoint, p.cluster_id))
            {
                for property in node
                    .properties
                    .values_mut()
                    .filter(|p| p.endpoint == endpoint && p.cluster_id == cluster_id)
                {
                    property.flags.needs_bind = false;
                }
            }
        } else {
            tracing::warn!("{} rejected a bind, all reports are best effort", addr64);
            node.make_fire_and_forget();
        }
        self.continue_binding(addr64, queue);
    }

    pub(super) fn on_reporting_configured(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        frame: Option<&InboundFrame>,
        queue: &mut Scheduler<Step>,
    ) {
        let accepted = match zcl_command(frame) {
            Some(ZclCommand::ConfigureReportingResponse(records)) => {
                records.iter().all(|r| r.status == zcl_status::SUCCESS)
            }
            Some(ZclCommand::DefaultResponse { status, .. }) => *status == zcl_status::SUCCESS,
            _ => false,
        };
        if let Some(property) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.properties.get_mut(name))
        {
            if accepted {
                property.flags.needs_config_report = false;
            } else {
                tracing::warn!("{} refused report configuration of {}", addr64, name);
                property.make_fire_and_forget();
            }
        }
        self.continue_binding(addr64, queue);
    }

    pub(super) fn on_initial_read(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        queue: &mut Scheduler<Step>,
    ) {
        // The values themselves were applied when the response was dispatched.
        if let Some(property) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.properties.get_mut(name))
        {
            property.flags.needs_initial_read = false;
        }
        self.continue_binding(addr64, queue);
    }

    /// A property step got no answer; drop that step so the loop moves on.
    pub(super) fn on_property_abandoned(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        queue: &mut Scheduler<Step>,
    ) {
        tracing::warn!("{} did not answer while configuring {}", addr64, name);
        if let Some(property) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.properties.get_mut(name))
        {
            if property.flags.needs_bind || property.flags.needs_config_report {
                property.make_fire_and_forget();
            } else {
                property.flags.needs_initial_read = false;
            }
        }
        if self.transmit_failed {
            self.abandon_rebind(addr64);
        } else {
            self.continue_binding(addr64, queue);
        }
    }
}
