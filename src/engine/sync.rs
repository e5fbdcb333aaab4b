//! Unsolicited traffic: announcements, reports, checkins and zone commands.

use serde_json::json;

use crate::event::{Event, Platform};
use crate::protocol::cluster::{self, ZoneEnrollRequest, ZoneStatusChange, attr, cmd, zone};
use crate::protocol::zcl::{ZclFrameType, status as zcl_status};
use crate::protocol::zdo::{self, status as zdo_status};
use crate::protocol::{
    ApiFrame, AttributeValue, ExplicitFrame, ManagementFrame, NetworkAddress16, NetworkAddress64,
    Source, ZclCommand, ZclFrame, ZclHeader, ZdoMessage, hex_id,
};
use crate::scheduler::Scheduler;
use crate::types::{BindingState, Node, ZoneInfo};

use super::{Core, PRIORITY_REPLY, Step, send};

impl Core {
    pub(super) fn on_management(
        &mut self,
        source: &Source,
        frame: &ManagementFrame,
        queue: &mut Scheduler<Step>,
    ) {
        match &frame.message {
            ZdoMessage::DeviceAnnouncement {
                addr16,
                addr64,
                capability,
            } => self.on_announcement(*addr64, *addr16, *capability, queue),
            ZdoMessage::NetworkAddressResponse(rsp) | ZdoMessage::IeeeAddressResponse(rsp)
                if rsp.status == zdo_status::SUCCESS =>
            {
                if let Some(node) = self.registry.get_mut(rsp.addr64) {
                    if node.update_addr16(rsp.addr16) {
                        self.schedule_save();
                    }
                }
            }
            ZdoMessage::MatchDescriptorRequest {
                input_clusters,
                output_clusters,
                ..
            } => {
                let wants_zone = input_clusters.contains(&cluster::IAS_ZONE)
                    || output_clusters.contains(&cluster::IAS_ZONE);
                if wants_zone {
                    self.answer_match_descriptor(source, frame.tsn, queue);
                }
            }
            message if message.is_response() => tracing::trace!(
                "management response {} from {}",
                hex_id(message.cluster_id()),
                source.addr64
            ),
            message => tracing::debug!(
                "ignoring management request {} from {}",
                hex_id(message.cluster_id()),
                source.addr64
            ),
        }
    }

    fn on_announcement(
        &mut self,
        addr64: NetworkAddress64,
        addr16: NetworkAddress16,
        capability: u8,
        queue: &mut Scheduler<Step>,
    ) {
        if Some(addr64) == self.coordinator {
            return;
        }
        let (node, _) = self.registry.get_or_insert(addr64, addr16);
        node.set_rx_on_when_idle(capability & zdo::capability::RX_ON_WHEN_IDLE != 0);
        if node.binding == BindingState::Bound {
            node.binding = BindingState::Required;
        }
        tracing::info!("{} announced itself at {}", addr64, addr16);
        self.platform.event(Event::DeviceEvent {
            addr64,
            name: "announce".into(),
            data: json!({ "addr16": addr16.to_string(), "capability": capability }),
        });
        self.schedule_save();
        self.populate(addr64, queue);
    }

    /// Tells an alarm device that the gateway serves alarm zones.
    fn answer_match_descriptor(&mut self, source: &Source, tsn: u8, queue: &mut Scheduler<Step>) {
        tracing::debug!("{} is looking for an alarm server", source.addr64);
        let message = ZdoMessage::MatchDescriptorResponse {
            status: zdo_status::SUCCESS,
            addr16: self.coordinator16,
            endpoints: vec![self.config.gateway_endpoint],
        };
        // Replies carry the requester's conversation id.
        let frame = self.management_with(tsn, source.addr64, source.addr16, message);
        send(queue, frame, PRIORITY_REPLY);
    }

    pub(super) fn on_application_frame(
        &mut self,
        source: &Source,
        profile_id: u16,
        cluster_id: u16,
        frame: &ZclFrame,
        queue: &mut Scheduler<Step>,
    ) {
        if !self.registry.contains(source.addr64) {
            if Some(source.addr64) == self.coordinator {
                return;
            }
            tracing::info!("application traffic from unknown node {}", source.addr64);
            self.registry.get_or_insert(source.addr64, source.addr16);
            self.schedule_save();
            self.populate(source.addr64, queue);
            return;
        }

        match (frame.header.frame_type, &frame.command) {
            (ZclFrameType::Global, ZclCommand::ReadAttributesResponse(records)) => {
                for record in records {
                    match &record.value {
                        Some(value) if record.status == zcl_status::SUCCESS => self
                            .apply_attribute(
                                source,
                                profile_id,
                                cluster_id,
                                record.attr_id,
                                &value.value,
                            ),
                        _ if record.status == zcl_status::UNSUPPORTED_ATTRIBUTE => self
                            .unsupported_attribute(source, profile_id, cluster_id, record.attr_id),
                        _ => tracing::debug!(
                            "{} could not read {}/{}: status 0x{:02x}",
                            source.addr64,
                            hex_id(cluster_id),
                            hex_id(record.attr_id),
                            record.status
                        ),
                    }
                }
            }
            (ZclFrameType::Global, ZclCommand::ReportAttributes(records)) => {
                for record in records {
                    self.apply_attribute(
                        source,
                        profile_id,
                        cluster_id,
                        record.attr_id,
                        &record.value.value,
                    );
                }
            }
            (ZclFrameType::ClusterSpecific, ZclCommand::Raw(payload)) => {
                let header = frame.header;
                self.on_cluster_command(source, profile_id, cluster_id, header, payload, queue);
            }
            (_, command) => tracing::trace!(
                "{} cluster {}: {:?}",
                source.addr64,
                hex_id(cluster_id),
                command
            ),
        }
    }

    /// Feeds one attribute value into every property it matches.
    fn apply_attribute(
        &mut self,
        source: &Source,
        profile_id: u16,
        cluster_id: u16,
        attr_id: u16,
        value: &AttributeValue,
    ) {
        let Some(node) = self.registry.get_mut(source.addr64) else {
            return;
        };
        let names = node.matching_properties(profile_id, source.endpoint, cluster_id, attr_id);
        if names.is_empty() {
            self.diagnostics.unmatched_attributes += 1;
            tracing::trace!(
                "{} endpoint {}: no property for {}/{}",
                source.addr64,
                source.endpoint,
                hex_id(cluster_id),
                hex_id(attr_id)
            );
            return;
        }

        let mut changed = false;
        for name in names {
            let Some(property) = node.properties.get_mut(&name) else {
                continue;
            };
            match property.apply(attr_id, value) {
                Some(updated) => {
                    property.confirm_if_reported();
                    if updated {
                        changed = true;
                        notify(self.platform.as_mut(), node, &name);
                    }
                }
                None => tracing::debug!("cannot decode {:?} for {}", value, name),
            }
        }
        if changed {
            self.schedule_save();
        }
    }

    /// The node lacks an attribute: fall back to the default and stop asking.
    fn unsupported_attribute(
        &mut self,
        source: &Source,
        profile_id: u16,
        cluster_id: u16,
        attr_id: u16,
    ) {
        let Some(node) = self.registry.get_mut(source.addr64) else {
            return;
        };
        let names = node.matching_properties(profile_id, source.endpoint, cluster_id, attr_id);
        for name in names {
            let Some(property) = node.properties.get_mut(&name) else {
                continue;
            };
            tracing::debug!("{} does not support {}", source.addr64, name);
            property.make_fire_and_forget();
            property.flags.needs_initial_read = false;
            let updated = property
                .default_value
                .clone()
                .is_some_and(|default| property.set_cached(default));
            if updated {
                notify(self.platform.as_mut(), node, &name);
            }
        }
        self.schedule_save();
    }

    fn on_cluster_command(
        &mut self,
        source: &Source,
        profile_id: u16,
        cluster_id: u16,
        header: ZclHeader,
        payload: &[u8],
        queue: &mut Scheduler<Step>,
    ) {
        match (cluster_id, header.command_id) {
            (cluster::POLL_CONTROL, cmd::poll_control::CHECKIN) => {
                self.on_checkin(source, profile_id, header.sequence, queue);
            }
            (cluster::IAS_ZONE, cmd::zone::STATUS_CHANGE_NOTIFICATION) => {
                match ZoneStatusChange::decode(payload) {
                    Ok(change) => self.on_zone_status(source, profile_id, change),
                    Err(e) => tracing::warn!("bad zone status from {}: {}", source.addr64, e),
                }
            }
            (cluster::IAS_ZONE, cmd::zone::ENROLL_REQUEST) => {
                match ZoneEnrollRequest::decode(payload) {
                    Ok(request) => self.on_enroll_request(source, profile_id, request, queue),
                    Err(e) => tracing::warn!("bad enroll request from {}: {}", source.addr64, e),
                }
            }
            (cluster_id, command_id) => tracing::debug!(
                "ignoring command 0x{:02x} on {} from {}",
                command_id,
                hex_id(cluster_id),
                source.addr64
            ),
        }
    }

    /// A frame answering a device on the endpoint it spoke from.
    fn reply_to(
        &mut self,
        source: &Source,
        cluster_id: u16,
        profile_id: u16,
        zcl: &ZclFrame,
    ) -> ApiFrame {
        self.explicit(ExplicitFrame {
            frame_id: 0,
            addr64: source.addr64,
            addr16: source.addr16,
            source_endpoint: self.config.gateway_endpoint,
            destination_endpoint: source.endpoint,
            cluster_id,
            profile_id,
            radius: 0,
            options: 0,
            payload: zcl.encode(),
        })
    }

    fn on_checkin(
        &mut self,
        source: &Source,
        profile_id: u16,
        sequence: u8,
        queue: &mut Scheduler<Step>,
    ) {
        tracing::debug!("checkin from {}", source.addr64);
        // The node keeps its radio on only briefly; answer ahead of everything else.
        let response = ZclFrame::cluster(
            sequence,
            cmd::poll_control::CHECKIN_RESPONSE,
            cluster::checkin_response(),
        );
        let frame = self.reply_to(source, cluster::POLL_CONTROL, profile_id, &response);
        send(queue, frame, PRIORITY_REPLY);
        self.platform.event(Event::DeviceEvent {
            addr64: source.addr64,
            name: "checkin".into(),
            data: serde_json::Value::Null,
        });
        self.populate(source.addr64, queue);
    }

    fn on_zone_status(&mut self, source: &Source, profile_id: u16, change: ZoneStatusChange) {
        tracing::debug!(
            "zone status of {} is 0x{:04x}",
            source.addr64,
            change.zone_status
        );
        if let Some(node) = self.registry.get_mut(source.addr64) {
            node.zone.get_or_insert_with(ZoneInfo::default).status = Some(change.zone_status);
        }
        self.apply_attribute(
            source,
            profile_id,
            cluster::IAS_ZONE,
            attr::zone::STATUS,
            &AttributeValue::Unsigned(u64::from(change.zone_status)),
        );
    }

    fn on_enroll_request(
        &mut self,
        source: &Source,
        profile_id: u16,
        request: ZoneEnrollRequest,
        queue: &mut Scheduler<Step>,
    ) {
        tracing::info!(
            "{} asks to enroll as zone type 0x{:04x}",
            source.addr64,
            request.zone_type
        );
        let Some(node) = self.registry.get_mut(source.addr64) else {
            return;
        };
        let sequence = node.next_sequence();
        let zone = node.zone.get_or_insert_with(ZoneInfo::default);
        zone.zone_type = Some(request.zone_type);
        zone.state = Some(zone::STATE_ENROLLED);
        zone.zone_id = Some(0);

        let response = ZclFrame::cluster(
            sequence,
            cmd::zone::ENROLL_RESPONSE,
            cluster::enroll_response(zone::ENROLL_SUCCESS, 0),
        );
        let frame = self.reply_to(source, cluster::IAS_ZONE, profile_id, &response);
        send(queue, frame, PRIORITY_REPLY);
        self.schedule_save();
    }
}

fn notify(platform: &mut dyn Platform, node: &Node, name: &str) {
    if let Some(property) = node.properties.get(name) {
        platform.property_changed(node, property);
    }
}
