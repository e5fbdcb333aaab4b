//! Application requests: property writes, pairing windows and removal.

use std::time::Duration;

use bytes::Bytes;

use crate::config::MAX_PAIRING_SECONDS;
use crate::error::Error;
use crate::event::Event;
use crate::protocol::api::LOCAL_PERMIT_JOIN;
use crate::protocol::zdo::{cluster as zdo_cluster, status as zdo_status};
use crate::protocol::{
    InboundFrame, NetworkAddress16, NetworkAddress64, ZclCommand, ZclFrame, ZdoMessage,
};
use crate::scheduler::{Command, FrameMatcher, Outbound, Scheduler, WriteTarget};
use crate::types::{Completion, PropertyValue, WriteRequest};

use super::{Core, PRIORITY_REQUEST, Step, exchange, failure_status, management_message};

impl Core {
    pub(super) fn set_value(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        value: PropertyValue,
        done: Completion,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get(addr64) else {
            let _ = done.send(Err(Error::UnknownNode { addr64 }));
            return;
        };
        let Some(property) = node.properties.get(name) else {
            let _ = done.send(Err(Error::UnknownProperty {
                addr64,
                property: name.to_owned(),
            }));
            return;
        };
        let request = match property.encode_write(&value) {
            Ok(request) => request,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };
        let endpoint = property.endpoint;
        let cluster_id = property.cluster_id;
        let fire_and_forget = property.flags.fire_and_forget;

        let frame = self.application(addr64, endpoint, cluster_id, |sequence| match request {
            WriteRequest::Command {
                command_id,
                payload,
            } => ZclFrame::cluster(sequence, command_id, payload),
            WriteRequest::Attributes(records) => {
                ZclFrame::global(sequence, ZclCommand::WriteAttributes(records))
            }
        });
        let Some((frame, sequence)) = frame else {
            return;
        };
        if let Some(property) = self
            .registry
            .get_mut(addr64)
            .and_then(|n| n.properties.get_mut(name))
        {
            property.resolve_write(Err(Error::Protocol {
                message: format!("write to {name} superseded"),
            }));
            property.pending_write = Some(done);
            property.pending_value = Some(value.clone());
        }

        tracing::debug!("writing {} = {} on {}", name, value, addr64);
        let property = name.to_owned();
        let commands = if fire_and_forget {
            vec![
                Command::Send(Outbound::new(frame)),
                Command::CompleteWrite(WriteTarget { addr64, property }),
            ]
        } else {
            let matcher = FrameMatcher::application(addr64, endpoint, cluster_id, sequence);
            let wait = self.wait(addr64, matcher).on_either(Step::Write {
                addr64,
                property,
                value,
            });
            vec![Command::Send(Outbound::new(frame)), Command::Wait(wait)]
        };
        queue.enqueue(commands, PRIORITY_REQUEST);
    }

    pub(super) fn on_write(
        &mut self,
        addr64: NetworkAddress64,
        name: &str,
        value: PropertyValue,
        frame: Option<&InboundFrame>,
    ) {
        let timeout_ms = self.exchange_timeout_ms(addr64);
        let transmit_failed = self.transmit_failed;
        let Some(node) = self.registry.get_mut(addr64) else {
            return;
        };
        let Some(property) = node.properties.get_mut(name) else {
            return;
        };

        let mut changed = false;
        let result = match frame {
            Some(frame) if frame.is_success() => {
                changed = property.set_cached(value);
                Ok(())
            }
            Some(frame) => Err(Error::Protocol {
                message: format!(
                    "{addr64} rejected write to {name}: status 0x{:02x}",
                    failure_status(frame)
                ),
            }),
            None if transmit_failed => Err(Error::ChannelSend),
            None => Err(Error::Timeout { timeout_ms }),
        };
        if let Err(e) = &result {
            tracing::warn!("write to {} on {} failed: {}", name, addr64, e);
        }
        property.resolve_write(result);

        if changed {
            if let Some(property) = node.properties.get(name) {
                self.platform.property_changed(node, property);
            }
            self.schedule_save();
        }
    }

    /// Resolves a write to a node that never confirms.
    pub(super) fn finish_unconfirmed_write(&mut self, target: &WriteTarget) {
        let result = if self.transmit_failed {
            Err(Error::ChannelSend)
        } else {
            Ok(())
        };
        if let Some(property) = self
            .registry
            .get_mut(target.addr64)
            .and_then(|n| n.properties.get_mut(&target.property))
        {
            property.resolve_write(result);
        }
    }

    pub(super) fn start_pairing(&mut self, seconds: u8, queue: &mut Scheduler<Step>) {
        let seconds = seconds.min(MAX_PAIRING_SECONDS);
        if seconds == 0 {
            self.cancel_pairing(queue);
            return;
        }
        self.permit_join(seconds, queue);
        self.pairing_until = Some(self.now + Duration::from_secs(u64::from(seconds)));
        tracing::info!("pairing open for {} s", seconds);
        self.platform.event(Event::PairingStarted { seconds });
    }

    pub(super) fn cancel_pairing(&mut self, queue: &mut Scheduler<Step>) {
        self.permit_join(0, queue);
        self.pairing_until = None;
        tracing::info!("pairing closed");
        self.platform.event(Event::PairingEnded);
    }

    /// Opens or closes joining on every router and on the coordinator itself.
    fn permit_join(&mut self, seconds: u8, queue: &mut Scheduler<Step>) {
        let request = ZdoMessage::PermitJoinRequest {
            duration: seconds,
            trust_center_significance: 1,
        };
        let (broadcast, _) = self.management(
            NetworkAddress64::BROADCAST,
            NetworkAddress16::BROADCAST_ROUTERS,
            request,
        );
        let (local, _) = self.local_command(LOCAL_PERMIT_JOIN, Bytes::copy_from_slice(&[seconds]));
        queue.enqueue(
            vec![
                Command::Send(Outbound::new(broadcast)),
                Command::Send(Outbound::new(local)),
            ],
            PRIORITY_REQUEST,
        );
    }

    pub(super) fn remove_device(
        &mut self,
        addr64: NetworkAddress64,
        done: Completion,
        queue: &mut Scheduler<Step>,
    ) {
        let Some(node) = self.registry.get(addr64) else {
            let _ = done.send(Err(Error::UnknownNode { addr64 }));
            return;
        };
        if node.is_coordinator {
            let _ = done.send(Err(Error::Protocol {
                message: "the coordinator cannot leave its own network".into(),
            }));
            return;
        }
        if self.removals.contains_key(&addr64) {
            let _ = done.send(Err(Error::Busy { addr64 }));
            return;
        }
        let addr16 = node.addr16;
        let (frame, tsn) =
            self.management(addr64, addr16, ZdoMessage::LeaveRequest { addr64, flags: 0 });
        let matcher = FrameMatcher::management(
            Some(addr64),
            zdo_cluster::LEAVE_REQUEST | zdo_cluster::RESPONSE,
            tsn,
        );
        let wait = self.wait(addr64, matcher).on_either(Step::Leave { addr64 });
        self.removals.insert(addr64, done);
        tracing::info!("asking {} to leave", addr64);
        exchange(queue, frame, wait, PRIORITY_REQUEST);
    }

    pub(super) fn on_leave(&mut self, addr64: NetworkAddress64, frame: Option<&InboundFrame>) {
        let result = match management_message(frame) {
            Some(ZdoMessage::LeaveResponse { status }) if *status == zdo_status::SUCCESS => {
                self.evict(addr64);
                Ok(())
            }
            Some(message) => Err(Error::Protocol {
                message: format!(
                    "{addr64} refused to leave: status 0x{:02x}",
                    message.status().unwrap_or(zdo_status::NOT_SUPPORTED)
                ),
            }),
            None if self.transmit_failed => Err(Error::ChannelSend),
            None => Err(Error::Timeout {
                timeout_ms: self.exchange_timeout_ms(addr64),
            }),
        };
        if let Some(done) = self.removals.remove(&addr64) {
            let _ = done.send(result);
        }
    }

    fn evict(&mut self, addr64: NetworkAddress64) {
        let Some(mut node) = self.registry.remove(addr64) else {
            return;
        };
        node.removed = true;
        for property in node.properties.values_mut() {
            property.resolve_write(Err(Error::UnknownNode { addr64 }));
        }
        tracing::info!("node {} left the network", addr64);
        if node.added {
            self.platform.remove_device(addr64);
        }
        self.schedule_save();
    }
}
