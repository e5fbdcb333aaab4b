//! The coordinator engine.
//!
//! [`Engine`] owns the node registry, the command scheduler and every
//! collaborator. It is a synchronous state machine driven by three inputs:
//! bytes from the radio, application requests and timer expiry. Nothing in
//! here blocks; the async [`Gateway`](crate::Gateway) runs an engine inside a
//! single task, which serializes all registry access.
//!
//! Multi-step exchanges are written as continuations: a wait carries a
//! [`Step`] that runs once, with the matching frame or after the retry budget
//! is spent.

mod binding;
mod discovery;
mod requests;
mod sync;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::event::{Event, Platform};
use crate::persist::{Debouncer, SnapshotStore};
use crate::protocol::zcl::{ReadRecord, status as zcl_status};
use crate::protocol::zdo::{ZDO_ENDPOINT, ZDO_PROFILE};
use crate::protocol::{
    ApiFrame, AttributeValue, ExplicitFrame, FrameDecoder, HA_PROFILE, InboundFrame, LocalFrame,
    ManagementFrame, NetworkAddress16, NetworkAddress64, SequenceCounter, ZclCommand, ZclFrame,
    ZdoMessage,
};
use crate::registry::Registry;
use crate::scheduler::{
    Command, Executor, FrameMatcher, Outbound, Priority, Scheduler, WaitSpec, WriteTarget,
};
use crate::types::{Completion, Endpoint, NodeInfo, PropertyValue};

/// Replies the network is waiting on go ahead of everything else.
const PRIORITY_REPLY: Priority = Some(0);

/// Application requests go ahead of background discovery.
const PRIORITY_REQUEST: Priority = Some(1);

/// Destination of encoded API frames.
pub trait FrameSink: Send {
    /// Hands one API frame payload to the link layer.
    fn send_frame(&mut self, payload: Bytes) -> Result<()>;
}

impl FrameSink for mpsc::Sender<Bytes> {
    fn send_frame(&mut self, payload: Bytes) -> Result<()> {
        self.try_send(payload).map_err(|_| Error::ChannelSend)
    }
}

/// Counters for traffic the engine dropped or could not use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Attributes that matched no property.
    pub unmatched_attributes: u64,
    /// Transmit status reports with a failed delivery.
    pub delivery_failures: u64,
}

/// Continuations run by the scheduler.
///
/// Each one is attached to a wait and runs exactly once: with the matching
/// frame, or with `None` once the exchange is abandoned.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    CoordinatorAddress64,
    CoordinatorAddress16,
    NeighborTable {
        addr64: NetworkAddress64,
    },
    RoutingTable {
        addr64: NetworkAddress64,
    },
    ActiveEndpoints {
        addr64: NetworkAddress64,
    },
    Descriptor {
        addr64: NetworkAddress64,
        endpoint: u8,
    },
    Classifier {
        addr64: NetworkAddress64,
        endpoint: u8,
        cluster_id: u16,
    },
    AddressLearned {
        addr64: NetworkAddress64,
    },
    CheckinBound {
        addr64: NetworkAddress64,
    },
    CheckinInterval {
        addr64: NetworkAddress64,
    },
    ZoneAttributes {
        addr64: NetworkAddress64,
    },
    ZoneCieWritten {
        addr64: NetworkAddress64,
    },
    ZoneEnrolled {
        addr64: NetworkAddress64,
    },
    PropertyBound {
        addr64: NetworkAddress64,
        property: String,
    },
    ReportingConfigured {
        addr64: NetworkAddress64,
        property: String,
    },
    InitialRead {
        addr64: NetworkAddress64,
        property: String,
    },
    PropertyAbandoned {
        addr64: NetworkAddress64,
        property: String,
    },
    /// A node-level binding step got no answer.
    RebindAbandoned {
        addr64: NetworkAddress64,
    },
    Write {
        addr64: NetworkAddress64,
        property: String,
        value: PropertyValue,
    },
    Leave {
        addr64: NetworkAddress64,
    },
}

#[derive(Debug, Default)]
struct ScanState {
    active: bool,
    /// Table requests still unanswered.
    pending: usize,
    /// Routers whose tables were requested.
    visited: HashSet<NetworkAddress64>,
}

/// Protocol state; the scheduler drives it through [`Executor`].
struct Core {
    config: CoordinatorConfig,
    registry: Registry,
    platform: Box<dyn Platform>,
    store: Box<dyn SnapshotStore>,
    sink: Box<dyn FrameSink>,
    decoder: FrameDecoder,
    tsn: SequenceCounter,
    frame_ids: SequenceCounter,
    coordinator: Option<NetworkAddress64>,
    coordinator16: NetworkAddress16,
    scan: ScanState,
    pairing_until: Option<Instant>,
    saves: Debouncer,
    diagnostics: Diagnostics,
    removals: HashMap<NetworkAddress64, Completion>,
    /// Outcome of the most recent transmission.
    transmit_failed: bool,
    now: Instant,
}

/// A coordinator instance: one registry, one scheduler, one radio.
pub struct Engine {
    scheduler: Scheduler<Step>,
    core: Core,
}

impl Engine {
    /// Creates an engine; nothing is sent until [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        platform: Box<dyn Platform>,
        store: Box<dyn SnapshotStore>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(config.wait_timeout, config.extended_timeout),
            core: Core {
                registry: Registry::new(),
                platform,
                store,
                sink,
                decoder: FrameDecoder::new(),
                tsn: SequenceCounter::new(),
                frame_ids: SequenceCounter::new(),
                coordinator: None,
                coordinator16: NetworkAddress16::COORDINATOR,
                scan: ScanState::default(),
                pairing_until: None,
                saves: Debouncer::new(config.effective_save_debounce()),
                diagnostics: Diagnostics::default(),
                removals: HashMap::new(),
                transmit_failed: false,
                now: Instant::now(),
                config,
            },
        }
    }

    fn drive(&mut self, now: Instant, action: impl FnOnce(&mut Core, &mut Scheduler<Step>)) {
        self.core.now = now;
        action(&mut self.core, &mut self.scheduler);
        self.scheduler.run(now, &mut self.core);
    }

    /// Queries the coordinator, restores the snapshot and starts discovery.
    pub fn start(&mut self, now: Instant) {
        self.drive(now, Core::start);
    }

    /// Feeds raw bytes from the serial line.
    pub fn handle_link_bytes(&mut self, bytes: &[u8], now: Instant) {
        self.core.decoder.feed(bytes);
        loop {
            match self.core.decoder.decode() {
                Ok(Some(payload)) => self.handle_payload(&payload, now),
                Ok(None) => break,
                Err(e) => {
                    self.core.diagnostics.decode_errors += 1;
                    tracing::warn!("link frame discarded: {}", e);
                }
            }
        }
    }

    /// Handles one API frame payload, already stripped of link framing.
    pub fn handle_payload(&mut self, payload: &[u8], now: Instant) {
        tracing::trace!("rx {}", hex::encode(payload));
        match InboundFrame::decode(payload) {
            Ok(Some(frame)) => self.handle_frame(&frame, now),
            Ok(None) => {}
            Err(e) => {
                self.core.diagnostics.decode_errors += 1;
                tracing::warn!("discarding undecodable frame: {}", e);
            }
        }
    }

    /// Handles a decoded frame: unsolicited handling first, then the outstanding wait.
    pub fn handle_frame(&mut self, frame: &InboundFrame, now: Instant) {
        self.core.now = now;
        self.core.dispatch(frame, &mut self.scheduler);
        self.scheduler.handle_frame(frame, now, &mut self.core);
        self.scheduler.run(now, &mut self.core);
    }

    /// Expires waits, closes the pairing window and writes due snapshots.
    pub fn handle_timers(&mut self, now: Instant) {
        self.core.now = now;
        self.scheduler.handle_timeout(now, &mut self.core);
        if self.core.pairing_until.is_some_and(|until| until <= now) {
            self.core.pairing_until = None;
            tracing::info!("pairing window closed");
            self.core.platform.event(Event::PairingEnded);
        }
        if self.core.saves.take_due(now) {
            self.core.save();
        }
        self.scheduler.run(now, &mut self.core);
    }

    /// Reports that a frame accepted by the sink never reached the radio.
    ///
    /// When the outstanding exchange is waiting on that frame it is abandoned
    /// at once; a pending write then resolves with [`Error::ChannelSend`].
    pub fn handle_send_failure(&mut self, payload: &[u8], now: Instant) {
        self.core.now = now;
        let owns_wait = self
            .scheduler
            .outstanding_frame()
            .is_some_and(|sent| sent.frame.encode()[..] == *payload);
        if !owns_wait {
            tracing::debug!("lost frame {} had no exchange waiting", hex::encode(payload));
            return;
        }
        self.core.transmit_failed = true;
        self.scheduler.abandon_outstanding(now, &mut self.core);
        self.core.transmit_failed = false;
    }

    /// Earliest instant at which [`handle_timers`](Self::handle_timers) has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.scheduler.deadline(),
            self.core.saves.deadline(),
            self.core.pairing_until,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Writes a property; `done` resolves on confirmation or abandonment.
    pub fn set_value(
        &mut self,
        addr64: NetworkAddress64,
        property: &str,
        value: PropertyValue,
        done: Completion,
        now: Instant,
    ) {
        self.drive(now, |core, queue| {
            core.set_value(addr64, property, value, done, queue);
        });
    }

    /// Opens the network for joins; clamped to the longest window the network accepts.
    pub fn start_pairing(&mut self, seconds: u8, now: Instant) {
        self.drive(now, |core, queue| core.start_pairing(seconds, queue));
    }

    /// Closes the network for joins.
    pub fn cancel_pairing(&mut self, now: Instant) {
        self.drive(now, Core::cancel_pairing);
    }

    /// Asks a node to leave; it is evicted once it confirms.
    pub fn remove_device(&mut self, addr64: NetworkAddress64, done: Completion, now: Instant) {
        self.drive(now, |core, queue| core.remove_device(addr64, done, queue));
    }

    /// Views of every node except the coordinator.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.core
            .registry
            .iter()
            .filter(|n| !n.is_coordinator)
            .map(crate::types::Node::info)
            .collect()
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.core.registry
    }

    #[must_use]
    pub const fn diagnostics(&self) -> Diagnostics {
        self.core.diagnostics
    }

    /// The coordinator's 64-bit address, once it has answered.
    #[must_use]
    pub const fn coordinator(&self) -> Option<NetworkAddress64> {
        self.core.coordinator
    }

    /// Returns true while the join window is open.
    #[must_use]
    pub const fn is_pairing(&self) -> bool {
        self.core.pairing_until.is_some()
    }

    /// Writes a pending snapshot immediately.
    pub fn flush(&mut self) {
        if self.core.saves.take_pending() {
            self.core.save();
        }
    }
}

impl Core {
    fn schedule_save(&mut self) {
        self.saves.schedule(self.now);
    }

    fn save(&mut self) {
        let snapshot = self.registry.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            tracing::error!("cannot save registry snapshot: {}", e);
        }
    }

    fn addr16_of(&self, addr64: NetworkAddress64) -> NetworkAddress16 {
        self.registry
            .get(addr64)
            .map_or(NetworkAddress16::UNKNOWN, |n| n.addr16)
    }

    /// Time an exchange with this node may take before it is abandoned.
    fn exchange_timeout_ms(&self, addr64: NetworkAddress64) -> u64 {
        let wait = if self.registry.get(addr64).is_some_and(|n| n.extended_timeout) {
            self.config.extended_timeout
        } else {
            self.config.wait_timeout
        };
        let total = wait * u32::from(self.config.retry_max.max(1));
        u64::try_from(total.as_millis()).unwrap_or(u64::MAX)
    }

    /// A wait with the configured retry budget and the node's timeout class.
    fn wait(&self, addr64: NetworkAddress64, matcher: FrameMatcher) -> WaitSpec<Step> {
        let extended = self
            .registry
            .get(addr64)
            .is_some_and(|n| n.extended_timeout);
        WaitSpec::new(matcher)
            .retry_max(self.config.retry_max)
            .extended(extended)
    }

    fn local_command(&mut self, command: [u8; 2], data: Bytes) -> (ApiFrame, u8) {
        let frame_id = self.frame_ids.next();
        let frame = ApiFrame::LocalCommand(LocalFrame {
            frame_id,
            command,
            status: 0,
            data,
        });
        (frame, frame_id)
    }

    fn explicit(&mut self, mut frame: ExplicitFrame) -> ApiFrame {
        frame.frame_id = self.frame_ids.next();
        ApiFrame::ExplicitTx(frame)
    }

    /// A management request with a fresh conversation id.
    fn management(
        &mut self,
        addr64: NetworkAddress64,
        addr16: NetworkAddress16,
        message: ZdoMessage,
    ) -> (ApiFrame, u8) {
        let tsn = self.tsn.next();
        let frame = self.management_with(tsn, addr64, addr16, message);
        (frame, tsn)
    }

    fn management_with(
        &mut self,
        tsn: u8,
        addr64: NetworkAddress64,
        addr16: NetworkAddress16,
        message: ZdoMessage,
    ) -> ApiFrame {
        let (cluster_id, payload) = ManagementFrame::new(tsn, message).encode();
        self.explicit(ExplicitFrame {
            frame_id: 0,
            addr64,
            addr16,
            source_endpoint: ZDO_ENDPOINT,
            destination_endpoint: ZDO_ENDPOINT,
            cluster_id,
            profile_id: ZDO_PROFILE,
            radius: 0,
            options: 0,
            payload,
        })
    }

    /// An application frame to one endpoint of a node, built around the
    /// node's next sequence number. Returns the frame and that sequence.
    fn application(
        &mut self,
        addr64: NetworkAddress64,
        endpoint: u8,
        cluster_id: u16,
        build: impl FnOnce(u8) -> ZclFrame,
    ) -> Option<(ApiFrame, u8)> {
        let node = self.registry.get_mut(addr64)?;
        let sequence = node.next_sequence();
        let profile_id = node
            .endpoints
            .get(&endpoint)
            .and_then(Endpoint::profile_id)
            .unwrap_or(HA_PROFILE);
        let addr16 = node.addr16;
        let payload = build(sequence).encode();
        let frame = self.explicit(ExplicitFrame {
            frame_id: 0,
            addr64,
            addr16,
            source_endpoint: self.config.gateway_endpoint,
            destination_endpoint: endpoint,
            cluster_id,
            profile_id,
            radius: 0,
            options: 0,
            payload,
        });
        Some((frame, sequence))
    }

    /// Routes an inbound frame to its unsolicited handler.
    fn dispatch(&mut self, frame: &InboundFrame, queue: &mut Scheduler<Step>) {
        if let Some(source) = frame.source() {
            if let Some(node) = self.registry.get_mut(source.addr64) {
                node.update_addr16(source.addr16);
            }
        }
        match frame {
            InboundFrame::Management { source, frame } => self.on_management(source, frame, queue),
            InboundFrame::Application {
                source,
                profile_id,
                cluster_id,
                frame,
            } => self.on_application_frame(source, *profile_id, *cluster_id, frame, queue),
            InboundFrame::LocalResponse(local) => tracing::trace!(
                "local response {} status {}",
                String::from_utf8_lossy(&local.command),
                local.status
            ),
            InboundFrame::TxStatus(status) => {
                if status.delivery_status != 0 {
                    self.diagnostics.delivery_failures += 1;
                    tracing::debug!(
                        "frame {} to {} not delivered: status 0x{:02x}",
                        status.frame_id,
                        status.addr16,
                        status.delivery_status
                    );
                }
            }
            InboundFrame::ModemStatus(status) => tracing::info!("radio status 0x{:02x}", status),
        }
    }
}

impl Executor<Step> for Core {
    fn transmit(&mut self, outbound: &Outbound) -> Result<()> {
        let payload = outbound.frame.encode();
        if outbound.resend {
            tracing::debug!("retransmitting {}", hex::encode(&payload));
        } else {
            tracing::trace!("tx {}", hex::encode(&payload));
        }
        let result = self.sink.send_frame(payload);
        self.transmit_failed = result.is_err();
        result
    }

    fn execute(&mut self, step: Step, frame: Option<&InboundFrame>, queue: &mut Scheduler<Step>) {
        tracing::trace!("continuation {:?}", step);
        match step {
            Step::CoordinatorAddress64 => self.on_coordinator_address64(frame, queue),
            Step::CoordinatorAddress16 => self.on_coordinator_address16(frame),
            Step::NeighborTable { addr64 } => self.on_neighbor_table(addr64, frame, queue),
            Step::RoutingTable { addr64 } => self.on_routing_table(addr64, frame, queue),
            Step::ActiveEndpoints { addr64 } => self.on_active_endpoints(addr64, frame, queue),
            Step::Descriptor { addr64, endpoint } => {
                self.on_descriptor(addr64, endpoint, frame, queue);
            }
            Step::Classifier {
                addr64,
                endpoint,
                cluster_id,
            } => self.on_classifier(addr64, endpoint, cluster_id, frame, queue),
            Step::AddressLearned { addr64 } => self.on_address_learned(addr64, frame, queue),
            Step::CheckinBound { addr64 } => self.on_checkin_bound(addr64, frame, queue),
            Step::CheckinInterval { addr64 } => self.on_checkin_interval(addr64, frame),
            Step::ZoneAttributes { addr64 } => self.on_zone_attributes(addr64, frame, queue),
            Step::ZoneCieWritten { addr64 } => self.on_zone_cie_written(addr64, frame, queue),
            Step::ZoneEnrolled { addr64 } => self.on_zone_enrolled(addr64, queue),
            Step::PropertyBound { addr64, property } => {
                self.on_property_bound(addr64, &property, frame, queue);
            }
            Step::ReportingConfigured { addr64, property } => {
                self.on_reporting_configured(addr64, &property, frame, queue);
            }
            Step::InitialRead { addr64, property } => {
                self.on_initial_read(addr64, &property, queue);
            }
            Step::PropertyAbandoned { addr64, property } => {
                self.on_property_abandoned(addr64, &property, queue);
            }
            Step::RebindAbandoned { addr64 } => self.abandon_rebind(addr64),
            Step::Write {
                addr64,
                property,
                value,
            } => self.on_write(addr64, &property, value, frame),
            Step::Leave { addr64 } => self.on_leave(addr64, frame),
        }
    }

    fn complete_write(&mut self, target: WriteTarget) {
        self.finish_unconfirmed_write(&target);
    }
}

/// Queues a request and the wait for its answer.
fn exchange(
    queue: &mut Scheduler<Step>,
    frame: ApiFrame,
    wait: WaitSpec<Step>,
    priority: Priority,
) {
    queue.enqueue(
        vec![Command::Send(Outbound::new(frame)), Command::Wait(wait)],
        priority,
    );
}

/// Queues a frame nobody answers.
fn send(queue: &mut Scheduler<Step>, frame: ApiFrame, priority: Priority) {
    queue.enqueue(vec![Command::Send(Outbound::new(frame))], priority);
}

fn management_message(frame: Option<&InboundFrame>) -> Option<&ZdoMessage> {
    match frame {
        Some(InboundFrame::Management { frame, .. }) => Some(&frame.message),
        _ => None,
    }
}

fn zcl_command(frame: Option<&InboundFrame>) -> Option<&ZclCommand> {
    match frame {
        Some(InboundFrame::Application { frame, .. }) => Some(&frame.command),
        _ => None,
    }
}

/// The value of one successfully read attribute.
fn read_value(records: &[ReadRecord], attr_id: u16) -> Option<&AttributeValue> {
    records
        .iter()
        .find(|r| r.attr_id == attr_id && r.status == zcl_status::SUCCESS)
        .and_then(|r| r.value.as_ref())
        .map(|v| &v.value)
}

/// First failure status carried by a response, for error messages.
fn failure_status(frame: &InboundFrame) -> u8 {
    let status = match frame {
        InboundFrame::Management { frame, .. } => frame.message.status(),
        InboundFrame::Application { frame, .. } => match &frame.command {
            ZclCommand::DefaultResponse { status, .. } => Some(*status),
            ZclCommand::WriteAttributesResponse(records) => records
                .iter()
                .map(|r| r.status)
                .find(|s| *s != zcl_status::SUCCESS),
            ZclCommand::ConfigureReportingResponse(records) => records
                .iter()
                .map(|r| r.status)
                .find(|s| *s != zcl_status::SUCCESS),
            _ => None,
        },
        _ => None,
    };
    status.unwrap_or(zcl_status::FAILURE)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::event::{EventDispatcher, Subscription};
    use crate::persist::MemoryStore;
    use crate::protocol::api::{LOCAL_PERMIT_JOIN, LOCAL_READ_ADDRESS64};
    use crate::protocol::cluster::{self, attr, cmd, zone};
    use crate::protocol::zcl::{ConfigureStatus, DataType, WriteStatus, ZclFrameType, ZclHeader};
    use crate::protocol::zdo::{
        Neighbor, SimpleDescriptor, TablePage, cluster as zdo_cluster, device_type,
        status as zdo_status,
    };
    use crate::protocol::{AttributeRecord, Source, TypedValue};
    use crate::types::{BindingState, Descriptor, DiscoveryState, Node};

    const COORDINATOR: NetworkAddress64 = NetworkAddress64::new(0x0013_A200_0000_0001);
    const LIGHT: NetworkAddress64 = NetworkAddress64::new(0x0013_A200_4052_1F3B);
    const LIGHT16: NetworkAddress16 = NetworkAddress16::new(0x1001);

    struct Harness {
        engine: Engine,
        sent: mpsc::Receiver<Bytes>,
        events: Subscription,
        now: Instant,
    }

    impl Harness {
        fn with_store(config: CoordinatorConfig, store: MemoryStore) -> Self {
            let (tx, sent) = mpsc::channel(64);
            let dispatcher = EventDispatcher::new(64);
            let events = dispatcher.subscribe();
            let mut engine =
                Engine::new(config, Box::new(dispatcher), Box::new(store), Box::new(tx));
            let now = Instant::now();
            engine.core.now = now;
            Self {
                engine,
                sent,
                events,
                now,
            }
        }

        /// An engine that already knows its coordinator and skips the scan.
        fn ready() -> Self {
            let config = CoordinatorConfig::new().scan_on_start(false);
            let mut harness = Self::with_store(config, MemoryStore::new());
            harness.engine.core.coordinator = Some(COORDINATOR);
            harness
        }

        fn insert(&mut self, node: Node) {
            let (slot, _) = self
                .engine
                .core
                .registry
                .get_or_insert(node.addr64, node.addr16);
            *slot = node;
        }

        fn node(&self, addr64: NetworkAddress64) -> &Node {
            self.engine.registry().get(addr64).unwrap()
        }

        fn sent(&mut self) -> Vec<ApiFrame> {
            let mut frames = Vec::new();
            while let Ok(payload) = self.sent.try_recv() {
                frames.push(ApiFrame::decode(&payload).unwrap());
            }
            frames
        }

        fn explicit(&mut self) -> Vec<ExplicitFrame> {
            self.sent()
                .into_iter()
                .filter_map(|frame| match frame {
                    ApiFrame::ExplicitTx(frame) => Some(frame),
                    _ => None,
                })
                .collect()
        }

        fn single(&mut self) -> ExplicitFrame {
            let mut frames = self.explicit();
            assert_eq!(frames.len(), 1, "expected one frame, got {frames:?}");
            frames.remove(0)
        }

        fn events(&mut self) -> Vec<Event> {
            std::iter::from_fn(|| self.events.try_recv()).collect()
        }

        /// Answers the most recent local command.
        fn reply_local(&mut self, data: &[u8]) {
            let Some(ApiFrame::LocalCommand(request)) = self.sent().pop() else {
                panic!("no local command outstanding");
            };
            let frame = InboundFrame::LocalResponse(LocalFrame {
                frame_id: request.frame_id,
                command: request.command,
                status: 0,
                data: Bytes::copy_from_slice(data),
            });
            self.engine.handle_frame(&frame, self.now);
        }

        fn reply_management(&mut self, request: &ExplicitFrame, message: ZdoMessage) {
            let frame = InboundFrame::Management {
                source: Source {
                    addr64: request.addr64,
                    addr16: request.addr16,
                    endpoint: ZDO_ENDPOINT,
                },
                frame: ManagementFrame::new(request.payload[0], message),
            };
            self.engine.handle_frame(&frame, self.now);
        }

        fn reply_zcl(&mut self, request: &ExplicitFrame, command: ZclCommand) {
            let sequence = decode_zcl(request).header.sequence;
            let mut zcl = ZclFrame::global(sequence, command);
            zcl.header = zcl.header.from_server();
            let source = Source {
                addr64: request.addr64,
                addr16: request.addr16,
                endpoint: request.destination_endpoint,
            };
            self.receive(source, request.cluster_id, zcl);
        }

        fn receive(&mut self, source: Source, cluster_id: u16, frame: ZclFrame) {
            let frame = InboundFrame::Application {
                source,
                profile_id: HA_PROFILE,
                cluster_id,
                frame,
            };
            self.engine.handle_frame(&frame, self.now);
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.engine.handle_timers(self.now);
        }
    }

    fn decode_zcl(frame: &ExplicitFrame) -> ZclFrame {
        ZclFrame::decode(&frame.payload).unwrap()
    }

    fn light_source() -> Source {
        Source {
            addr64: LIGHT,
            addr16: LIGHT16,
            endpoint: 1,
        }
    }

    /// A discovered node with one endpoint serving `clusters`.
    fn light(clusters: &[u16]) -> Node {
        let mut node = Node::new(LIGHT, LIGHT16);
        let mut endpoint = Endpoint::new(1);
        endpoint.descriptor = Some(Descriptor {
            profile_id: HA_PROFILE,
            device_id: 0x0100,
            input_clusters: clusters.to_vec(),
            output_clusters: Vec::new(),
        });
        endpoint.restore_phase();
        node.endpoints.insert(1, endpoint);
        crate::classifier::classify(&mut node);
        node.discovery = DiscoveryState::Ready;
        node
    }

    fn neighbor(addr64: NetworkAddress64, addr16: u16, device_type: u8, rx_on: u8) -> Neighbor {
        Neighbor {
            extended_pan_id: 0,
            addr64,
            addr16: NetworkAddress16::new(addr16),
            device_type,
            rx_on_when_idle: rx_on,
            relationship: 1,
            permit_joining: 0,
            depth: 1,
            lqi: 200,
        }
    }

    fn bool_value(value: bool) -> Option<TypedValue> {
        Some(TypedValue::new(DataType::Bool, AttributeValue::Bool(value)))
    }

    #[test]
    fn test_start_reads_identity_then_scans() {
        let mut h = Harness::with_store(CoordinatorConfig::new(), MemoryStore::new());
        h.engine.start(h.now);
        h.reply_local(&COORDINATOR.to_wire());
        h.reply_local(&[0x00, 0x00]);
        assert_eq!(h.engine.coordinator(), Some(COORDINATOR));

        let router = NetworkAddress64::new(0x0013_A200_0000_00AA);
        let sensor = NetworkAddress64::new(0x0013_A200_0000_00BB);
        let lqi = h.single();
        assert_eq!(lqi.cluster_id, zdo_cluster::LQI_REQUEST);
        h.reply_management(
            &lqi,
            ZdoMessage::LqiResponse(TablePage {
                status: zdo_status::SUCCESS,
                total: 2,
                start_index: 0,
                entries: vec![
                    neighbor(router, 0x2001, device_type::ROUTER, 1),
                    neighbor(sensor, 0x2002, device_type::END_DEVICE, 0),
                ],
            }),
        );

        let routes = h.single();
        assert_eq!(routes.cluster_id, zdo_cluster::ROUTING_TABLE_REQUEST);
        assert_eq!(routes.addr64, COORDINATOR);
        h.reply_management(
            &routes,
            ZdoMessage::RoutingTableResponse(TablePage {
                status: zdo_status::NOT_SUPPORTED,
                total: 0,
                start_index: 0,
                entries: Vec::new(),
            }),
        );

        // The router's own tables are walked next.
        let lqi = h.single();
        assert_eq!(lqi.addr64, router);
        h.reply_management(
            &lqi,
            ZdoMessage::LqiResponse(TablePage {
                status: zdo_status::SUCCESS,
                total: 0,
                start_index: 0,
                entries: Vec::new(),
            }),
        );
        let routes = h.single();
        assert_eq!(routes.addr64, router);
        h.reply_management(
            &routes,
            ZdoMessage::RoutingTableResponse(TablePage {
                status: zdo_status::NOT_SUPPORTED,
                total: 0,
                start_index: 0,
                entries: Vec::new(),
            }),
        );

        assert!(h.events().contains(&Event::ScanComplete { nodes: 2 }));
        assert!(h.node(sensor).extended_timeout);
        assert!(!h.node(router).extended_timeout);
        let request = h.single();
        assert_eq!(request.cluster_id, zdo_cluster::ACTIVE_ENDPOINTS_REQUEST);
        assert_eq!(request.addr64, router);
    }

    #[test]
    fn test_identity_requests_go_out_first() {
        let mut h = Harness::with_store(CoordinatorConfig::new(), MemoryStore::new());
        h.engine.start(h.now);
        let frames = h.sent();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ApiFrame::LocalCommand(local) if local.command == LOCAL_READ_ADDRESS64
        ));
    }

    #[test]
    fn test_discovery_classifies_unknown_sender() {
        let mut h = Harness::ready();
        let report = ZclFrame::global(
            5,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: attr::on_off::ON_OFF,
                value: TypedValue::new(DataType::Bool, AttributeValue::Bool(true)),
            }]),
        );
        h.receive(light_source(), cluster::ON_OFF, report);

        let request = h.single();
        assert_eq!(request.cluster_id, zdo_cluster::ACTIVE_ENDPOINTS_REQUEST);
        h.reply_management(
            &request,
            ZdoMessage::ActiveEndpointsResponse {
                status: zdo_status::SUCCESS,
                addr16: LIGHT16,
                endpoints: vec![1],
            },
        );

        let request = h.single();
        assert_eq!(request.cluster_id, zdo_cluster::SIMPLE_DESCRIPTOR_REQUEST);
        h.reply_management(
            &request,
            ZdoMessage::SimpleDescriptorResponse {
                status: zdo_status::SUCCESS,
                addr16: LIGHT16,
                descriptor: Some(SimpleDescriptor {
                    endpoint: 1,
                    profile_id: HA_PROFILE,
                    device_id: 0x0102,
                    device_version: 1,
                    input_clusters: vec![cluster::ON_OFF, cluster::COLOR_CONTROL],
                    output_clusters: Vec::new(),
                }),
            },
        );

        let request = h.single();
        assert_eq!(request.cluster_id, cluster::COLOR_CONTROL);
        assert_eq!(
            decode_zcl(&request).command,
            ZclCommand::ReadAttributes(vec![attr::color::CAPABILITIES])
        );
        h.reply_zcl(
            &request,
            ZclCommand::ReadAttributesResponse(vec![ReadRecord {
                attr_id: attr::color::CAPABILITIES,
                status: zcl_status::UNSUPPORTED_ATTRIBUTE,
                value: None,
            }]),
        );

        let node = h.node(LIGHT);
        assert_eq!(node.discovery, DiscoveryState::Ready);
        assert!(node.properties.contains_key("on"));
        assert!(node.properties.contains_key("color"));
        assert!(
            h.events()
                .iter()
                .any(|e| matches!(e, Event::DeviceAdded(info) if info.addr64 == LIGHT))
        );
        let bind = h.single();
        assert_eq!(bind.cluster_id, zdo_cluster::BIND_REQUEST);
    }

    #[test]
    fn test_binding_runs_one_step_at_a_time() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));

        let bind = h.single();
        assert_eq!(bind.cluster_id, zdo_cluster::BIND_REQUEST);
        assert_eq!(h.node(LIGHT).binding, BindingState::InProgress);
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));
        assert!(h.explicit().is_empty());

        h.reply_management(
            &bind,
            ZdoMessage::BindResponse {
                status: zdo_status::SUCCESS,
            },
        );
        let configure = h.single();
        let ZclCommand::ConfigureReporting(configs) = decode_zcl(&configure).command else {
            panic!("expected a reporting configuration");
        };
        assert_eq!(configs[0].max_interval, 300);
        assert_eq!(configs[0].reportable_change, None);

        h.reply_zcl(
            &configure,
            ZclCommand::ConfigureReportingResponse(vec![ConfigureStatus {
                status: zcl_status::SUCCESS,
                direction: 0,
                attr_id: None,
            }]),
        );
        let read = h.single();
        assert_eq!(
            decode_zcl(&read).command,
            ZclCommand::ReadAttributes(vec![attr::on_off::ON_OFF])
        );
        h.reply_zcl(
            &read,
            ZclCommand::ReadAttributesResponse(vec![ReadRecord {
                attr_id: attr::on_off::ON_OFF,
                status: zcl_status::SUCCESS,
                value: bool_value(true),
            }]),
        );

        assert!(h.explicit().is_empty());
        let node = h.node(LIGHT);
        assert_eq!(node.binding, BindingState::Bound);
        assert_eq!(node.properties["on"].value, Some(PropertyValue::Bool(true)));
    }

    #[test]
    fn test_rejected_bind_skips_report_configuration() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF, cluster::LEVEL_CONTROL]));
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));

        let bind = h.single();
        h.reply_management(
            &bind,
            ZdoMessage::BindResponse {
                status: zdo_status::NOT_SUPPORTED,
            },
        );

        let read = h.single();
        assert!(matches!(
            decode_zcl(&read).command,
            ZclCommand::ReadAttributes(_)
        ));
        assert!(h.node(LIGHT).properties.values().all(|p| {
            p.flags.fire_and_forget && !p.flags.needs_bind && !p.flags.needs_config_report
        }));
    }

    #[test]
    fn test_reports_update_matching_properties_only() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let temperature = ZclFrame::global(
            1,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: attr::measurement::MEASURED_VALUE,
                value: TypedValue::new(DataType::Int16, AttributeValue::Signed(2150)),
            }]),
        );
        h.receive(light_source(), cluster::TEMPERATURE_MEASUREMENT, temperature);
        assert_eq!(h.engine.diagnostics().unmatched_attributes, 1);
        assert!(h.events().is_empty());

        let on = ZclFrame::global(
            2,
            ZclCommand::ReportAttributes(vec![AttributeRecord {
                attr_id: attr::on_off::ON_OFF,
                value: TypedValue::new(DataType::Bool, AttributeValue::Bool(true)),
            }]),
        );
        h.receive(light_source(), cluster::ON_OFF, on);
        assert_eq!(
            h.events(),
            vec![Event::PropertyChanged {
                addr64: LIGHT,
                property: "on".into(),
                value: PropertyValue::Bool(true),
            }]
        );
        assert!(h.explicit().is_empty());
    }

    #[test]
    fn test_set_value_resolves_on_confirmation() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "on", PropertyValue::Bool(true), done, h.now);
        let write = h.single();
        assert_eq!(decode_zcl(&write).header.command_id, cmd::on_off::ON);
        assert!(result.try_recv().is_err());

        h.reply_zcl(
            &write,
            ZclCommand::DefaultResponse {
                command_id: cmd::on_off::ON,
                status: zcl_status::SUCCESS,
            },
        );
        assert!(matches!(result.try_recv(), Ok(Ok(()))));
        assert_eq!(
            h.node(LIGHT).properties["on"].value,
            Some(PropertyValue::Bool(true))
        );
    }

    #[test]
    fn test_set_value_rejects_unknown_property() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "brightness", PropertyValue::Number(1.0), done, h.now);
        assert!(matches!(
            result.try_recv(),
            Ok(Err(Error::UnknownProperty { .. }))
        ));
        assert!(h.explicit().is_empty());
    }

    #[test]
    fn test_set_value_times_out_after_retries() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "on", PropertyValue::Bool(false), done, h.now);
        assert_eq!(h.explicit().len(), 1);
        for _ in 0..2 {
            h.advance(Duration::from_secs(11));
            assert_eq!(h.explicit().len(), 1);
        }
        h.advance(Duration::from_secs(11));
        assert!(h.explicit().is_empty());
        assert!(matches!(
            result.try_recv(),
            Ok(Err(Error::Timeout { timeout_ms: 30_000 }))
        ));
    }

    #[test]
    fn test_fire_and_forget_write_resolves_on_transmit() {
        let mut h = Harness::ready();
        let mut node = light(&[cluster::ON_OFF]);
        node.make_fire_and_forget();
        h.insert(node);

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "on", PropertyValue::Bool(true), done, h.now);
        assert_eq!(h.explicit().len(), 1);
        assert!(matches!(result.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let store = MemoryStore::new();
        let mut first = Harness::with_store(CoordinatorConfig::new(), store.clone());
        let mut node = light(&[cluster::ON_OFF]);
        if let Some(on) = node.properties.get_mut("on") {
            on.value = Some(PropertyValue::Bool(true));
        }
        first.insert(node);
        first.engine.drive(first.now, |core, _| core.schedule_save());
        assert_eq!(store.contents(), None);
        first.engine.flush();
        let saved = store.contents().unwrap();

        let config = CoordinatorConfig::new().scan_on_start(false);
        let mut second = Harness::with_store(config, store.clone());
        second.engine.start(second.now);
        assert!(matches!(
            second.events().as_slice(),
            [Event::DeviceAdded(info)] if info.addr64 == LIGHT
        ));
        assert_eq!(
            second.node(LIGHT).properties["on"].value,
            Some(PropertyValue::Bool(true))
        );

        second.engine.drive(second.now, |core, _| core.schedule_save());
        second.engine.flush();
        assert_eq!(store.contents().unwrap(), saved);
    }

    #[test]
    fn test_saves_are_debounced() {
        let store = MemoryStore::new();
        let mut h = Harness::with_store(CoordinatorConfig::new(), store.clone());
        h.engine.drive(h.now, |core, _| core.schedule_save());
        assert_eq!(h.engine.next_deadline(), Some(h.now + Duration::from_secs(120)));

        h.advance(Duration::from_secs(119));
        assert_eq!(store.contents(), None);
        h.advance(Duration::from_secs(1));
        assert!(store.contents().is_some());
        assert_eq!(h.engine.next_deadline(), None);
    }

    #[test]
    fn test_pairing_window_is_clamped_and_expires() {
        let mut h = Harness::ready();
        h.engine.start_pairing(255, h.now);

        let frames = h.sent();
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0],
            ApiFrame::ExplicitTx(frame) if frame.cluster_id == zdo_cluster::PERMIT_JOIN_REQUEST
                && frame.addr16 == NetworkAddress16::BROADCAST_ROUTERS
        ));
        assert!(matches!(
            &frames[1],
            ApiFrame::LocalCommand(local)
                if local.command == LOCAL_PERMIT_JOIN && local.data[..] == [254]
        ));
        assert_eq!(h.events(), vec![Event::PairingStarted { seconds: 254 }]);
        assert!(h.engine.is_pairing());
        assert_eq!(
            h.engine.next_deadline(),
            Some(h.now + Duration::from_secs(254))
        );

        h.advance(Duration::from_secs(254));
        assert!(!h.engine.is_pairing());
        assert_eq!(h.events(), vec![Event::PairingEnded]);
    }

    #[test]
    fn test_remove_device_evicts_after_leave() {
        let mut h = Harness::ready();
        let mut node = light(&[cluster::ON_OFF]);
        node.added = true;
        h.insert(node);

        let (done, mut result) = oneshot::channel();
        h.engine.remove_device(LIGHT, done, h.now);
        let leave = h.single();
        assert_eq!(leave.cluster_id, zdo_cluster::LEAVE_REQUEST);
        h.reply_management(
            &leave,
            ZdoMessage::LeaveResponse {
                status: zdo_status::SUCCESS,
            },
        );

        assert!(matches!(result.try_recv(), Ok(Ok(()))));
        assert!(h.engine.registry().get(LIGHT).is_none());
        assert_eq!(h.events(), vec![Event::DeviceRemoved { addr64: LIGHT }]);
    }

    #[test]
    fn test_checkin_is_answered_before_binding() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::POLL_CONTROL]));

        let checkin = ZclFrame {
            header: ZclHeader::cluster(9, cmd::poll_control::CHECKIN).from_server(),
            command: ZclCommand::Raw(Bytes::new()),
        };
        h.receive(light_source(), cluster::POLL_CONTROL, checkin);

        let frames = h.explicit();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].cluster_id, cluster::POLL_CONTROL);
        let response = decode_zcl(&frames[0]);
        assert_eq!(response.header.sequence, 9);
        assert_eq!(response.header.command_id, cmd::poll_control::CHECKIN_RESPONSE);
        assert_eq!(frames[1].cluster_id, zdo_cluster::BIND_REQUEST);
    }

    #[test]
    fn test_enroll_request_is_accepted() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let request = ZclFrame {
            header: ZclHeader::cluster(7, cmd::zone::ENROLL_REQUEST).from_server(),
            command: ZclCommand::Raw(Bytes::from_static(&[0x0D, 0x00, 0x00, 0x00])),
        };
        h.receive(light_source(), cluster::IAS_ZONE, request);

        let response = h.single();
        assert_eq!(response.cluster_id, cluster::IAS_ZONE);
        let zcl = decode_zcl(&response);
        assert_eq!(zcl.header.command_id, cmd::zone::ENROLL_RESPONSE);
        assert_eq!(zcl.command, ZclCommand::Raw(Bytes::from_static(&[0x00, 0x00])));
        let zone_info = h.node(LIGHT).zone.unwrap();
        assert_eq!(zone_info.state, Some(zone::STATE_ENROLLED));
        assert_eq!(zone_info.zone_type, Some(zone::TYPE_MOTION));
    }

    #[test]
    fn test_endpoint_discovery_gives_up() {
        let config = CoordinatorConfig::new()
            .scan_on_start(false)
            .endpoint_retry_max(3);
        let mut h = Harness::with_store(config, MemoryStore::new());
        h.engine.core.coordinator = Some(COORDINATOR);
        h.insert(Node::new(LIGHT, LIGHT16));
        h.engine.drive(h.now, |core, queue| core.populate(LIGHT, queue));

        for _ in 0..3 {
            let request = h.single();
            assert_eq!(request.cluster_id, zdo_cluster::ACTIVE_ENDPOINTS_REQUEST);
            h.advance(Duration::from_secs(11));
        }
        assert!(h.explicit().is_empty());
        assert_eq!(h.node(LIGHT).discovery, DiscoveryState::Unknown);
    }

    fn status_record(attr_id: u16, data_type: DataType, value: AttributeValue) -> ReadRecord {
        ReadRecord {
            attr_id,
            status: zcl_status::SUCCESS,
            value: Some(TypedValue::new(data_type, value)),
        }
    }

    /// A colour light whose capabilities are already known.
    fn color_light() -> Node {
        let mut node = light(&[cluster::COLOR_CONTROL]);
        if let Some(endpoint) = node.endpoints.get_mut(&1) {
            endpoint.color_capabilities = Some(0x0001);
        }
        crate::classifier::classify(&mut node);
        node
    }

    /// Binds the colour light and returns its reporting configuration request.
    fn bind_color_light(h: &mut Harness) -> ExplicitFrame {
        h.insert(color_light());
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));
        let bind = h.single();
        h.reply_management(
            &bind,
            ZdoMessage::BindResponse {
                status: zdo_status::SUCCESS,
            },
        );
        h.single()
    }

    #[test]
    fn test_report_with_wide_attribute_still_applies() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::HUMIDITY_MEASUREMENT]));

        let zcl = [
            0x18, 0x05, 0x0A, // report header
            0x10, 0x00, 0x25, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // uint48, no property
            0x00, 0x00, 0x21, 0x88, 0x13, // measured value 5000
        ];
        let rx = ApiFrame::ExplicitRx(ExplicitFrame {
            frame_id: 0,
            addr64: LIGHT,
            addr16: LIGHT16,
            source_endpoint: 1,
            destination_endpoint: h.engine.core.config.gateway_endpoint,
            cluster_id: cluster::HUMIDITY_MEASUREMENT,
            profile_id: HA_PROFILE,
            radius: 0,
            options: 0,
            payload: Bytes::copy_from_slice(&zcl),
        });
        h.engine.handle_payload(&rx.encode(), h.now);

        assert_eq!(h.engine.diagnostics().decode_errors, 0);
        assert_eq!(h.engine.diagnostics().unmatched_attributes, 1);
        assert!(h.events().contains(&Event::PropertyChanged {
            addr64: LIGHT,
            property: "humidity".into(),
            value: PropertyValue::Number(50.0),
        }));
    }

    #[test]
    fn test_aggregate_reporting_status_covers_every_attribute() {
        let mut h = Harness::ready();
        let configure = bind_color_light(&mut h);
        let ZclCommand::ConfigureReporting(configs) = decode_zcl(&configure).command else {
            panic!("expected a reporting configuration");
        };
        let attrs: Vec<u16> = configs.iter().map(|c| c.attr_id).collect();
        let color_attrs = vec![attr::color::CURRENT_HUE, attr::color::CURRENT_SATURATION];
        assert_eq!(attrs, color_attrs);

        // One status for the whole request.
        h.reply_zcl(
            &configure,
            ZclCommand::ConfigureReportingResponse(vec![ConfigureStatus {
                status: zcl_status::SUCCESS,
                direction: 0,
                attr_id: None,
            }]),
        );
        let read = h.single();
        assert_eq!(decode_zcl(&read).command, ZclCommand::ReadAttributes(color_attrs));
        let color = &h.node(LIGHT).properties["color"];
        assert!(!color.flags.needs_config_report);
        assert!(!color.flags.fire_and_forget);
    }

    #[test]
    fn test_aggregate_reporting_failure_makes_property_best_effort() {
        let mut h = Harness::ready();
        let configure = bind_color_light(&mut h);
        h.reply_zcl(
            &configure,
            ZclCommand::ConfigureReportingResponse(vec![ConfigureStatus {
                status: zcl_status::UNREPORTABLE_ATTRIBUTE,
                direction: 0,
                attr_id: None,
            }]),
        );

        let read = h.single();
        assert!(matches!(
            decode_zcl(&read).command,
            ZclCommand::ReadAttributes(ids) if ids.len() == 2
        ));
        let color = &h.node(LIGHT).properties["color"];
        assert!(color.flags.fire_and_forget);
        assert!(!color.flags.needs_config_report);
    }

    #[test]
    fn test_unsupported_read_falls_back_to_default() {
        let mut h = Harness::ready();
        let mut node = light(&[cluster::ON_OFF]);
        if let Some(on) = node.properties.get_mut("on") {
            on.flags.needs_bind = false;
            on.flags.needs_config_report = false;
            on.default_value = Some(PropertyValue::Bool(false));
        }
        h.insert(node);
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));

        let read = h.single();
        assert_eq!(
            decode_zcl(&read).command,
            ZclCommand::ReadAttributes(vec![attr::on_off::ON_OFF])
        );
        h.reply_zcl(
            &read,
            ZclCommand::ReadAttributesResponse(vec![ReadRecord {
                attr_id: attr::on_off::ON_OFF,
                status: zcl_status::UNSUPPORTED_ATTRIBUTE,
                value: None,
            }]),
        );

        let node = h.node(LIGHT);
        let on = &node.properties["on"];
        assert!(on.flags.fire_and_forget);
        assert!(!on.flags.needs_initial_read);
        assert_eq!(on.value, Some(PropertyValue::Bool(false)));
        assert_eq!(node.binding, BindingState::Bound);
        assert!(h.explicit().is_empty());
        assert!(h.events().contains(&Event::PropertyChanged {
            addr64: LIGHT,
            property: "on".into(),
            value: PropertyValue::Bool(false),
        }));
    }

    #[test]
    fn test_zone_enrollment_runs_to_bound() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::IAS_ZONE]));
        h.engine.drive(h.now, |core, queue| core.rebind(LIGHT, queue));

        let read = h.single();
        assert_eq!(read.cluster_id, cluster::IAS_ZONE);
        assert_eq!(
            decode_zcl(&read).command,
            ZclCommand::ReadAttributes(vec![
                attr::zone::STATE,
                attr::zone::TYPE,
                attr::zone::STATUS,
                attr::zone::CIE_ADDRESS,
            ])
        );
        h.reply_zcl(
            &read,
            ZclCommand::ReadAttributesResponse(vec![
                status_record(
                    attr::zone::STATE,
                    DataType::Enum8,
                    AttributeValue::Unsigned(u64::from(zone::STATE_NOT_ENROLLED)),
                ),
                status_record(
                    attr::zone::TYPE,
                    DataType::Enum16,
                    AttributeValue::Unsigned(u64::from(zone::TYPE_CONTACT)),
                ),
                status_record(
                    attr::zone::STATUS,
                    DataType::Bitmap16,
                    AttributeValue::Unsigned(0),
                ),
                status_record(
                    attr::zone::CIE_ADDRESS,
                    DataType::IeeeAddress,
                    AttributeValue::Address(NetworkAddress64::new(0)),
                ),
            ]),
        );

        let write = h.single();
        assert_eq!(
            decode_zcl(&write).command,
            ZclCommand::WriteAttributes(vec![AttributeRecord {
                attr_id: attr::zone::CIE_ADDRESS,
                value: TypedValue::new(
                    DataType::IeeeAddress,
                    AttributeValue::Address(COORDINATOR)
                ),
            }])
        );
        h.reply_zcl(
            &write,
            ZclCommand::WriteAttributesResponse(vec![WriteStatus {
                status: zcl_status::SUCCESS,
                attr_id: None,
            }]),
        );

        let mut frames = h.explicit();
        assert_eq!(frames.len(), 2);
        let enroll = decode_zcl(&frames[0]);
        assert_eq!(enroll.header.frame_type, ZclFrameType::ClusterSpecific);
        assert_eq!(enroll.header.command_id, cmd::zone::ENROLL_RESPONSE);
        let zone_info = h.node(LIGHT).zone.unwrap();
        assert_eq!(zone_info.state, Some(zone::STATE_ENROLLED));
        assert_eq!(zone_info.cie_address, Some(COORDINATOR));
        assert_eq!(zone_info.zone_type, Some(zone::TYPE_CONTACT));

        // The zone properties then read their status one by one.
        let mut next = Some(frames.remove(1));
        while let Some(read) = next.take() {
            assert_eq!(
                decode_zcl(&read).command,
                ZclCommand::ReadAttributes(vec![attr::zone::STATUS])
            );
            h.reply_zcl(
                &read,
                ZclCommand::ReadAttributesResponse(vec![status_record(
                    attr::zone::STATUS,
                    DataType::Bitmap16,
                    AttributeValue::Unsigned(0),
                )]),
            );
            next = h.explicit().pop();
        }
        assert_eq!(h.node(LIGHT).binding, BindingState::Bound);
    }

    #[test]
    fn test_lost_frame_fails_the_write_at_once() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "on", PropertyValue::Bool(true), done, h.now);
        let payload = h.sent.try_recv().unwrap();

        // Losing a frame nobody waits on changes nothing.
        h.engine.handle_send_failure(&[0x8A, 0x00], h.now);
        assert!(result.try_recv().is_err());
        assert!(h.engine.next_deadline().is_some());

        h.engine.handle_send_failure(&payload, h.now);
        assert!(matches!(result.try_recv(), Ok(Err(Error::ChannelSend))));
        assert_eq!(h.engine.next_deadline(), None);
    }

    #[test]
    fn test_second_removal_is_rejected_while_first_pending() {
        let mut h = Harness::ready();
        h.insert(light(&[cluster::ON_OFF]));

        let (first, mut first_result) = oneshot::channel();
        h.engine.remove_device(LIGHT, first, h.now);
        let leave = h.single();

        let (second, mut second_result) = oneshot::channel();
        h.engine.remove_device(LIGHT, second, h.now);
        assert!(matches!(
            second_result.try_recv(),
            Ok(Err(Error::Busy { addr64 })) if addr64 == LIGHT
        ));
        assert!(h.explicit().is_empty());

        h.reply_management(
            &leave,
            ZdoMessage::LeaveResponse {
                status: zdo_status::SUCCESS,
            },
        );
        assert!(matches!(first_result.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_stale_report_leaves_write_pending() {
        let mut h = Harness::ready();
        let mut node = light(&[cluster::ON_OFF]);
        if let Some(on) = node.properties.get_mut("on") {
            on.value = Some(PropertyValue::Bool(false));
        }
        h.insert(node);

        let (done, mut result) = oneshot::channel();
        h.engine
            .set_value(LIGHT, "on", PropertyValue::Bool(true), done, h.now);
        assert_eq!(h.explicit().len(), 1);

        let report = |sequence: u8, on: bool| {
            ZclFrame::global(
                sequence,
                ZclCommand::ReportAttributes(vec![AttributeRecord {
                    attr_id: attr::on_off::ON_OFF,
                    value: TypedValue::new(DataType::Bool, AttributeValue::Bool(on)),
                }]),
            )
        };
        h.receive(light_source(), cluster::ON_OFF, report(40, false));
        assert!(result.try_recv().is_err());

        h.receive(light_source(), cluster::ON_OFF, report(41, true));
        assert!(matches!(result.try_recv(), Ok(Ok(()))));
    }
}
