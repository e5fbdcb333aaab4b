//! Device-management frames.
//!
//! Management frames travel on profile 0x0000, endpoint 0. The cluster id
//! selects the kind; responses use the request id with bit 15 set. Every
//! payload starts with a transaction sequence number that correlates a
//! request with its response:
//! ```text
//! [tsn:1] [fields...]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::address::{NetworkAddress16, NetworkAddress64, hex_id};
use crate::protocol::reader::Reader;

/// Profile used by management frames.
pub const ZDO_PROFILE: u16 = 0x0000;

/// Endpoint used by management frames.
pub const ZDO_ENDPOINT: u8 = 0;

/// Management status codes.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_REQUEST_TYPE: u8 = 0x80;
    pub const DEVICE_NOT_FOUND: u8 = 0x81;
    pub const INVALID_ENDPOINT: u8 = 0x82;
    pub const NOT_ACTIVE: u8 = 0x83;
    pub const NOT_SUPPORTED: u8 = 0x84;
    pub const TIMEOUT: u8 = 0x85;
    pub const NO_MATCH: u8 = 0x86;
    pub const NO_ENTRY: u8 = 0x88;
    pub const TABLE_FULL: u8 = 0x8C;
    pub const NOT_AUTHORIZED: u8 = 0x8D;
}

/// Management cluster ids.
pub mod cluster {
    pub const NETWORK_ADDRESS_REQUEST: u16 = 0x0000;
    pub const IEEE_ADDRESS_REQUEST: u16 = 0x0001;
    pub const SIMPLE_DESCRIPTOR_REQUEST: u16 = 0x0004;
    pub const ACTIVE_ENDPOINTS_REQUEST: u16 = 0x0005;
    pub const MATCH_DESCRIPTOR_REQUEST: u16 = 0x0006;
    pub const DEVICE_ANNOUNCEMENT: u16 = 0x0013;
    pub const BIND_REQUEST: u16 = 0x0021;
    pub const UNBIND_REQUEST: u16 = 0x0022;
    pub const LQI_REQUEST: u16 = 0x0031;
    pub const ROUTING_TABLE_REQUEST: u16 = 0x0032;
    pub const LEAVE_REQUEST: u16 = 0x0034;
    pub const PERMIT_JOIN_REQUEST: u16 = 0x0036;

    /// Bit that turns a request id into its response id.
    pub const RESPONSE: u16 = 0x8000;
}

/// MAC capability bits from a device announcement.
pub mod capability {
    pub const ROUTER: u8 = 0x02;
    pub const MAINS_POWERED: u8 = 0x04;
    pub const RX_ON_WHEN_IDLE: u8 = 0x08;
}

/// Leave request flags.
pub mod leave {
    pub const REMOVE_CHILDREN: u8 = 0x40;
    pub const REJOIN: u8 = 0x80;
}

/// Neighbor table device types.
pub mod device_type {
    pub const COORDINATOR: u8 = 0;
    pub const ROUTER: u8 = 1;
    pub const END_DEVICE: u8 = 2;
}

/// Associated device list in an extended address response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedDevices {
    /// Index of the first listed device.
    pub start_index: u8,
    /// Short addresses of associated devices.
    pub devices: Vec<NetworkAddress16>,
}

/// Network- or IEEE-address response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressResponse {
    pub status: u8,
    pub addr64: NetworkAddress64,
    pub addr16: NetworkAddress16,
    /// Present only for extended requests.
    pub associated: Option<AssociatedDevices>,
}

/// Endpoint description from a simple-descriptor response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

/// Where a binding sends its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDestination {
    /// Group address (mode 0x01).
    Group(u16),
    /// Unicast to a device endpoint (mode 0x03).
    Device {
        addr64: NetworkAddress64,
        endpoint: u8,
    },
}

/// Body of bind and unbind requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    pub source: NetworkAddress64,
    pub source_endpoint: u8,
    pub cluster_id: u16,
    pub destination: BindDestination,
}

/// One neighbor table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub extended_pan_id: u64,
    pub addr64: NetworkAddress64,
    pub addr16: NetworkAddress16,
    /// One of the `device_type` constants.
    pub device_type: u8,
    /// 0 = off, 1 = on, 2 = unknown.
    pub rx_on_when_idle: u8,
    /// 0 = parent, 1 = child, 2 = sibling, 3 = none, 4 = previous child.
    pub relationship: u8,
    pub permit_joining: u8,
    pub depth: u8,
    pub lqi: u8,
}

impl Neighbor {
    const WIRE_LEN: usize = 22;

    /// Returns true if the neighbor routes traffic.
    #[must_use]
    pub const fn is_router(&self) -> bool {
        self.device_type == device_type::ROUTER || self.device_type == device_type::COORDINATOR
    }
}

/// One routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: NetworkAddress16,
    /// Route status (0 = active).
    pub status: u8,
    pub next_hop: NetworkAddress16,
}

impl Route {
    const WIRE_LEN: usize = 5;
}

/// A page of a remote table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage<T> {
    pub status: u8,
    /// Total number of entries in the remote table.
    pub total: u8,
    /// Index of the first entry of this page.
    pub start_index: u8,
    pub entries: Vec<T>,
}

impl<T> TablePage<T> {
    /// Index of the first entry after this page, if the table continues.
    #[must_use]
    pub fn next_index(&self) -> Option<u8> {
        let next = usize::from(self.start_index) + self.entries.len();
        (!self.entries.is_empty() && next < usize::from(self.total)).then_some(next as u8)
    }
}

/// Management message bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZdoMessage {
    NetworkAddressRequest {
        addr64: NetworkAddress64,
        request_type: u8,
        start_index: u8,
    },
    NetworkAddressResponse(AddressResponse),
    IeeeAddressRequest {
        addr16: NetworkAddress16,
        request_type: u8,
        start_index: u8,
    },
    IeeeAddressResponse(AddressResponse),
    SimpleDescriptorRequest {
        addr16: NetworkAddress16,
        endpoint: u8,
    },
    SimpleDescriptorResponse {
        status: u8,
        addr16: NetworkAddress16,
        descriptor: Option<SimpleDescriptor>,
    },
    ActiveEndpointsRequest {
        addr16: NetworkAddress16,
    },
    ActiveEndpointsResponse {
        status: u8,
        addr16: NetworkAddress16,
        endpoints: Vec<u8>,
    },
    MatchDescriptorRequest {
        addr16: NetworkAddress16,
        profile_id: u16,
        input_clusters: Vec<u16>,
        output_clusters: Vec<u16>,
    },
    MatchDescriptorResponse {
        status: u8,
        addr16: NetworkAddress16,
        endpoints: Vec<u8>,
    },
    DeviceAnnouncement {
        addr16: NetworkAddress16,
        addr64: NetworkAddress64,
        capability: u8,
    },
    BindRequest(BindTarget),
    BindResponse {
        status: u8,
    },
    UnbindRequest(BindTarget),
    UnbindResponse {
        status: u8,
    },
    LqiRequest {
        start_index: u8,
    },
    LqiResponse(TablePage<Neighbor>),
    RoutingTableRequest {
        start_index: u8,
    },
    RoutingTableResponse(TablePage<Route>),
    LeaveRequest {
        addr64: NetworkAddress64,
        flags: u8,
    },
    LeaveResponse {
        status: u8,
    },
    PermitJoinRequest {
        duration: u8,
        trust_center_significance: u8,
    },
    PermitJoinResponse {
        status: u8,
    },
}

impl ZdoMessage {
    /// Returns the cluster id carrying this message.
    #[must_use]
    pub const fn cluster_id(&self) -> u16 {
        use cluster::{RESPONSE as R, *};
        match self {
            Self::NetworkAddressRequest { .. } => NETWORK_ADDRESS_REQUEST,
            Self::NetworkAddressResponse(_) => NETWORK_ADDRESS_REQUEST | R,
            Self::IeeeAddressRequest { .. } => IEEE_ADDRESS_REQUEST,
            Self::IeeeAddressResponse(_) => IEEE_ADDRESS_REQUEST | R,
            Self::SimpleDescriptorRequest { .. } => SIMPLE_DESCRIPTOR_REQUEST,
            Self::SimpleDescriptorResponse { .. } => SIMPLE_DESCRIPTOR_REQUEST | R,
            Self::ActiveEndpointsRequest { .. } => ACTIVE_ENDPOINTS_REQUEST,
            Self::ActiveEndpointsResponse { .. } => ACTIVE_ENDPOINTS_REQUEST | R,
            Self::MatchDescriptorRequest { .. } => MATCH_DESCRIPTOR_REQUEST,
            Self::MatchDescriptorResponse { .. } => MATCH_DESCRIPTOR_REQUEST | R,
            Self::DeviceAnnouncement { .. } => DEVICE_ANNOUNCEMENT,
            Self::BindRequest(_) => BIND_REQUEST,
            Self::BindResponse { .. } => BIND_REQUEST | R,
            Self::UnbindRequest(_) => UNBIND_REQUEST,
            Self::UnbindResponse { .. } => UNBIND_REQUEST | R,
            Self::LqiRequest { .. } => LQI_REQUEST,
            Self::LqiResponse(_) => LQI_REQUEST | R,
            Self::RoutingTableRequest { .. } => ROUTING_TABLE_REQUEST,
            Self::RoutingTableResponse(_) => ROUTING_TABLE_REQUEST | R,
            Self::LeaveRequest { .. } => LEAVE_REQUEST,
            Self::LeaveResponse { .. } => LEAVE_REQUEST | R,
            Self::PermitJoinRequest { .. } => PERMIT_JOIN_REQUEST,
            Self::PermitJoinResponse { .. } => PERMIT_JOIN_REQUEST | R,
        }
    }

    /// Returns the status of a response, `None` for requests and announcements.
    #[must_use]
    pub const fn status(&self) -> Option<u8> {
        match self {
            Self::NetworkAddressResponse(rsp) | Self::IeeeAddressResponse(rsp) => Some(rsp.status),
            Self::SimpleDescriptorResponse { status, .. }
            | Self::ActiveEndpointsResponse { status, .. }
            | Self::MatchDescriptorResponse { status, .. }
            | Self::BindResponse { status }
            | Self::UnbindResponse { status }
            | Self::LeaveResponse { status }
            | Self::PermitJoinResponse { status } => Some(*status),
            Self::LqiResponse(page) => Some(page.status),
            Self::RoutingTableResponse(page) => Some(page.status),
            _ => None,
        }
    }

    /// Returns true if this is a response.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.cluster_id() & cluster::RESPONSE != 0
    }
}

/// A management frame: conversation id plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementFrame {
    /// Transaction sequence number.
    pub tsn: u8,
    pub message: ZdoMessage,
}

impl ManagementFrame {
    /// Creates a frame.
    #[must_use]
    pub const fn new(tsn: u8, message: ZdoMessage) -> Self {
        Self { tsn, message }
    }

    /// Encodes the frame, returning the cluster id and payload.
    #[must_use]
    pub fn encode(&self) -> (u16, Bytes) {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u8(self.tsn);
        match &self.message {
            ZdoMessage::NetworkAddressRequest {
                addr64,
                request_type,
                start_index,
            } => {
                buf.put_slice(&addr64.to_wire());
                buf.put_u8(*request_type);
                buf.put_u8(*start_index);
            }
            ZdoMessage::IeeeAddressRequest {
                addr16,
                request_type,
                start_index,
            } => {
                buf.put_slice(&addr16.to_wire());
                buf.put_u8(*request_type);
                buf.put_u8(*start_index);
            }
            ZdoMessage::NetworkAddressResponse(rsp) | ZdoMessage::IeeeAddressResponse(rsp) => {
                buf.put_u8(rsp.status);
                buf.put_slice(&rsp.addr64.to_wire());
                buf.put_slice(&rsp.addr16.to_wire());
                if let Some(associated) = &rsp.associated {
                    buf.put_u8(associated.devices.len() as u8);
                    buf.put_u8(associated.start_index);
                    for device in &associated.devices {
                        buf.put_slice(&device.to_wire());
                    }
                }
            }
            ZdoMessage::SimpleDescriptorRequest { addr16, endpoint } => {
                buf.put_slice(&addr16.to_wire());
                buf.put_u8(*endpoint);
            }
            ZdoMessage::SimpleDescriptorResponse {
                status,
                addr16,
                descriptor,
            } => {
                buf.put_u8(*status);
                buf.put_slice(&addr16.to_wire());
                match descriptor {
                    Some(desc) => {
                        let body = encode_simple_descriptor(desc);
                        buf.put_u8(body.len() as u8);
                        buf.put_slice(&body);
                    }
                    None => buf.put_u8(0),
                }
            }
            ZdoMessage::ActiveEndpointsRequest { addr16 } => {
                buf.put_slice(&addr16.to_wire());
            }
            ZdoMessage::ActiveEndpointsResponse {
                status,
                addr16,
                endpoints,
            }
            | ZdoMessage::MatchDescriptorResponse {
                status,
                addr16,
                endpoints,
            } => {
                buf.put_u8(*status);
                buf.put_slice(&addr16.to_wire());
                buf.put_u8(endpoints.len() as u8);
                buf.put_slice(endpoints);
            }
            ZdoMessage::MatchDescriptorRequest {
                addr16,
                profile_id,
                input_clusters,
                output_clusters,
            } => {
                buf.put_slice(&addr16.to_wire());
                buf.put_u16_le(*profile_id);
                put_cluster_list(&mut buf, input_clusters);
                put_cluster_list(&mut buf, output_clusters);
            }
            ZdoMessage::DeviceAnnouncement {
                addr16,
                addr64,
                capability,
            } => {
                buf.put_slice(&addr16.to_wire());
                buf.put_slice(&addr64.to_wire());
                buf.put_u8(*capability);
            }
            ZdoMessage::BindRequest(target) | ZdoMessage::UnbindRequest(target) => {
                buf.put_slice(&target.source.to_wire());
                buf.put_u8(target.source_endpoint);
                buf.put_u16_le(target.cluster_id);
                match target.destination {
                    BindDestination::Group(group) => {
                        buf.put_u8(0x01);
                        buf.put_u16_le(group);
                    }
                    BindDestination::Device { addr64, endpoint } => {
                        buf.put_u8(0x03);
                        buf.put_slice(&addr64.to_wire());
                        buf.put_u8(endpoint);
                    }
                }
            }
            ZdoMessage::BindResponse { status }
            | ZdoMessage::UnbindResponse { status }
            | ZdoMessage::LeaveResponse { status }
            | ZdoMessage::PermitJoinResponse { status } => buf.put_u8(*status),
            ZdoMessage::LqiRequest { start_index }
            | ZdoMessage::RoutingTableRequest { start_index } => buf.put_u8(*start_index),
            ZdoMessage::LqiResponse(page) => {
                put_page_header(&mut buf, page);
                for neighbor in &page.entries {
                    buf.put_u64_le(neighbor.extended_pan_id);
                    buf.put_slice(&neighbor.addr64.to_wire());
                    buf.put_slice(&neighbor.addr16.to_wire());
                    buf.put_u8(
                        (neighbor.device_type & 0x03)
                            | ((neighbor.rx_on_when_idle & 0x03) << 2)
                            | ((neighbor.relationship & 0x07) << 4),
                    );
                    buf.put_u8(neighbor.permit_joining & 0x03);
                    buf.put_u8(neighbor.depth);
                    buf.put_u8(neighbor.lqi);
                }
            }
            ZdoMessage::RoutingTableResponse(page) => {
                put_page_header(&mut buf, page);
                for route in &page.entries {
                    buf.put_slice(&route.destination.to_wire());
                    buf.put_u8(route.status & 0x07);
                    buf.put_slice(&route.next_hop.to_wire());
                }
            }
            ZdoMessage::LeaveRequest { addr64, flags } => {
                buf.put_slice(&addr64.to_wire());
                buf.put_u8(*flags);
            }
            ZdoMessage::PermitJoinRequest {
                duration,
                trust_center_significance,
            } => {
                buf.put_u8(*duration);
                buf.put_u8(*trust_center_significance);
            }
        }
        (self.message.cluster_id(), buf.freeze())
    }

    /// Decodes a management payload received on `cluster_id`.
    ///
    /// An unknown cluster id is reported with the raw payload attached.
    pub fn decode(cluster_id: u16, data: &[u8]) -> Result<Self, FrameError> {
        use cluster::{RESPONSE as R, *};

        let mut r = Reader::new(data, "management frame");
        let tsn = r.u8()?;
        let message = match cluster_id {
            NETWORK_ADDRESS_REQUEST => ZdoMessage::NetworkAddressRequest {
                addr64: r.addr64()?,
                request_type: r.u8()?,
                start_index: r.u8()?,
            },
            IEEE_ADDRESS_REQUEST => ZdoMessage::IeeeAddressRequest {
                addr16: r.addr16()?,
                request_type: r.u8()?,
                start_index: r.u8()?,
            },
            c if c == NETWORK_ADDRESS_REQUEST | R => {
                ZdoMessage::NetworkAddressResponse(decode_address_response(&mut r)?)
            }
            c if c == IEEE_ADDRESS_REQUEST | R => {
                ZdoMessage::IeeeAddressResponse(decode_address_response(&mut r)?)
            }
            SIMPLE_DESCRIPTOR_REQUEST => ZdoMessage::SimpleDescriptorRequest {
                addr16: r.addr16()?,
                endpoint: r.u8()?,
            },
            c if c == SIMPLE_DESCRIPTOR_REQUEST | R => {
                let status = r.u8()?;
                let addr16 = r.addr16()?;
                let len = if r.remaining() > 0 { r.u8()? } else { 0 };
                let descriptor = if len > 0 {
                    let body = r.take(usize::from(len))?;
                    Some(decode_simple_descriptor(body)?)
                } else {
                    None
                };
                ZdoMessage::SimpleDescriptorResponse {
                    status,
                    addr16,
                    descriptor,
                }
            }
            ACTIVE_ENDPOINTS_REQUEST => ZdoMessage::ActiveEndpointsRequest {
                addr16: r.addr16()?,
            },
            c if c == ACTIVE_ENDPOINTS_REQUEST | R => {
                let (status, addr16, endpoints) = decode_endpoint_list(&mut r)?;
                ZdoMessage::ActiveEndpointsResponse {
                    status,
                    addr16,
                    endpoints,
                }
            }
            MATCH_DESCRIPTOR_REQUEST => ZdoMessage::MatchDescriptorRequest {
                addr16: r.addr16()?,
                profile_id: r.u16()?,
                input_clusters: read_cluster_list(&mut r)?,
                output_clusters: read_cluster_list(&mut r)?,
            },
            c if c == MATCH_DESCRIPTOR_REQUEST | R => {
                let (status, addr16, endpoints) = decode_endpoint_list(&mut r)?;
                ZdoMessage::MatchDescriptorResponse {
                    status,
                    addr16,
                    endpoints,
                }
            }
            DEVICE_ANNOUNCEMENT => ZdoMessage::DeviceAnnouncement {
                addr16: r.addr16()?,
                addr64: r.addr64()?,
                capability: r.u8()?,
            },
            BIND_REQUEST => ZdoMessage::BindRequest(decode_bind_target(&mut r)?),
            UNBIND_REQUEST => ZdoMessage::UnbindRequest(decode_bind_target(&mut r)?),
            c if c == BIND_REQUEST | R => ZdoMessage::BindResponse { status: r.u8()? },
            c if c == UNBIND_REQUEST | R => ZdoMessage::UnbindResponse { status: r.u8()? },
            LQI_REQUEST => ZdoMessage::LqiRequest {
                start_index: r.u8()?,
            },
            c if c == LQI_REQUEST | R => {
                ZdoMessage::LqiResponse(decode_page(&mut r, Neighbor::WIRE_LEN, |e| {
                    let extended_pan_id = e.uint(8)?;
                    let addr64 = e.addr64()?;
                    let addr16 = e.addr16()?;
                    let bits = e.u8()?;
                    Ok(Neighbor {
                        extended_pan_id,
                        addr64,
                        addr16,
                        device_type: bits & 0x03,
                        rx_on_when_idle: (bits >> 2) & 0x03,
                        relationship: (bits >> 4) & 0x07,
                        permit_joining: e.u8()? & 0x03,
                        depth: e.u8()?,
                        lqi: e.u8()?,
                    })
                })?)
            }
            ROUTING_TABLE_REQUEST => ZdoMessage::RoutingTableRequest {
                start_index: r.u8()?,
            },
            c if c == ROUTING_TABLE_REQUEST | R => {
                ZdoMessage::RoutingTableResponse(decode_page(&mut r, Route::WIRE_LEN, |e| {
                    Ok(Route {
                        destination: e.addr16()?,
                        status: e.u8()? & 0x07,
                        next_hop: e.addr16()?,
                    })
                })?)
            }
            LEAVE_REQUEST => ZdoMessage::LeaveRequest {
                addr64: r.addr64()?,
                flags: r.u8()?,
            },
            c if c == LEAVE_REQUEST | R => ZdoMessage::LeaveResponse { status: r.u8()? },
            PERMIT_JOIN_REQUEST => ZdoMessage::PermitJoinRequest {
                duration: r.u8()?,
                trust_center_significance: r.u8()?,
            },
            c if c == PERMIT_JOIN_REQUEST | R => ZdoMessage::PermitJoinResponse { status: r.u8()? },
            other => {
                tracing::debug!("unknown management cluster {}", hex_id(other));
                return Err(FrameError::UnknownManagementKind {
                    cluster: other,
                    raw: Bytes::copy_from_slice(data),
                });
            }
        };
        Ok(Self { tsn, message })
    }
}

fn put_cluster_list(buf: &mut BytesMut, clusters: &[u16]) {
    buf.put_u8(clusters.len() as u8);
    for cluster in clusters {
        buf.put_u16_le(*cluster);
    }
}

fn read_cluster_list(r: &mut Reader<'_>) -> Result<Vec<u16>, FrameError> {
    let count = r.u8()?;
    (0..count).map(|_| r.u16()).collect()
}

fn put_page_header<T>(buf: &mut BytesMut, page: &TablePage<T>) {
    buf.put_u8(page.status);
    buf.put_u8(page.total);
    buf.put_u8(page.start_index);
    buf.put_u8(page.entries.len() as u8);
}

fn decode_page<T>(
    r: &mut Reader<'_>,
    entry_len: usize,
    mut entry: impl FnMut(&mut Reader<'_>) -> Result<T, FrameError>,
) -> Result<TablePage<T>, FrameError> {
    let status = r.u8()?;
    if r.remaining() == 0 {
        // Error responses may stop after the status
        return Ok(TablePage {
            status,
            total: 0,
            start_index: 0,
            entries: Vec::new(),
        });
    }
    let total = r.u8()?;
    let start_index = r.u8()?;
    let count = r.u8()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let mut e = Reader::new(r.take(entry_len)?, "table entry");
        entries.push(entry(&mut e)?);
    }
    Ok(TablePage {
        status,
        total,
        start_index,
        entries,
    })
}

fn decode_address_response(r: &mut Reader<'_>) -> Result<AddressResponse, FrameError> {
    let status = r.u8()?;
    let addr64 = r.addr64()?;
    let addr16 = r.addr16()?;
    let associated = if r.remaining() >= 2 {
        let count = r.u8()?;
        let start_index = r.u8()?;
        let devices = (0..count)
            .map(|_| r.addr16())
            .collect::<Result<Vec<_>, _>>()?;
        Some(AssociatedDevices {
            start_index,
            devices,
        })
    } else {
        None
    };
    Ok(AddressResponse {
        status,
        addr64,
        addr16,
        associated,
    })
}

fn decode_endpoint_list(
    r: &mut Reader<'_>,
) -> Result<(u8, NetworkAddress16, Vec<u8>), FrameError> {
    let status = r.u8()?;
    let addr16 = r.addr16()?;
    let count = if r.remaining() > 0 { r.u8()? } else { 0 };
    let endpoints = r.take(usize::from(count))?.to_vec();
    Ok((status, addr16, endpoints))
}

fn encode_simple_descriptor(desc: &SimpleDescriptor) -> BytesMut {
    let clusters = desc.input_clusters.len() + desc.output_clusters.len();
    let mut body = BytesMut::with_capacity(8 + 2 * clusters);
    body.put_u8(desc.endpoint);
    body.put_u16_le(desc.profile_id);
    body.put_u16_le(desc.device_id);
    body.put_u8(desc.device_version);
    put_cluster_list(&mut body, &desc.input_clusters);
    put_cluster_list(&mut body, &desc.output_clusters);
    body
}

fn decode_simple_descriptor(body: &[u8]) -> Result<SimpleDescriptor, FrameError> {
    let mut r = Reader::new(body, "simple descriptor");
    Ok(SimpleDescriptor {
        endpoint: r.u8()?,
        profile_id: r.u16()?,
        device_id: r.u16()?,
        device_version: r.u8()? & 0x0F,
        input_clusters: read_cluster_list(&mut r)?,
        output_clusters: read_cluster_list(&mut r)?,
    })
}

fn decode_bind_target(r: &mut Reader<'_>) -> Result<BindTarget, FrameError> {
    let source = r.addr64()?;
    let source_endpoint = r.u8()?;
    let cluster_id = r.u16()?;
    let destination = match r.u8()? {
        0x01 => BindDestination::Group(r.u16()?),
        0x03 => BindDestination::Device {
            addr64: r.addr64()?,
            endpoint: r.u8()?,
        },
        mode => {
            return Err(FrameError::Malformed(format!(
                "bind destination mode 0x{mode:02x}"
            )));
        }
    };
    Ok(BindTarget {
        source,
        source_endpoint,
        cluster_id,
        destination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: NetworkAddress64 = NetworkAddress64::new(0x0013_A200_4052_1F3B);
    const GATEWAY: NetworkAddress64 = NetworkAddress64::new(0x0013_A200_40AA_BBCC);
    const SHORT: NetworkAddress16 = NetworkAddress16::new(0x1A2B);

    fn every_kind() -> Vec<ZdoMessage> {
        let target = BindTarget {
            source: DEVICE,
            source_endpoint: 1,
            cluster_id: 0x0006,
            destination: BindDestination::Device {
                addr64: GATEWAY,
                endpoint: 1,
            },
        };
        vec![
            ZdoMessage::NetworkAddressRequest {
                addr64: DEVICE,
                request_type: 0,
                start_index: 0,
            },
            ZdoMessage::NetworkAddressResponse(AddressResponse {
                status: status::SUCCESS,
                addr64: DEVICE,
                addr16: SHORT,
                associated: None,
            }),
            ZdoMessage::IeeeAddressRequest {
                addr16: SHORT,
                request_type: 1,
                start_index: 0,
            },
            ZdoMessage::IeeeAddressResponse(AddressResponse {
                status: status::SUCCESS,
                addr64: DEVICE,
                addr16: SHORT,
                associated: Some(AssociatedDevices {
                    start_index: 0,
                    devices: vec![NetworkAddress16::new(0x0101), NetworkAddress16::new(0x0202)],
                }),
            }),
            ZdoMessage::SimpleDescriptorRequest {
                addr16: SHORT,
                endpoint: 1,
            },
            ZdoMessage::SimpleDescriptorResponse {
                status: status::SUCCESS,
                addr16: SHORT,
                descriptor: Some(SimpleDescriptor {
                    endpoint: 1,
                    profile_id: 0x0104,
                    device_id: 0x0102,
                    device_version: 1,
                    input_clusters: vec![0x0000, 0x0006, 0x0008, 0x0300],
                    output_clusters: vec![0x0019],
                }),
            },
            ZdoMessage::SimpleDescriptorResponse {
                status: status::INVALID_ENDPOINT,
                addr16: SHORT,
                descriptor: None,
            },
            ZdoMessage::ActiveEndpointsRequest { addr16: SHORT },
            ZdoMessage::ActiveEndpointsResponse {
                status: status::SUCCESS,
                addr16: SHORT,
                endpoints: vec![1, 2, 242],
            },
            ZdoMessage::MatchDescriptorRequest {
                addr16: NetworkAddress16::BROADCAST_RX_ON,
                profile_id: 0x0104,
                input_clusters: vec![],
                output_clusters: vec![0x0500],
            },
            ZdoMessage::MatchDescriptorResponse {
                status: status::SUCCESS,
                addr16: NetworkAddress16::COORDINATOR,
                endpoints: vec![1],
            },
            ZdoMessage::DeviceAnnouncement {
                addr16: SHORT,
                addr64: DEVICE,
                capability: capability::MAINS_POWERED | capability::RX_ON_WHEN_IDLE,
            },
            ZdoMessage::BindRequest(target),
            ZdoMessage::BindResponse {
                status: status::SUCCESS,
            },
            ZdoMessage::UnbindRequest(BindTarget {
                destination: BindDestination::Group(0x0042),
                ..target
            }),
            ZdoMessage::UnbindResponse {
                status: status::NO_ENTRY,
            },
            ZdoMessage::LqiRequest { start_index: 3 },
            ZdoMessage::LqiResponse(TablePage {
                status: status::SUCCESS,
                total: 5,
                start_index: 3,
                entries: vec![Neighbor {
                    extended_pan_id: 0x00DE_AD00_BEEF_0001,
                    addr64: DEVICE,
                    addr16: SHORT,
                    device_type: device_type::END_DEVICE,
                    rx_on_when_idle: 0,
                    relationship: 1,
                    permit_joining: 2,
                    depth: 1,
                    lqi: 200,
                }],
            }),
            ZdoMessage::RoutingTableRequest { start_index: 0 },
            ZdoMessage::RoutingTableResponse(TablePage {
                status: status::SUCCESS,
                total: 1,
                start_index: 0,
                entries: vec![Route {
                    destination: SHORT,
                    status: 0,
                    next_hop: NetworkAddress16::new(0x0001),
                }],
            }),
            ZdoMessage::LeaveRequest {
                addr64: DEVICE,
                flags: leave::REMOVE_CHILDREN,
            },
            ZdoMessage::LeaveResponse {
                status: status::SUCCESS,
            },
            ZdoMessage::PermitJoinRequest {
                duration: 60,
                trust_center_significance: 1,
            },
            ZdoMessage::PermitJoinResponse {
                status: status::SUCCESS,
            },
        ]
    }

    #[test]
    fn test_every_kind_decodes_what_it_encodes() {
        for (tsn, message) in every_kind().into_iter().enumerate() {
            let frame = ManagementFrame::new(tsn as u8 + 1, message);
            let (cluster, payload) = frame.encode();
            let decoded = ManagementFrame::decode(cluster, &payload)
                .unwrap_or_else(|e| panic!("{frame:?}: {e}"));
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_address_fields_are_lsb_first() {
        let frame = ManagementFrame::new(
            0x11,
            ZdoMessage::DeviceAnnouncement {
                addr16: SHORT,
                addr64: DEVICE,
                capability: 0x8E,
            },
        );
        let (cluster, payload) = frame.encode();
        assert_eq!(cluster, cluster::DEVICE_ANNOUNCEMENT);
        assert_eq!(
            &payload[..],
            &[
                0x11, 0x2B, 0x1A, 0x3B, 0x1F, 0x52, 0x40, 0x00, 0xA2, 0x13, 0x00, 0x8E
            ]
        );
    }

    #[test]
    fn test_response_ids_and_status() {
        let rsp = ZdoMessage::BindResponse {
            status: status::NOT_SUPPORTED,
        };
        assert_eq!(rsp.cluster_id(), 0x8021);
        assert!(rsp.is_response());
        assert_eq!(rsp.status(), Some(status::NOT_SUPPORTED));
        assert_eq!(ZdoMessage::LqiRequest { start_index: 0 }.status(), None);
    }

    #[test]
    fn test_unknown_kind_is_error_with_raw_bytes() {
        let payload = [0x05, 0x00, 0x01];
        match ManagementFrame::decode(0x0038, &payload) {
            Err(FrameError::UnknownManagementKind { cluster, raw }) => {
                assert_eq!(cluster, 0x0038);
                assert_eq!(&raw[..], &payload);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_short_error_table_response() {
        let decoded = ManagementFrame::decode(0x8031, &[0x09, status::NOT_SUPPORTED]).unwrap();
        let ZdoMessage::LqiResponse(page) = decoded.message else {
            panic!("expected lqi response");
        };
        assert_eq!(page.status, status::NOT_SUPPORTED);
        assert!(page.entries.is_empty());
        assert_eq!(page.next_index(), None);
    }

    #[test]
    fn test_table_page_next_index() {
        let page = TablePage {
            status: 0,
            total: 5,
            start_index: 0,
            entries: vec![1, 2, 3],
        };
        assert_eq!(page.next_index(), Some(3));
        let last = TablePage {
            status: 0,
            total: 5,
            start_index: 3,
            entries: vec![4, 5],
        };
        assert_eq!(last.next_index(), None);
    }
}
