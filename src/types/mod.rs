//! Data types for mesh entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Nodes and their discovery/binding state
//! - Endpoints
//! - Properties and their value codecs

pub mod endpoint;
pub mod node;
pub mod property;

pub use endpoint::{Descriptor, Endpoint, EndpointPhase};
pub use node::{
    BindingState, DeviceKind, DiscoveryState, NeighborLink, NetworkLinks, Node, NodeInfo,
    RouteLink, ZoneInfo,
};
pub use property::{
    Completion, Property, PropertyFlags, PropertyValue, ReportThresholds, ValueCodec,
    WriteMethod, WriteRequest,
};
