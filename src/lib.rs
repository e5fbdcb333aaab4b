//! # meshgate
//!
//! The coordinator side of a low-power wireless mesh home-automation gateway.
//!
//! The library talks to a coordinator radio over a serial line, discovers the
//! nodes of its mesh, learns what their endpoints can do, turns clusters into
//! named properties, keeps reports flowing through bindings and reporting
//! configuration, and persists everything it learned.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Single-owner engine with a prioritized command scheduler
//! - Event-driven notifications for node lifecycle and property changes
//! - Debounced JSON snapshots of the node registry
//!
//! ## Quick Start
//!
//! ```no_run
//! use meshgate::{Event, Gateway, PropertyValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meshgate::Error> {
//!     let mut gateway = Gateway::serial("/dev/ttyUSB0");
//!     let mut events = gateway.subscribe();
//!     gateway.connect().await?;
//!
//!     // Let new devices join for a minute.
//!     gateway.start_pairing(60).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let Event::DeviceAdded(info) = event {
//!             println!("{} joined as {:?}", info.addr64, info.kind);
//!             if info.properties.contains_key("on") {
//!                 gateway
//!                     .set_value(info.addr64, "on", PropertyValue::Bool(true))
//!                     .await?;
//!             }
//!         }
//!     }
//!
//!     gateway.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Link framing, API frames, management and application codecs
//! - [`types`] - Nodes, endpoints and properties
//! - [`registry`] - The node registry and its snapshot form
//! - [`classifier`] - Cluster to property mapping
//! - [`scheduler`] - Prioritized send/wait queue with retries
//! - [`engine`] - The coordinator state machine
//! - [`persist`] - Snapshot stores and save debouncing
//! - [`transport`] - Transport implementations (currently serial)
//! - [`event`] - Platform notifications and the event dispatcher
//! - [`client`] - High-level async [`Gateway`]

pub mod classifier;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::Gateway;
pub use config::CoordinatorConfig;
pub use engine::{Diagnostics, Engine, FrameSink};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Platform, Subscription};
pub use persist::{JsonFileStore, MemoryStore, SnapshotStore};
pub use protocol::{NetworkAddress16, NetworkAddress64};
pub use registry::{Registry, RegistrySnapshot};
pub use transport::{SerialTransport, Transport, serial::SerialConfig, serial::list_ports};
pub use types::{
    BindingState, DeviceKind, DiscoveryState, Node, NodeInfo, Property, PropertyValue,
};
