//! Transport layer between the gateway and its radio.
//!
//! The coordinator radio speaks framed API packets over a serial line.
//! Transports move raw bytes in both directions; link framing on the write
//! side is theirs, while decoding inbound bytes is left to the engine.

pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects to the radio.
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Disconnects from the radio.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Frames one API payload and writes it to the radio.
    fn send(&mut self, payload: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Spawns a task forwarding raw inbound bytes to `bytes_tx`.
    ///
    /// Returns `None` if the transport is not connected or its reader was
    /// already started.
    fn start_reader(&mut self, bytes_tx: mpsc::Sender<Bytes>) -> Option<JoinHandle<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

pub use serial::SerialTransport;
