//! Main [`Gateway`] client implementation.
//!
//! The gateway owns the transport and runs an [`Engine`] inside a single
//! tokio task fed by two channels: raw bytes from the transport reader and
//! requests from this handle. Outbound frames leave through a writer task.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CoordinatorConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::persist::{JsonFileStore, MemoryStore, SnapshotStore};
use crate::protocol::NetworkAddress64;
use crate::transport::{SerialTransport, Transport, serial::SerialConfig};
use crate::types::{Completion, NodeInfo, PropertyValue};

/// Capacity of the link and frame channels.
const CHANNEL_CAPACITY: usize = 256;

/// Capacity of the request channel.
const REQUEST_CAPACITY: usize = 64;

/// A call from the application, executed inside the engine task.
#[derive(Debug)]
enum Request {
    SetValue {
        addr64: NetworkAddress64,
        property: String,
        value: PropertyValue,
        done: Completion,
    },
    StartPairing(u8),
    CancelPairing,
    RemoveDevice {
        addr64: NetworkAddress64,
        done: Completion,
    },
    Nodes(oneshot::Sender<Vec<NodeInfo>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running coordinator.
pub struct Gateway<T> {
    transport: Arc<Mutex<T>>,
    config: CoordinatorConfig,
    dispatcher: EventDispatcher,
    requests: Option<mpsc::Sender<Request>>,

    // Background tasks
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
    engine_task: Option<JoinHandle<()>>,
}

impl Gateway<SerialTransport> {
    /// Creates a gateway for a serial port with default settings.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port), CoordinatorConfig::new())
    }

    /// Creates a gateway with custom serial and coordinator configuration.
    #[must_use]
    pub fn with_serial_config(serial: SerialConfig, config: CoordinatorConfig) -> Self {
        Self::new(SerialTransport::new(serial), config)
    }
}

impl<T: Transport + 'static> Gateway<T> {
    /// Creates a gateway over any transport; nothing happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(transport: T, config: CoordinatorConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);
        Self {
            transport: Arc::new(Mutex::new(transport)),
            config,
            dispatcher,
            requests: None,
            read_task: None,
            write_task: None,
            engine_task: None,
        }
    }

    /// Opens the transport and starts the engine.
    ///
    /// The engine restores the registry snapshot, asks the radio for its
    /// addresses and, if configured, scans the network. Progress is reported
    /// through [`subscribe`](Self::subscribe).
    pub async fn connect(&mut self) -> Result<()> {
        if self.requests.is_some() {
            return Ok(());
        }

        let (bytes_tx, bytes_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        {
            let mut transport = self.transport.lock().await;
            transport.connect().await?;
            self.read_task = Some(transport.start_reader(bytes_tx).ok_or(Error::NotConnected)?);
        }

        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (failed_tx, failed_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        self.write_task = Some(tokio::spawn(write_loop(
            Arc::clone(&self.transport),
            frame_rx,
            failed_tx,
        )));

        let store: Box<dyn SnapshotStore> = match &self.config.snapshot_path {
            Some(path) => Box::new(JsonFileStore::new(path)),
            None => Box::new(MemoryStore::new()),
        };
        let engine = Engine::new(
            self.config.clone(),
            Box::new(self.dispatcher.clone()),
            store,
            Box::new(frame_tx),
        );

        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        self.engine_task = Some(tokio::spawn(run_engine(
            engine,
            Inputs {
                link: bytes_rx,
                failed: failed_rx,
                requests: request_rx,
            },
            self.dispatcher.clone(),
        )));
        self.requests = Some(request_tx);

        self.dispatcher.dispatch(Event::Connected);
        Ok(())
    }

    /// Stops the engine, writes any pending snapshot and closes the transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(requests) = self.requests.take() {
            let (tx, rx) = oneshot::channel();
            if requests.send(Request::Shutdown(tx)).await.is_ok() {
                let _ = rx.await;
            }
        }
        if let Some(task) = self.engine_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        // The writer drains once the engine has dropped its sender.
        if let Some(task) = self.write_task.take() {
            let _ = task.await;
        }

        {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await?;
        }
        self.dispatcher.dispatch(Event::Disconnected);
        Ok(())
    }

    /// Returns true while the engine task is running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.requests.as_ref().is_some_and(|r| !r.is_closed())
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Writes a property and waits for the node to confirm it.
    ///
    /// Nodes that do not confirm writes resolve as soon as the frame is sent.
    pub async fn set_value(
        &self,
        addr64: NetworkAddress64,
        property: impl Into<String>,
        value: PropertyValue,
    ) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(Request::SetValue {
            addr64,
            property: property.into(),
            value,
            done,
        })
        .await?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Opens the network for joins for up to `seconds` (254 at most, 0 closes it).
    pub async fn start_pairing(&self, seconds: u8) -> Result<()> {
        self.request(Request::StartPairing(seconds)).await
    }

    /// Closes the network for joins.
    pub async fn cancel_pairing(&self) -> Result<()> {
        self.request(Request::CancelPairing).await
    }

    /// Asks a node to leave and waits until it has been evicted.
    pub async fn remove_device(&self, addr64: NetworkAddress64) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(Request::RemoveDevice { addr64, done }).await?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Returns a view of every known node.
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Nodes(tx)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    async fn request(&self, request: Request) -> Result<()> {
        let requests = self.requests.as_ref().ok_or(Error::NotConnected)?;
        requests
            .send(request)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Writes outbound frames until the engine drops its sender.
///
/// Frames the transport fails to write go back to the engine on `failed`.
async fn write_loop<T: Transport>(
    transport: Arc<Mutex<T>>,
    mut frames: mpsc::Receiver<Bytes>,
    failed: mpsc::Sender<Bytes>,
) {
    while let Some(payload) = frames.recv().await {
        let result = transport.lock().await.send(payload.clone()).await;
        if let Err(e) = result {
            tracing::error!("failed to write frame: {}", e);
            if failed.send(payload).await.is_err() {
                tracing::debug!("engine gone, write failure not reported");
            }
        }
    }
    tracing::debug!("writer stopped");
}

/// Everything the engine task listens to besides its timer.
struct Inputs {
    link: mpsc::Receiver<Bytes>,
    failed: mpsc::Receiver<Bytes>,
    requests: mpsc::Receiver<Request>,
}

async fn run_engine(mut engine: Engine, inputs: Inputs, dispatcher: EventDispatcher) {
    let Inputs {
        mut link,
        mut failed,
        mut requests,
    } = inputs;
    engine.start(now());
    loop {
        let deadline = engine.next_deadline();
        let timer = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            bytes = link.recv() => {
                let Some(bytes) = bytes else {
                    tracing::warn!("link to the radio closed");
                    dispatcher.dispatch(Event::Disconnected);
                    break;
                };
                engine.handle_link_bytes(&bytes, now());
            }
            Some(payload) = failed.recv() => engine.handle_send_failure(&payload, now()),
            request = requests.recv() => match request {
                Some(Request::Shutdown(done)) => {
                    engine.flush();
                    let _ = done.send(());
                    return;
                }
                Some(request) => handle_request(&mut engine, request),
                None => break,
            },
            () = timer => engine.handle_timers(now()),
        }
    }
    engine.flush();
}

fn handle_request(engine: &mut Engine, request: Request) {
    let now = now();
    match request {
        Request::SetValue {
            addr64,
            property,
            value,
            done,
        } => engine.set_value(addr64, &property, value, done, now),
        Request::StartPairing(seconds) => engine.start_pairing(seconds, now),
        Request::CancelPairing => engine.cancel_pairing(now),
        Request::RemoveDevice { addr64, done } => engine.remove_device(addr64, done, now),
        Request::Nodes(reply) => {
            let _ = reply.send(engine.nodes());
        }
        Request::Shutdown(done) => {
            let _ = done.send(());
        }
    }
}
