//! Serial transport to the coordinator radio.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_serial::{FlowControl, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::protocol::encode_frame;
use crate::transport::Transport;

/// Default baud rate of the coordinator radio.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default settle time after opening the port.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// How long stale bytes are drained after opening the port.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Line settings for the coordinator's serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, "/dev/ttyUSB0" or "COM3" style.
    pub port: String,
    pub baud_rate: u32,
    /// Settle time between opening the port and draining it.
    pub connection_delay: Duration,
    /// Hardware RTS/CTS handshaking; most USB radio adapters run without it.
    pub flow_control: bool,
}

impl SerialConfig {
    /// Settings for `port` at the default rate, without flow control.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            flow_control: false,
        }
    }

    #[must_use]
    pub const fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    #[must_use]
    pub const fn connection_delay(mut self, connection_delay: Duration) -> Self {
        self.connection_delay = connection_delay;
        self
    }

    #[must_use]
    pub const fn flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }
}

/// Serial link to a coordinator radio.
///
/// After [`connect`](Transport::connect) the port is split: the read half
/// goes to the reader task, the write half stays behind a lock for `send`.
pub struct SerialTransport {
    config: SerialConfig,
    write_half: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    read_half: Option<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            write_half: None,
            read_half: None,
        }
    }

    /// Transport for `port` with default line settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn open(&self) -> Result<SerialStream> {
        let flow_control = if self.config.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let mut port = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .flow_control(flow_control)
            .open_native_async()?;
        if !self.config.flow_control {
            // Some adapters hold the radio in reset while RTS is asserted.
            if let Err(e) = SerialPort::write_request_to_send(&mut port, false) {
                tracing::warn!("cannot release RTS on {}: {}", self.config.port, e);
            }
        }
        Ok(port)
    }

    /// Forwards inbound bytes until the port closes or nobody listens.
    async fn pump(mut read_half: ReadHalf<SerialStream>, bytes_tx: mpsc::Sender<Bytes>) {
        let mut chunk = [0u8; 512];
        loop {
            let len = match read_half.read(&mut chunk).await {
                Ok(0) => {
                    tracing::warn!("serial port closed by the device");
                    return;
                }
                Ok(len) => len,
                Err(e) => {
                    tracing::error!("serial read failed: {}", e);
                    return;
                }
            };
            tracing::trace!("rx {} raw bytes", len);
            if bytes_tx
                .send(Bytes::copy_from_slice(&chunk[..len]))
                .await
                .is_err()
            {
                tracing::debug!("reader stopped, nobody is listening");
                return;
            }
        }
    }
}

/// Discards whatever the radio emits right after the port opens (boot
/// banner, half frames). Returns the number of bytes thrown away.
async fn drain_stale(port: &mut SerialStream) -> usize {
    let mut scratch = [0u8; 512];
    let mut drained = 0;
    let until = Instant::now() + DRAIN_WINDOW;
    while Instant::now() < until {
        match tokio::time::timeout(DRAIN_POLL, port.read(&mut scratch)).await {
            Ok(Ok(len)) if len > 0 => drained += len,
            _ => tokio::time::sleep(DRAIN_POLL / 2).await,
        }
    }
    drained
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }
            tracing::info!(
                "opening {} at {} baud",
                self.config.port,
                self.config.baud_rate
            );
            let mut port = self.open()?;
            tokio::time::sleep(self.config.connection_delay).await;
            let drained = drain_stale(&mut port).await;
            if drained > 0 {
                tracing::debug!("discarded {} stale bytes", drained);
            }

            let (read_half, write_half) = tokio::io::split(port);
            self.read_half = Some(read_half);
            self.write_half = Some(Arc::new(Mutex::new(write_half)));
            tracing::info!("serial link to {} is up", self.config.port);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let was_open = self.write_half.take().is_some();
            self.read_half = None;
            if was_open {
                tracing::info!("closed {}", self.config.port);
            }
            Ok(())
        })
    }

    fn send(&mut self, payload: Bytes) -> BoxFuture<'_, Result<()>> {
        let write_half = self.write_half.clone();
        Box::pin(async move {
            let write_half = write_half.ok_or(Error::NotConnected)?;
            let frame = encode_frame(&payload);
            tracing::trace!("tx {} framed bytes", frame.len());

            let mut port = write_half.lock().await;
            port.write_all(&frame).await?;
            port.flush().await?;
            Ok(())
        })
    }

    fn start_reader(&mut self, bytes_tx: mpsc::Sender<Bytes>) -> Option<JoinHandle<()>> {
        let read_half = self.read_half.take()?;
        Some(tokio::spawn(Self::pump(read_half, bytes_tx)))
    }

    fn is_connected(&self) -> bool {
        self.write_half.is_some()
    }
}

/// Names of the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<String>> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}
