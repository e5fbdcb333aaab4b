//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persist::{DEFAULT_SAVE_DEBOUNCE, VERBOSE_SAVE_DEBOUNCE};
use crate::scheduler::{DEFAULT_RETRY_MAX, DEFAULT_WAIT_TIMEOUT, EXTENDED_WAIT_TIMEOUT};

/// Attempts at the active endpoint request before a node is left undiscovered.
pub const DEFAULT_ENDPOINT_RETRY_MAX: u8 = 5;

/// Endpoint the gateway answers on and binds reports to.
pub const DEFAULT_GATEWAY_ENDPOINT: u8 = 1;

/// Capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Longest join window the network accepts, in seconds.
pub const MAX_PAIRING_SECONDS: u8 = 254;

/// Configuration of one coordinator engine.
///
/// Every field has a default, so a JSON document only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// Time to wait for a response from a mains-powered node.
    pub wait_timeout: Duration,
    /// Time to wait for a response from a sleepy node.
    pub extended_timeout: Duration,
    /// Total transmissions of one exchange.
    pub retry_max: u8,
    /// Active endpoint requests sent before giving up on a silent node.
    pub endpoint_retry_max: u8,
    pub save_debounce: Duration,
    pub verbose_save_debounce: Duration,
    /// Verbose diagnostics; also shortens the save debounce.
    pub verbose: bool,
    pub gateway_endpoint: u8,
    /// Read the neighbor tables of the whole network on start.
    pub scan_on_start: bool,
    /// Where the registry snapshot lives; `None` keeps it in memory.
    pub snapshot_path: Option<PathBuf>,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            extended_timeout: EXTENDED_WAIT_TIMEOUT,
            retry_max: DEFAULT_RETRY_MAX,
            endpoint_retry_max: DEFAULT_ENDPOINT_RETRY_MAX,
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            verbose_save_debounce: VERBOSE_SAVE_DEBOUNCE,
            verbose: false,
            gateway_endpoint: DEFAULT_GATEWAY_ENDPOINT,
            scan_on_start: true,
            snapshot_path: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the wait timeouts for regular and sleepy nodes.
    #[must_use]
    pub const fn timeouts(mut self, wait: Duration, extended: Duration) -> Self {
        self.wait_timeout = wait;
        self.extended_timeout = extended;
        self
    }

    /// Sets the number of transmissions per exchange.
    #[must_use]
    pub const fn retry_max(mut self, retry_max: u8) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Sets the number of active endpoint requests per node.
    #[must_use]
    pub const fn endpoint_retry_max(mut self, attempts: u8) -> Self {
        self.endpoint_retry_max = attempts;
        self
    }

    /// Enables verbose diagnostics.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub const fn gateway_endpoint(mut self, endpoint: u8) -> Self {
        self.gateway_endpoint = endpoint;
        self
    }

    /// Enables or disables the network scan on start.
    #[must_use]
    pub const fn scan_on_start(mut self, scan: bool) -> Self {
        self.scan_on_start = scan;
        self
    }

    /// Persists snapshots to a JSON file.
    #[must_use]
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Delay between a change and its snapshot write.
    #[must_use]
    pub const fn effective_save_debounce(&self) -> Duration {
        if self.verbose {
            self.verbose_save_debounce
        } else {
            self.save_debounce
        }
    }
}
