//! Event system for platform notifications.
//!
//! The engine reports node lifecycle and property changes through the
//! [`Platform`] trait. [`EventDispatcher`] implements it by broadcasting
//! [`Event`]s to any number of subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::protocol::NetworkAddress64;
use crate::types::{Node, NodeInfo, Property, PropertyValue};

/// Notifications published by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection to the coordinator established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// A node finished discovery and is now exposed.
    DeviceAdded(Box<NodeInfo>),
    /// A node left the network.
    DeviceRemoved { addr64: NetworkAddress64 },
    /// A property took a new value.
    PropertyChanged {
        addr64: NetworkAddress64,
        property: String,
        value: PropertyValue,
    },
    /// Something happened on a node that is not a property change.
    DeviceEvent {
        addr64: NetworkAddress64,
        name: String,
        data: serde_json::Value,
    },
    /// The network accepts joins for `seconds`.
    PairingStarted { seconds: u8 },
    PairingEnded,
    /// The network scan finished.
    ScanComplete { nodes: usize },
}

impl Event {
    /// Returns the node this event concerns, if any.
    #[must_use]
    pub fn addr64(&self) -> Option<NetworkAddress64> {
        match self {
            Self::DeviceAdded(info) => Some(info.addr64),
            Self::DeviceRemoved { addr64 }
            | Self::PropertyChanged { addr64, .. }
            | Self::DeviceEvent { addr64, .. } => Some(*addr64),
            _ => None,
        }
    }
}

/// Receiver of engine notifications.
pub trait Platform: Send {
    /// A node became ready; called once per node.
    fn add_device(&mut self, node: &Node);

    /// A node was evicted after leaving.
    fn remove_device(&mut self, addr64: NetworkAddress64);

    /// A property's cached value changed.
    fn property_changed(&mut self, node: &Node, property: &Property);

    /// Any other notification.
    fn event(&mut self, event: Event);
}

/// Receiving end of the event stream.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, skipping over any the subscriber lagged behind on.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscriber lagged, {} events dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events about this node.
    pub addr64: Option<NetworkAddress64>,
    /// Only changes of this property.
    pub property: Option<String>,
}

impl EventFilter {
    /// Matches every event about one node.
    #[must_use]
    pub const fn node(addr64: NetworkAddress64) -> Self {
        Self {
            addr64: Some(addr64),
            property: None,
        }
    }

    /// Matches changes of one property.
    #[must_use]
    pub fn property(addr64: NetworkAddress64, property: impl Into<String>) -> Self {
        Self {
            addr64: Some(addr64),
            property: Some(property.into()),
        }
    }

    /// True when `event` passes every criterion set on the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(addr64) = self.addr64 {
            if event.addr64() != Some(addr64) {
                return false;
            }
        }
        if let Some(ref wanted) = self.property {
            return matches!(event, Event::PropertyChanged { property, .. } if property == wanted);
        }
        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Fans events out to every live [`Subscription`].
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Dispatcher buffering up to `capacity` events per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Publishes `event`; dropped silently when nobody is subscribed.
    pub fn dispatch(&self, event: Event) {
        tracing::trace!("dispatching {:?}", event);
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl Platform for EventDispatcher {
    fn add_device(&mut self, node: &Node) {
        self.dispatch(Event::DeviceAdded(Box::new(node.info())));
    }

    fn remove_device(&mut self, addr64: NetworkAddress64) {
        self.dispatch(Event::DeviceRemoved { addr64 });
    }

    fn property_changed(&mut self, node: &Node, property: &Property) {
        if let Some(value) = &property.value {
            self.dispatch(Event::PropertyChanged {
                addr64: node.addr64,
                property: property.name.clone(),
                value: value.clone(),
            });
        }
    }

    fn event(&mut self, event: Event) {
        self.dispatch(event);
    }
}
