//! Message bus plumbing
//!
//! The engine talks to the broker through [`MessageBus`]. [`Publisher`] adds
//! JSON encoding and retained delivery on top and never surfaces transport
//! failures to its callers.

mod memory;
mod mqtt;

pub use memory::{InMemoryBus, PublishedMessage};
pub use mqtt::MqttBus;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::types::QuoteField;

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Trait for message bus clients
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Emit `payload` on `topic`
    async fn publish(&self, topic: &str, payload: String, retain: bool)
        -> Result<(), TransportError>;

    /// Subscribe to a topic filter. Implementations keep the subscription
    /// across reconnects.
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;
}

/// Serializes values and publishes them retained
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// JSON-encode `value` and publish it retained on `topic`.
    ///
    /// Returns whether the message was handed to the transport.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to serialize value");
                return false;
            }
        };

        debug!("Publishing {}:{}", topic, payload);

        match self.bus.publish(topic, payload, true).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Publish failed");
                false
            }
        }
    }
}

/// Filter matching every control topic `<root>/<name>`
pub fn control_filter(root: &str) -> String {
    format!("{}/+", root)
}

/// Topic carrying the whole quote of an entry
pub fn record_topic(root: &str, name: &str) -> String {
    format!("{}/{}", root, name)
}

/// Topic carrying one field of an entry
pub fn field_topic(root: &str, name: &str, field: QuoteField) -> String {
    format!("{}/{}/{}", root, name, field.as_str())
}

/// Entry name addressed by a control topic, if `topic` is exactly one
/// non-empty segment below `root`.
pub fn control_name<'a>(root: &str, topic: &'a str) -> Option<&'a str> {
    let name = topic.strip_prefix(root)?.strip_prefix('/')?;
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name)
    }
}
