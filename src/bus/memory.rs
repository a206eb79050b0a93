//! In-process message bus
//!
//! Keeps every published message and the retained value per topic. Used for
//! dry runs and by the test suites.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::MessageBus;
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryBus {
    published: Mutex<Vec<PublishedMessage>>,
    retained: Mutex<HashMap<String, String>>,
    subscriptions: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain the published log
    pub fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.published.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Last retained payload on `topic`
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every following publish fail with a transport error
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "bus offline".to_string(),
            });
        }

        if retain {
            self.retained
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(topic.to_string(), payload.clone());
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                retain,
            });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(filter.to_string());
        Ok(())
    }
}
