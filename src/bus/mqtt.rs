//! MQTT transport built on rumqttc
//!
//! The event loop runs in its own task. It forwards inbound publishes to an
//! mpsc channel, re-subscribes after every (re)connect and keeps polling
//! after connection errors, which is what drives reconnects in rumqttc.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{InboundMessage, MessageBus};
use crate::config::MqttConfig;
use crate::error::TransportError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const DISCONNECT_GRACE_MS: u64 = 1000;

/// MQTT client handle implementing [`MessageBus`]
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    filters: Arc<RwLock<Vec<String>>>,
}

impl MqttBus {
    /// Connect to the broker and start the event loop task.
    ///
    /// Waits for the first `ConnAck`; failing to get one is the only fatal
    /// transport error. Returns the bus handle, the inbound message stream
    /// and the event loop task.
    pub async fn connect(
        cfg: &MqttConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>, JoinHandle<()>), TransportError> {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
        if let Some(username) = cfg.username.as_ref().filter(|u| !u.is_empty()) {
            options.set_credentials(username.clone(), cfg.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        info!(host = %cfg.host, port = cfg.port, "Connecting to MQTT broker...");

        let connect_err = |reason: String| TransportError::Connect {
            host: cfg.host.clone(),
            port: cfg.port,
            reason,
        };

        let first = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            wait_for_connack(&mut eventloop),
        )
        .await
        .map_err(|_| connect_err(format!("no CONNACK within {}s", CONNECT_TIMEOUT_SECS)))?;
        first.map_err(connect_err)?;

        info!(host = %cfg.host, port = cfg.port, "✅ Connected to MQTT broker");

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let bus = Self {
            client,
            filters: Arc::new(RwLock::new(Vec::new())),
        };

        let task = tokio::spawn(run_event_loop(
            eventloop,
            bus.clone(),
            tx,
            shutdown,
            Duration::from_millis(cfg.reconnect_delay_ms),
        ));

        Ok((bus, rx, task))
    }

    fn resubscribe_all(&self) {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner()).clone();
        for filter in filters {
            if let Err(e) = self.client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                warn!(filter = %filter, error = %e, "Failed to re-subscribe");
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.into_bytes())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        {
            let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
            if !filters.iter().any(|f| f == filter) {
                filters.push(filter.to_string());
            }
        }

        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    bus: MqttBus,
    tx: mpsc::Sender<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    };
                    if tx.send(msg).await.is_err() {
                        debug!("Inbound receiver dropped, ignoring message");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT reconnected, restoring subscriptions");
                    bus.resubscribe_all();
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(reconnect_delay).await;
                }
            },
            _ = shutdown.changed() => {
                info!("Disconnecting from MQTT broker");
                let _ = bus.client.try_disconnect();
                let grace = Duration::from_millis(DISCONNECT_GRACE_MS);
                let _ = tokio::time::timeout(grace, async {
                    while eventloop.poll().await.is_ok() {}
                })
                .await;
                break;
            }
        }
    }
}
