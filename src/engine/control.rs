//! Control messages
//!
//! `<root>/<name>` with an empty payload removes `name`; a JSON object with a
//! `symbol` registers it. Anything else is logged and dropped.
//!
//! In record mode quotes are published to the same `<root>/<name>` topics, so
//! the handler also sees its own output. A payload that is a complete quote
//! record is recognised as such and never re-registers the entry.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::registry::{EntryRegistry, Registration};
use super::scheduler::Debouncer;
use crate::bus::{control_name, InboundMessage};
use crate::error::ConfigParseError;
use crate::types::Quote;

/// Validated registration payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPayload {
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
struct RawControlPayload {
    symbol: Option<String>,
}

impl ControlPayload {
    pub fn parse(payload: &str) -> Result<Self, ConfigParseError> {
        let raw: RawControlPayload =
            serde_json::from_str(payload).map_err(|source| ConfigParseError::Json {
                payload: payload.to_string(),
                source,
            })?;

        match raw.symbol.map(|s| s.trim().to_string()) {
            Some(symbol) if symbol.is_empty() => {
                Err(ConfigParseError::Empty(payload.to_string()))
            }
            Some(symbol) => Ok(Self { symbol }),
            None => Err(ConfigParseError::MissingSymbol(payload.to_string())),
        }
    }
}

/// What a control payload asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Register(ControlPayload),
    Remove,
    /// A published quote record seen on its own topic
    Echo,
}

impl ControlCommand {
    pub fn parse(payload: &str) -> Result<Self, ConfigParseError> {
        if payload.trim().is_empty() {
            Ok(ControlCommand::Remove)
        } else if serde_json::from_str::<Quote>(payload).is_ok() {
            Ok(ControlCommand::Echo)
        } else {
            ControlPayload::parse(payload).map(ControlCommand::Register)
        }
    }
}

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Topic is not a control topic
    Ignored,
    Registered(Registration),
    Removed { existed: bool },
    /// Our own record-mode output
    Echo,
    Rejected,
}

pub struct ControlHandler {
    root: String,
    registry: Arc<EntryRegistry>,
    debouncer: Arc<Debouncer>,
}

impl ControlHandler {
    pub fn new(
        root: impl Into<String>,
        registry: Arc<EntryRegistry>,
        debouncer: Arc<Debouncer>,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            debouncer,
        }
    }

    pub async fn handle(&self, msg: &InboundMessage) -> ControlOutcome {
        let name = match control_name(&self.root, &msg.topic) {
            Some(name) => name,
            None => {
                debug!(topic = %msg.topic, "Ignoring message outside control topics");
                return ControlOutcome::Ignored;
            }
        };

        match ControlCommand::parse(&msg.payload) {
            Ok(ControlCommand::Remove) => {
                let existed = self.registry.remove(name).await;
                if existed {
                    info!(name = %name, "Removed entry");
                } else {
                    debug!(name = %name, "Removal for unknown entry");
                }
                ControlOutcome::Removed { existed }
            }
            Ok(ControlCommand::Register(payload)) => {
                let registration = self.registry.register(name, &payload.symbol).await;
                match &registration {
                    Registration::Added => {
                        info!(name = %name, symbol = %payload.symbol, "Added entry");
                    }
                    Registration::Replaced { previous_symbol } => {
                        info!(
                            name = %name,
                            symbol = %payload.symbol,
                            previous = %previous_symbol,
                            "Replaced entry"
                        );
                    }
                }
                self.debouncer.trigger();
                ControlOutcome::Registered(registration)
            }
            Ok(ControlCommand::Echo) => {
                debug!(name = %name, "Ignoring published quote record");
                ControlOutcome::Echo
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Invalid control message");
                ControlOutcome::Rejected
            }
        }
    }

    /// Handle inbound messages until the channel closes or shutdown.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(root = %self.root, "Control handler started");
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        self.handle(&msg).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        self.debouncer.cancel();
        info!("Control handler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_payload_is_removal() {
        assert_eq!(ControlCommand::parse("").unwrap(), ControlCommand::Remove);
        assert_eq!(ControlCommand::parse("  \n").unwrap(), ControlCommand::Remove);
    }

    #[test]
    fn symbol_payload_is_registration() {
        let cmd = ControlCommand::parse(r#"{"symbol": " AAPL "}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Register(ControlPayload {
                symbol: "AAPL".to_string()
            })
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let cmd = ControlCommand::parse(r#"{"symbol":"MSFT","name":"Microsoft","price":400.0}"#);
        assert!(matches!(cmd, Ok(ControlCommand::Register(p)) if p.symbol == "MSFT"));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            ControlCommand::parse("not json"),
            Err(ConfigParseError::Json { .. })
        ));
        assert!(matches!(
            ControlCommand::parse(r#""AAPL""#),
            Err(ConfigParseError::Json { .. })
        ));
        assert!(matches!(
            ControlCommand::parse(r#"{"ticker":"AAPL"}"#),
            Err(ConfigParseError::MissingSymbol(_))
        ));
        assert!(matches!(
            ControlCommand::parse(r#"{"symbol":"  "}"#),
            Err(ConfigParseError::Empty(_))
        ));
    }

    #[test]
    fn published_record_is_an_echo() {
        let record = r#"{"symbol":"AAPL","name":"Apple Inc.","type":"EQUITY","currency":"USD","market":"REGULAR","price":150.0,"change":1.2,"time":"2023-11-14T22:13:20Z"}"#;
        assert_eq!(ControlCommand::parse(record).unwrap(), ControlCommand::Echo);

        let partial = r#"{"symbol":"AAPL","price":150.0,"change":1.2}"#;
        assert!(matches!(
            ControlCommand::parse(partial),
            Ok(ControlCommand::Register(_))
        ));
    }
}
