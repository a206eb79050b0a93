//! Error types for the quote engine
//!
//! None of these stop the engine: provider and config errors are scoped to
//! one cycle or one control message, transport errors are left to the MQTT
//! event loop to recover from.

use thiserror::Error;

/// Failure fetching quotes, for the whole batch or a single symbol
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("no data returned for symbol {0}")]
    MissingSymbol(String),

    #[error("unusable data for symbol {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },

    #[error("provider call timed out after {0}s")]
    Timeout(u64),
}

/// Control message payload that could not be turned into a registration
#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("configuration {0:?} has a blank symbol")]
    Empty(String),

    #[error("invalid configuration {payload:?}: {source}")]
    Json {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration {0:?} has no symbol")]
    MissingSymbol(String),
}

/// Message bus failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to broker {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to subscribe to {filter}: {reason}")]
    Subscribe { filter: String, reason: String },
}
