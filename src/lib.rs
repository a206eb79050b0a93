//! quote-relay library
//!
//! Polls market quotes for a runtime-managed set of named instruments and
//! publishes what changed to MQTT as retained messages.

pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod types;
