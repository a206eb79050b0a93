//! Configuration management for quote-relay
//!
//! Layers, lowest precedence first: built-in defaults, `config/default`,
//! `config/local`, an optional `--config` file, `QUOTE_RELAY__*` environment
//! variables, command line flags.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cli::Cli;
use crate::types::PublishMode;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub quotes: QuotesConfig,
    /// `name -> symbol` entries registered at startup, before any control
    /// message arrives
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
    /// Log routine fetch/publish traces
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Pause after a connection error before polling the event loop again
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    /// Root topic for control input and quote output
    pub topic: String,
    /// Gap between the end of one poll cycle and the start of the next
    pub interval_minutes: u64,
    /// Delay before the out-of-cycle fetch that follows a registration
    pub debounce_secs: u64,
    /// Upper bound on one provider call
    pub fetch_timeout_secs: u64,
    pub publish_mode: PublishMode,
    pub provider_url: String,
}

impl QuotesConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from files, environment and command line
    pub fn load(cli: &Cli) -> Result<Self> {
        let client_id = format!("quote-relay-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let mut builder = Config::builder()
            // MQTT defaults
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883)?
            .set_default("mqtt.client_id", client_id)?
            .set_default("mqtt.keep_alive_secs", 30)?
            .set_default("mqtt.reconnect_delay_ms", 5000)?
            // Quote defaults
            .set_default("quotes.topic", "Yahoo Quotes")?
            .set_default("quotes.interval_minutes", 15)?
            .set_default("quotes.debounce_secs", 2)?
            .set_default("quotes.fetch_timeout_secs", 30)?
            .set_default("quotes.publish_mode", "fields")?
            .set_default("quotes.provider_url", crate::provider::YAHOO_QUOTE_URL)?
            .set_default("debug", false)?
            // Load config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        let mut builder = builder
            // Override with environment variables (QUOTE_RELAY__*)
            .add_source(Environment::with_prefix("QUOTE_RELAY").separator("__"))
            // Command line wins
            .set_override_option("mqtt.host", cli.host.clone())?
            .set_override_option("mqtt.port", cli.port.map(i64::from))?
            .set_override_option("mqtt.username", cli.username.clone())?
            .set_override_option("mqtt.password", cli.password.clone())?
            .set_override_option("quotes.topic", cli.topic.clone())?
            .set_override_option("quotes.interval_minutes", cli.interval.map(|v| v as i64))?
            .set_override_option("quotes.publish_mode", cli.publish_mode.clone())?;

        if cli.debug {
            builder = builder.set_override("debug", true)?;
        }

        let config = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let topic = self.quotes.topic.trim();
        if topic.is_empty() {
            bail!("quotes.topic must not be empty");
        }
        if topic.contains(['+', '#']) {
            bail!("quotes.topic must not contain MQTT wildcards: {}", topic);
        }
        if self.quotes.interval_minutes == 0 {
            bail!("quotes.interval_minutes must be at least 1");
        }
        if self.quotes.fetch_timeout_secs == 0 {
            bail!("quotes.fetch_timeout_secs must be at least 1");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must not be 0");
        }
        for (name, symbol) in &self.entries {
            if name.is_empty() || name.contains(['/', '+', '#']) {
                bail!("invalid entry name {:?}", name);
            }
            if symbol.trim().is_empty() {
                bail!("entry {:?} has no symbol", name);
            }
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "broker={}:{} topic={:?} interval={}m mode={} entries={} debug={}",
            self.mqtt.host,
            self.mqtt.port,
            self.quotes.topic,
            self.quotes.interval_minutes,
            self.quotes.publish_mode,
            self.entries.len(),
            self.debug
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_files() {
        let cfg = AppConfig::load(&Cli::default()).expect("defaults should load");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.quotes.topic, "Yahoo Quotes");
        assert_eq!(cfg.quotes.interval_minutes, 15);
        assert_eq!(cfg.quotes.publish_mode, PublishMode::Fields);
        assert_eq!(cfg.quotes.interval(), Duration::from_secs(900));
        assert!(cfg.mqtt.client_id.starts_with("quote-relay-"));
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = Cli {
            host: Some("broker.local".to_string()),
            port: Some(1884),
            topic: Some("Quotes".to_string()),
            interval: Some(5),
            publish_mode: Some("record".to_string()),
            debug: true,
            ..Cli::default()
        };

        let cfg = AppConfig::load(&cli).expect("overrides should load");
        assert_eq!(cfg.mqtt.host, "broker.local");
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.quotes.topic, "Quotes");
        assert_eq!(cfg.quotes.interval_minutes, 5);
        assert_eq!(cfg.quotes.publish_mode, PublishMode::Record);
        assert!(cfg.debug);
    }

    #[test]
    fn validate_rejects_wildcard_topic_and_zero_interval() {
        let mut cfg = AppConfig::load(&Cli::default()).unwrap();
        cfg.quotes.topic = "Quotes/#".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::load(&Cli::default()).unwrap();
        cfg.quotes.interval_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_entries() {
        let mut cfg = AppConfig::load(&Cli::default()).unwrap();
        cfg.entries = BTreeMap::from([("a/b".to_string(), "AAPL".to_string())]);
        assert!(cfg.validate().is_err());

        cfg.entries = BTreeMap::from([("Apple".to_string(), " ".to_string())]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn entries_load_as_name_to_symbol_map() {
        let path = std::env::temp_dir().join(format!(
            "quote-relay-entries-{}.yaml",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&path, "entries:\n  apple: AAPL\n  spy: SPY\n").unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            ..Cli::default()
        };
        let cfg = AppConfig::load(&cli);
        std::fs::remove_file(&path).ok();

        let cfg = cfg.expect("entries map should load");
        assert_eq!(cfg.entries.len(), 2);
        assert_eq!(cfg.entries["apple"], "AAPL");
        assert_eq!(cfg.entries["spy"], "SPY");
    }
}
