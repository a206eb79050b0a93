//! Command line flags
//!
//! Every flag is optional and, when given, overrides configuration files and
//! `QUOTE_RELAY__*` variables. Broker settings also read the plain `MQTT_*`
//! variables.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "quote-relay", version, about)]
pub struct Cli {
    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    pub host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    pub port: Option<u16>,

    /// User name for the MQTT broker
    #[arg(long, env = "MQTT_USERNAME")]
    pub username: Option<String>,

    /// Password for the MQTT broker
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// MQTT root topic
    #[arg(long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    /// Poll interval in minutes
    #[arg(long)]
    pub interval: Option<u64>,

    /// Publish changed fields one by one ("fields") or the whole quote ("record")
    #[arg(long, value_parser = ["fields", "record"])]
    pub publish_mode: Option<String>,

    /// Extra configuration file, layered over config/default and config/local
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Debug mode
    #[arg(long)]
    pub debug: bool,

    /// Publish to an in-process bus instead of a broker (configured entries only)
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}
