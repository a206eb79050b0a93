//! quote-relay binary
//!
//! Connects to the broker, subscribes to control topics and polls quotes
//! until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quote_relay::bus::{
    control_filter, InMemoryBus, InboundMessage, MessageBus, MqttBus, Publisher,
};
use quote_relay::cli::Cli;
use quote_relay::config::AppConfig;
use quote_relay::engine::{
    ControlHandler, Debouncer, EngineSettings, EntryRegistry, PollScheduler, QuoteEngine,
};
use quote_relay::provider::YahooClient;

type BusParts = (
    Arc<dyn MessageBus>,
    Option<mpsc::Receiver<InboundMessage>>,
    Option<JoinHandle<()>>,
);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;

    init_tracing(config.debug, cli.log_json);
    info!(config = %config, "Starting quote-relay v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // The broker connection outlives the engine tasks so in-flight cycles can
    // still publish.
    let (bus_shutdown_tx, bus_shutdown_rx) = watch::channel(false);

    let registry = Arc::new(EntryRegistry::new());
    for (name, symbol) in &config.entries {
        registry.register(name, symbol).await;
        info!(name = %name, symbol = %symbol, "Added configured entry");
    }

    let provider = YahooClient::new(&config.quotes.provider_url, config.quotes.fetch_timeout())
        .context("Failed to create quote provider client")?;

    let (bus, inbound, bus_task): BusParts = if cli.dry_run {
        info!("Dry run: publishing to in-process bus");
        (Arc::new(InMemoryBus::new()) as Arc<dyn MessageBus>, None, None)
    } else {
        let (bus, inbound, task) = MqttBus::connect(&config.mqtt, bus_shutdown_rx)
            .await
            .context("Unable to connect to MQTT broker")?;
        let filter = control_filter(&config.quotes.topic);
        bus.subscribe(&filter)
            .await
            .with_context(|| format!("Failed to subscribe to {}", filter))?;
        info!(filter = %filter, "Subscribed to control topics");
        (Arc::new(bus) as Arc<dyn MessageBus>, Some(inbound), Some(task))
    };

    let engine = Arc::new(QuoteEngine::new(
        registry.clone(),
        Arc::new(provider),
        Publisher::new(bus),
        EngineSettings {
            root_topic: config.quotes.topic.clone(),
            publish_mode: config.quotes.publish_mode,
            fetch_timeout: config.quotes.fetch_timeout(),
        },
    ));
    let debouncer = Arc::new(Debouncer::new(engine.clone(), config.quotes.debounce()));

    let control_task = inbound.map(|rx| {
        let handler = ControlHandler::new(
            config.quotes.topic.clone(),
            registry.clone(),
            debouncer.clone(),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { handler.run(rx, shutdown).await })
    });

    let scheduler = PollScheduler::new(engine.clone(), config.quotes.interval());
    let scheduler_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    for (label, task) in [
        ("scheduler", Some(scheduler_task)),
        ("control handler", control_task),
    ] {
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(task = label, error = %e, "Task ended abnormally");
            }
        }
    }
    debouncer.shutdown().await;

    let _ = bus_shutdown_tx.send(true);
    if let Some(task) = bus_task {
        if let Err(e) = task.await {
            error!(task = "mqtt event loop", error = %e, "Task ended abnormally");
        }
    }

    info!("Stopped");
    Ok(())
}

fn init_tracing(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,quote_relay={}", level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
