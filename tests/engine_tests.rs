//! End-to-end tests for the quote engine

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use quote_relay::bus::{InMemoryBus, InboundMessage, Publisher};
use quote_relay::engine::{
    ControlHandler, ControlOutcome, Debouncer, EngineSettings, EntryRegistry, QuoteEngine,
    Registration,
};
use quote_relay::error::ProviderError;
use quote_relay::provider::{FetchedQuotes, QuoteProvider};
use quote_relay::types::{PublishMode, Quote, RawQuote};

const ROOT: &str = "Yahoo Quotes";

/// Provider serving whatever raw quotes the test has set
#[derive(Default)]
struct ScriptedProvider {
    quotes: Mutex<HashMap<String, RawQuote>>,
    calls: Mutex<Vec<Vec<String>>>,
    /// When set, each fetch signals `started` and then waits on the gate
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl ScriptedProvider {
    fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    fn set(&self, symbol: &str, raw: RawQuote) {
        self.quotes.lock().unwrap().insert(symbol.to_string(), raw);
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<FetchedQuotes, ProviderError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        self.calls.lock().unwrap().push(symbols.to_vec());

        if let Some(gate) = &self.gate {
            self.started.notify_one();
            gate.notified().await;
        }

        let quotes = self.quotes.lock().unwrap();
        Ok(symbols
            .iter()
            .map(|s| {
                let result = match quotes.get(s) {
                    Some(raw) => Quote::from_raw(s, raw.clone()),
                    None => Err(ProviderError::MissingSymbol(s.clone())),
                };
                (s.clone(), result)
            })
            .collect())
    }
}

struct Harness {
    registry: Arc<EntryRegistry>,
    bus: Arc<InMemoryBus>,
    provider: Arc<ScriptedProvider>,
    engine: Arc<QuoteEngine>,
    control: ControlHandler,
}

fn harness(mode: PublishMode, provider: ScriptedProvider) -> Harness {
    let registry = Arc::new(EntryRegistry::new());
    let bus = Arc::new(InMemoryBus::new());
    let provider = Arc::new(provider);
    let engine = Arc::new(QuoteEngine::new(
        registry.clone(),
        provider.clone(),
        Publisher::new(bus.clone()),
        EngineSettings {
            root_topic: ROOT.to_string(),
            publish_mode: mode,
            fetch_timeout: Duration::from_secs(5),
        },
    ));
    let debouncer = Arc::new(Debouncer::new(engine.clone(), Duration::from_secs(2)));
    let control = ControlHandler::new(ROOT, registry.clone(), debouncer);

    Harness {
        registry,
        bus,
        provider,
        engine,
        control,
    }
}

fn raw(price: f64, change: f64, time: i64) -> RawQuote {
    RawQuote {
        display_name: Some("Apple Inc.".to_string()),
        quote_type: Some("EQUITY".to_string()),
        currency: Some("USD".to_string()),
        market_state: Some("REGULAR".to_string()),
        price: Some(price),
        change_percent: Some(change),
        time: Some(time),
    }
}

fn control(name: &str, payload: &str) -> InboundMessage {
    InboundMessage::new(format!("{}/{}", ROOT, name), payload)
}

#[tokio::test]
async fn publishes_full_quote_then_only_changes() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    h.registry.register("AAPL", "AAPL").await;

    h.provider.set("AAPL", raw(150.004, 1.23, 1_700_000_000));
    let report = h.engine.run_cycle().await.expect("first cycle");
    assert_eq!(report.published, 1);

    let first = h.bus.take_published();
    assert_eq!(first.len(), 8);
    assert_eq!(h.bus.retained("Yahoo Quotes/AAPL/price").as_deref(), Some("150.0"));
    assert_eq!(h.bus.retained("Yahoo Quotes/AAPL/change").as_deref(), Some("1.2"));
    assert_eq!(
        h.bus.retained("Yahoo Quotes/AAPL/name").as_deref(),
        Some("\"Apple Inc.\"")
    );

    let report = h.engine.run_cycle().await.expect("second cycle");
    assert_eq!(report.unchanged, 1);
    assert!(h.bus.take_published().is_empty());

    h.provider.set("AAPL", raw(151.006, 1.23, 1_700_000_000));
    h.engine.run_cycle().await.expect("third cycle");
    let third = h.bus.take_published();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].topic, "Yahoo Quotes/AAPL/price");
    assert_eq!(third[0].payload, "151.01");
    assert!(third[0].retain);
}

#[tokio::test]
async fn record_mode_publishes_whole_quote_on_change() {
    let h = harness(PublishMode::Record, ScriptedProvider::default());
    h.registry.register("AAPL", "AAPL").await;

    h.provider.set("AAPL", raw(150.004, 1.23, 1_700_000_000));
    h.engine.run_cycle().await.unwrap();
    h.engine.run_cycle().await.unwrap();
    h.provider.set("AAPL", raw(151.006, 1.23, 1_700_000_060));
    h.engine.run_cycle().await.unwrap();

    let published = h.bus.published();
    assert_eq!(published.len(), 2);
    let latest: Quote =
        serde_json::from_str(&h.bus.retained("Yahoo Quotes/AAPL").unwrap()).unwrap();
    assert_eq!(latest.price, 151.01);
    assert_eq!(latest.change, 1.2);
}

#[tokio::test]
async fn removal_stops_publishing_for_that_name_only() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    h.registry.register("AAPL", "AAPL").await;
    h.registry.register("Apple", "AAPL").await;

    h.provider.set("AAPL", raw(150.0, 1.0, 1_700_000_000));
    h.engine.run_cycle().await.unwrap();
    h.bus.take_published();

    let outcome = h.control.handle(&control("AAPL", "")).await;
    assert_eq!(outcome, ControlOutcome::Removed { existed: true });
    assert!(!h.registry.snapshot().await.contains_key("AAPL"));

    h.provider.set("AAPL", raw(152.0, 2.0, 1_700_000_060));
    h.engine.run_cycle().await.unwrap();

    let published = h.bus.published();
    assert!(!published.is_empty());
    assert!(published
        .iter()
        .all(|m| m.topic.starts_with("Yahoo Quotes/Apple/")));
}

#[tokio::test]
async fn malformed_control_payload_leaves_registry_unchanged() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    h.registry.register("AAPL", "AAPL").await;
    let before = h.registry.snapshot().await;

    assert_eq!(
        h.control.handle(&control("AAPL", "not json")).await,
        ControlOutcome::Rejected
    );
    assert_eq!(
        h.control.handle(&control("MSFT", r#"{"ticker":"MSFT"}"#)).await,
        ControlOutcome::Rejected
    );
    assert_eq!(h.registry.snapshot().await, before);
}

#[tokio::test]
async fn messages_outside_control_topics_are_ignored() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());

    let msg = InboundMessage::new("Yahoo Quotes/AAPL/price", "150.0");
    assert_eq!(h.control.handle(&msg).await, ControlOutcome::Ignored);
    let msg = InboundMessage::new("Other/AAPL", r#"{"symbol":"AAPL"}"#);
    assert_eq!(h.control.handle(&msg).await, ControlOutcome::Ignored);
    assert!(h.registry.is_empty().await);
}

#[tokio::test]
async fn removal_during_fetch_is_not_published() {
    let h = harness(PublishMode::Fields, ScriptedProvider::gated());
    h.registry.register("AAPL", "AAPL").await;
    h.provider.set("AAPL", raw(150.0, 1.0, 1_700_000_000));

    let cycle = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.run_cycle().await }
    });

    h.provider.started.notified().await;
    h.control.handle(&control("AAPL", "")).await;
    h.provider.gate.as_ref().unwrap().notify_one();

    let report = cycle
        .await
        .expect("cycle task should not panic")
        .expect("cycle should succeed");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.published, 0);
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn shared_symbol_is_fetched_once_and_diffed_per_name() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    h.registry.register("Apple", "AAPL").await;
    h.registry.register("Apple2", "AAPL").await;
    h.registry.register("Micro", "MSFT").await;

    h.provider.set("AAPL", raw(150.0, 1.0, 1_700_000_000));
    h.provider.set("MSFT", raw(400.0, 0.5, 1_700_000_000));
    let report = h.engine.run_cycle().await.unwrap();

    assert_eq!(report.published, 3);
    assert_eq!(
        h.provider.calls(),
        vec![vec!["AAPL".to_string(), "MSFT".to_string()]]
    );
    assert!(h.bus.retained("Yahoo Quotes/Apple/price").is_some());
    assert!(h.bus.retained("Yahoo Quotes/Apple2/price").is_some());
}

#[tokio::test]
async fn empty_registry_makes_no_provider_call() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 0);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_provider_times_out() {
    let h = harness(PublishMode::Fields, ScriptedProvider::gated());
    h.registry.register("AAPL", "AAPL").await;

    let err = h.engine.run_cycle().await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(5)));
    assert!(h.bus.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn registration_triggers_prompt_initial_publish() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    h.provider.set("AAPL", raw(150.0, 1.0, 1_700_000_000));

    let outcome = h
        .control
        .handle(&control("Apple", r#"{"symbol":"AAPL"}"#))
        .await;
    assert_eq!(outcome, ControlOutcome::Registered(Registration::Added));
    assert!(h.bus.published().is_empty());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.provider.calls().len(), 1);
    assert_eq!(h.bus.published().len(), 8);

    // Re-sending the same registration resets the entry and republishes it in full.
    let outcome = h
        .control
        .handle(&control("Apple", r#"{"symbol":"AAPL"}"#))
        .await;
    assert_eq!(
        outcome,
        ControlOutcome::Registered(Registration::Replaced {
            previous_symbol: "AAPL".to_string()
        })
    );
    assert!(h.registry.last_quote("Apple").await.is_none());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.provider.calls().len(), 2);
    assert_eq!(h.bus.published().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn record_echo_on_control_topic_is_ignored() {
    let h = harness(PublishMode::Record, ScriptedProvider::default());
    h.registry.register("Apple", "AAPL").await;
    h.provider.set("AAPL", raw(150.0, 1.0, 1_700_000_000));
    h.engine.run_cycle().await.unwrap();

    let echoed = h.bus.retained("Yahoo Quotes/Apple").unwrap();
    let outcome = h.control.handle(&control("Apple", &echoed)).await;
    assert_eq!(outcome, ControlOutcome::Echo);
    assert!(h.registry.last_quote("Apple").await.is_some());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.provider.calls().len(), 1);
    assert_eq!(h.bus.published().len(), 1);
}

#[tokio::test]
async fn blank_symbol_is_rejected() {
    let h = harness(PublishMode::Fields, ScriptedProvider::default());
    assert_eq!(
        h.control.handle(&control("Apple", r#"{"symbol":"  "}"#)).await,
        ControlOutcome::Rejected
    );
    assert!(h.registry.is_empty().await);
}
