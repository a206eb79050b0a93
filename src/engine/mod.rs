//! Quote engine
//!
//! Wires the registry, the provider and the reconciler into one
//! fetch-and-reconcile cycle. The scheduler runs it on a fixed gap, the
//! debouncer runs it shortly after a registration.

pub mod control;
pub mod reconciler;
pub mod registry;
pub mod scheduler;

pub use control::{ControlCommand, ControlHandler, ControlOutcome, ControlPayload};
pub use reconciler::{CycleReport, Reconciler};
pub use registry::{Entry, EntryRegistry, QuoteUpdate, Registration};
pub use scheduler::{Debouncer, PollScheduler, SchedulerState};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::bus::Publisher;
use crate::error::ProviderError;
use crate::provider::{unique_symbols, QuoteProvider};
use crate::types::PublishMode;

/// Engine settings taken from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub root_topic: String,
    pub publish_mode: PublishMode,
    pub fetch_timeout: Duration,
}

pub struct QuoteEngine {
    registry: Arc<EntryRegistry>,
    provider: Arc<dyn QuoteProvider>,
    reconciler: Reconciler,
    fetch_timeout: Duration,
}

impl QuoteEngine {
    pub fn new(
        registry: Arc<EntryRegistry>,
        provider: Arc<dyn QuoteProvider>,
        publisher: Publisher,
        settings: EngineSettings,
    ) -> Self {
        let reconciler = Reconciler::new(
            registry.clone(),
            publisher,
            settings.root_topic,
            settings.publish_mode,
        );
        Self {
            registry,
            provider,
            reconciler,
            fetch_timeout: settings.fetch_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    /// One fetch-and-reconcile pass over a snapshot of the registry.
    pub async fn run_cycle(&self) -> Result<CycleReport, ProviderError> {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            debug!("No entries registered, nothing to fetch");
            return Ok(CycleReport::default());
        }

        let symbols = unique_symbols(snapshot.values());
        debug!(
            provider = self.provider.name(),
            "Fetching quotes for symbols {}",
            symbols.join(",")
        );

        let fetched = tokio::time::timeout(self.fetch_timeout, self.provider.fetch_quotes(&symbols))
            .await
            .map_err(|_| ProviderError::Timeout(self.fetch_timeout.as_secs()))??;

        Ok(self.reconciler.reconcile(&snapshot, &fetched).await)
    }

    /// Run a cycle and log the outcome; failures never propagate.
    pub async fn run_cycle_logged(&self, trigger: &'static str) -> Option<CycleReport> {
        debug!(trigger, "Updating quotes...");
        match self.run_cycle().await {
            Ok(report) => {
                if report.published > 0 || report.skipped > 0 {
                    info!(
                        trigger,
                        published = report.published,
                        messages = report.messages,
                        unchanged = report.unchanged,
                        skipped = report.skipped,
                        "Quote cycle complete"
                    );
                } else {
                    debug!(trigger, unchanged = report.unchanged, "Quote cycle complete, no changes");
                }
                Some(report)
            }
            Err(e) => {
                error!(trigger, error = %e, "Quote cycle failed");
                None
            }
        }
    }
}
