//! Diff and publish
//!
//! Compares each fetched quote with what the entry last published and emits
//! only the difference. The registry swap in `update_quote` decides what the
//! new quote is diffed against, so overlapping cycles never publish the same
//! change twice.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::registry::{EntryRegistry, QuoteUpdate};
use crate::bus::{field_topic, record_topic, Publisher};
use crate::provider::FetchedQuotes;
use crate::types::{PublishMode, Quote, QuoteField};

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries that published something
    pub published: usize,
    /// Messages handed to the bus
    pub messages: usize,
    /// Entries whose quote did not change
    pub unchanged: usize,
    /// Entries skipped: failed fetch, removed mid-cycle or stale quote
    pub skipped: usize,
}

pub struct Reconciler {
    registry: Arc<EntryRegistry>,
    publisher: Publisher,
    root: String,
    mode: PublishMode,
}

impl Reconciler {
    pub fn new(
        registry: Arc<EntryRegistry>,
        publisher: Publisher,
        root: impl Into<String>,
        mode: PublishMode,
    ) -> Self {
        Self {
            registry,
            publisher,
            root: root.into(),
            mode,
        }
    }

    /// Reconcile every entry of `snapshot` against `fetched`.
    pub async fn reconcile(
        &self,
        snapshot: &BTreeMap<String, String>,
        fetched: &FetchedQuotes,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        for (name, symbol) in snapshot {
            let quote = match fetched.get(symbol) {
                Some(Ok(quote)) => quote.clone(),
                Some(Err(e)) => {
                    warn!(name = %name, symbol = %symbol, error = %e, "Skipping entry");
                    report.skipped += 1;
                    continue;
                }
                None => {
                    warn!(name = %name, symbol = %symbol, "No quote fetched, skipping entry");
                    report.skipped += 1;
                    continue;
                }
            };

            let fields = match self.registry.update_quote(name, quote.clone()).await {
                QuoteUpdate::Stored { previous: None } => QuoteField::ALL.to_vec(),
                QuoteUpdate::Stored {
                    previous: Some(previous),
                } => quote.changed_fields(&previous),
                QuoteUpdate::Missing => {
                    debug!(name = %name, "Entry removed or re-pointed during fetch");
                    report.skipped += 1;
                    continue;
                }
                QuoteUpdate::Stale => {
                    debug!(name = %name, time = %quote.time, "Ignoring stale quote");
                    report.skipped += 1;
                    continue;
                }
            };

            if fields.is_empty() {
                report.unchanged += 1;
                continue;
            }

            let sent = self.publish(name, &quote, &fields).await;
            if sent == 0 && !self.registry.tracks(name, symbol).await {
                debug!(name = %name, "Entry removed before publish");
                report.skipped += 1;
                continue;
            }
            report.published += 1;
            report.messages += sent;
        }

        report
    }

    /// Publish `fields` of `quote` under `name`. Stops as soon as the entry no
    /// longer tracks the quote's symbol.
    async fn publish(&self, name: &str, quote: &Quote, fields: &[QuoteField]) -> usize {
        match self.mode {
            PublishMode::Record => {
                if !self.registry.tracks(name, &quote.symbol).await {
                    return 0;
                }
                let topic = record_topic(&self.root, name);
                usize::from(self.publisher.publish(&topic, quote).await)
            }
            PublishMode::Fields => {
                let mut sent = 0;
                for &field in fields {
                    if !self.registry.tracks(name, &quote.symbol).await {
                        break;
                    }
                    let topic = field_topic(&self.root, name, field);
                    if self.publisher.publish(&topic, &quote.field_value(field)).await {
                        sent += 1;
                    }
                }
                sent
            }
        }
    }
}
