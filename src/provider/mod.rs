//! Quote providers
//!
//! A provider turns a batch of symbols into normalized quotes with a single
//! upstream call. Retries are left to the caller's schedule.

mod yahoo;

pub use yahoo::{YahooClient, YAHOO_QUOTE_URL};

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

use crate::error::ProviderError;
use crate::types::Quote;

/// Per-symbol fetch results. A missing or unusable symbol is an `Err` entry,
/// not a failure of the whole batch.
pub type FetchedQuotes = HashMap<String, Result<Quote, ProviderError>>;

/// Trait for quote provider clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Fetch quotes for all `symbols` in one call.
    ///
    /// An empty `symbols` slice returns an empty map without touching the
    /// network.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<FetchedQuotes, ProviderError>;
}

/// Sorted, de-duplicated symbols. Several entries may share one symbol.
pub fn unique_symbols<'a, I>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    symbols
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
