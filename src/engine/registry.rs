//! Entry registry
//!
//! Named subscriptions and their last published quote. Control messages and
//! poll cycles both go through this type; every operation takes the lock
//! once and never holds it across I/O.

use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::types::Quote;

/// One tracked instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub symbol: String,
    pub last_quote: Option<Quote>,
}

/// Outcome of [`EntryRegistry::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// New name
    Added,
    /// Existing name was overwritten and its cached quote dropped, even when
    /// the symbol is the same
    Replaced { previous_symbol: String },
}

/// Outcome of [`EntryRegistry::update_quote`]
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteUpdate {
    /// Stored; carries the quote it replaced
    Stored { previous: Option<Quote> },
    /// Entry was removed, or re-pointed to another symbol, after the fetch began
    Missing,
    /// Older than the stored quote; nothing stored
    Stale,
}

#[derive(Debug, Default)]
pub struct EntryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`. The entry always starts without a cached
    /// quote, so the next cycle publishes it in full.
    pub async fn register(&self, name: &str, symbol: &str) -> Registration {
        let entry = Entry {
            name: name.to_string(),
            symbol: symbol.to_string(),
            last_quote: None,
        };
        match self.entries.write().await.insert(name.to_string(), entry) {
            Some(previous) => Registration::Replaced {
                previous_symbol: previous.symbol,
            },
            None => Registration::Added,
        }
    }

    /// Whether `name` is registered and still points at `symbol`
    pub async fn tracks(&self, name: &str, symbol: &str) -> bool {
        self.entries
            .read()
            .await
            .get(name)
            .is_some_and(|e| e.symbol == symbol)
    }

    /// Remove `name`; returns whether it was present.
    pub async fn remove(&self, name: &str) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    /// Point-in-time `name -> symbol` copy
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| (e.name.clone(), e.symbol.clone()))
            .collect()
    }

    /// Store `quote` as the last-seen quote of `name`.
    ///
    /// Only stores when the entry still exists, still tracks `quote.symbol`
    /// and `quote` is not older than what is stored.
    pub async fn update_quote(&self, name: &str, quote: Quote) -> QuoteUpdate {
        let mut entries = self.entries.write().await;
        let entry = match entries.get_mut(name) {
            Some(e) if e.symbol == quote.symbol => e,
            _ => return QuoteUpdate::Missing,
        };

        if let Some(last) = &entry.last_quote {
            if quote.time < last.time {
                return QuoteUpdate::Stale;
            }
        }

        let previous = entry.last_quote.replace(quote);
        QuoteUpdate::Stored { previous }
    }

    pub async fn last_quote(&self, name: &str) -> Option<Quote> {
        self.entries
            .read()
            .await
            .get(name)
            .and_then(|e| e.last_quote.clone())
    }

    pub async fn get(&self, name: &str) -> Option<Entry> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
