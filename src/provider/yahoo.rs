//! Yahoo Finance quote client
//!
//! Uses the v7 batch quote endpoint: every symbol of a cycle goes out in one
//! request, restricted to the fields the engine publishes.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Client,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{FetchedQuotes, QuoteProvider};
use crate::error::ProviderError;
use crate::types::{Quote, RawQuote};

pub const YAHOO_QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";

/// Field set requested from the provider
const QUOTE_FIELDS: &str = "quoteType,currency,marketState,regularMarketChangePercent,\
regularMarketPrice,shortName,regularMarketTime";

const CLIENT_USER_AGENT: &str = concat!("quote-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<YahooQuote>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuote {
    symbol: String,
    quote_type: Option<String>,
    currency: Option<String>,
    market_state: Option<String>,
    regular_market_change_percent: Option<f64>,
    regular_market_price: Option<f64>,
    short_name: Option<String>,
    regular_market_time: Option<i64>,
}

impl From<YahooQuote> for RawQuote {
    fn from(q: YahooQuote) -> Self {
        RawQuote {
            display_name: q.short_name,
            quote_type: q.quote_type,
            currency: q.currency,
            market_state: q.market_state,
            price: q.regular_market_price,
            change_percent: q.regular_market_change_percent,
            time: q.regular_market_time,
        }
    }
}

/// HTTP client for Yahoo Finance quotes
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    /// Create a new client. `timeout` bounds each HTTP request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteProvider for YahooClient {
    fn name(&self) -> &'static str {
        "Yahoo"
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<FetchedQuotes, ProviderError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = symbols.join(",");
        debug!(provider = "Yahoo", symbols = %joined, "Fetching quotes");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("symbols", joined.as_str()), ("fields", QUOTE_FIELDS)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        parse_quote_response(symbols, &body)
    }
}

/// Map a v7 quote response onto the requested symbols.
fn parse_quote_response(symbols: &[String], body: &str) -> Result<FetchedQuotes, ProviderError> {
    let envelope: QuoteEnvelope =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if let Some(error) = envelope.quote_response.error.filter(|e| !e.is_null()) {
        return Err(ProviderError::Decode(error.to_string()));
    }

    // Matched case-insensitively; several requested spellings may share one result.
    let by_symbol: HashMap<String, YahooQuote> = envelope
        .quote_response
        .result
        .into_iter()
        .map(|q| (q.symbol.to_uppercase(), q))
        .collect();

    let quotes = symbols
        .iter()
        .map(|symbol| {
            let result = match by_symbol.get(&symbol.to_uppercase()) {
                Some(q) => Quote::from_raw(symbol, q.clone().into()),
                None => Err(ProviderError::MissingSymbol(symbol.clone())),
            };
            (symbol.clone(), result)
        })
        .collect();

    Ok(quotes)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
