//! Market data sources.
//!
//! [`MarketDataProvider`] is the only seam between the screening core and the
//! outside world. Live exchange clients ([`binance`], [`bybit`], [`kucoin`])
//! are selected per exchange by [`ExchangeRouter`]; [`snapshot::SnapshotProvider`]
//! serves a stored capture for offline, reproducible runs.

pub mod binance;
pub mod bybit;
pub mod kucoin;
pub mod snapshot;

use async_trait::async_trait;
use serde::Deserializer;
use serde::de::{self, Visitor};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::errors::ScreenerError;
use crate::models::BarSeries;
use crate::storage_utils::AppConfig;
use crate::timeframe::Timeframe;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Symbols screened on `exchange` for `timeframe`, in canonical form (BTCUSDT).
    async fn universe(&self, exchange: &str, timeframe: Timeframe) -> Result<Vec<String>, ScreenerError>;

    /// Up to `min_length` most recent bars (more if the source returns more), oldest first.
    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries, ScreenerError>;

    /// Markets listed on `exchange` before the screening cap is applied.
    async fn market_count(&self, exchange: &str) -> Result<u32, ScreenerError> {
        Ok(self.universe(exchange, Timeframe::Min15).await?.len() as u32)
    }
}

/// Errors that can occur inside a live exchange client.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout or undecodable body.
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The exchange answered with an error payload.
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited{}", .retry_after_ms.map(|ms| format!(", retry in {ms} ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown symbol")]
    UnknownSymbol,

    #[error("{0} is not supported by this exchange")]
    Unsupported(String),
}

impl ProviderError {
    pub fn into_screener(self, exchange: &str, symbol: &str) -> ScreenerError {
        match self {
            ProviderError::UnknownSymbol => ScreenerError::SymbolNotFound {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
            },
            other => ScreenerError::unavailable(format!("{exchange}:{symbol}"), other.to_string()),
        }
    }
}

/// Settings every HTTP client shares.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub quote_asset: String,
    pub max_universe: usize,
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            quote_asset: config.trading.quote_asset.to_ascii_uppercase(),
            max_universe: config.trading.max_universe,
            timeout: config.klines.timeout(),
        }
    }

    pub fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(50)
            .build()
    }

    /// Sorts, dedups and caps a raw symbol listing.
    pub(crate) fn finish_universe(&self, symbols: Vec<String>) -> Vec<String> {
        let mut symbols = distinct(symbols);
        symbols.truncate(self.max_universe);
        symbols
    }
}

pub(crate) fn distinct(mut symbols: Vec<String>) -> Vec<String> {
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Dispatches each call to the client registered for the exchange name.
#[derive(Default)]
pub struct ExchangeRouter {
    routes: HashMap<String, Arc<dyn MarketDataProvider>>,
}

impl ExchangeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the Binance, Bybit and KuCoin spot clients.
    pub fn live(settings: &HttpSettings) -> reqwest::Result<Self> {
        let client = settings.client()?;
        Ok(Self::new()
            .route("BINANCE", Arc::new(binance::BinanceClient::new(client.clone(), settings.clone())))
            .route("BYBIT", Arc::new(bybit::BybitClient::new(client.clone(), settings.clone())))
            .route("KUCOIN", Arc::new(kucoin::KucoinClient::new(client, settings.clone()))))
    }

    pub fn route(mut self, exchange: &str, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.routes.insert(exchange.to_ascii_uppercase(), provider);
        self
    }

    fn target(&self, exchange: &str) -> Result<&Arc<dyn MarketDataProvider>, ScreenerError> {
        self.routes
            .get(&exchange.to_ascii_uppercase())
            .ok_or_else(|| ScreenerError::unavailable(exchange, "no market data source for this exchange"))
    }
}

#[async_trait]
impl MarketDataProvider for ExchangeRouter {
    async fn universe(&self, exchange: &str, timeframe: Timeframe) -> Result<Vec<String>, ScreenerError> {
        self.target(exchange)?.universe(exchange, timeframe).await
    }

    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries, ScreenerError> {
        self.target(exchange)?
            .get_bars(exchange, symbol, timeframe, min_length)
            .await
    }

    async fn market_count(&self, exchange: &str) -> Result<u32, ScreenerError> {
        self.target(exchange)?.market_count(exchange).await
    }
}

// --- Payload helpers ---

/// True when every `key` in `filters` matches the listing entry: strings by
/// equality, arrays by membership, anything else by its JSON text.
pub(crate) fn matches_filters(entry: &Map<String, Value>, filters: &[(&str, &str)]) -> bool {
    filters.iter().all(|(key, required)| match entry.get(*key) {
        Some(Value::String(s)) => s == required,
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(*required)),
        Some(v) => v.to_string() == *required,
        None => false,
    })
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Exchanges send prices as strings or numbers; both are accepted.
pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    deserialize_f64_lenient(value).ok().flatten()
}

/// Epoch timestamps arrive as integers or numeric strings.
pub(crate) fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
