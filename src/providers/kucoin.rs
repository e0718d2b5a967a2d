use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{HttpSettings, MarketDataProvider, ProviderError, distinct, lenient_f64, lenient_i64, matches_filters};
use crate::errors::ScreenerError;
use crate::models::{Bar, BarSeries};
use crate::timeframe::Timeframe;

const BASE_URL: &str = "https://api.kucoin.com";
const MAX_KLINES: usize = 1500;
const OK_CODE: &str = "200000";
const INVALID_PAIR_CODE: &str = "400100";
// tried in order when splitting a canonical symbol without a separator
const KNOWN_QUOTES: [&str; 5] = ["USDT", "USDC", "BTC", "ETH", "KCS"];

#[derive(Debug, Deserialize)]
struct KucoinResponse<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> KucoinResponse<T> {
    fn into_data(self) -> Result<Vec<T>, ProviderError> {
        match self.code.as_str() {
            OK_CODE => Ok(self.data),
            INVALID_PAIR_CODE => Err(ProviderError::UnknownSymbol),
            code => Err(ProviderError::Api(format!(
                "{} ({code})",
                self.msg.unwrap_or_default()
            ))),
        }
    }
}

/// KuCoin spot REST client. Symbols are canonical (BTCUSDT) on the outside and
/// dash-separated (BTC-USDT) on the wire.
pub struct KucoinClient {
    client: Client,
    settings: HttpSettings,
    base_url: String,
}

impl KucoinClient {
    pub fn new(client: Client, settings: HttpSettings) -> Self {
        Self {
            client,
            settings,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn fetch_universe(&self) -> Result<Vec<String>, ProviderError> {
        let body = self
            .client
            .get(format!("{}/api/v2/symbols", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_universe(&body, &self.settings.quote_asset)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>, ProviderError> {
        let kind = timeframe
            .kucoin_type()
            .ok_or_else(|| ProviderError::Unsupported(format!("{timeframe} candles")))?;
        let pair = to_pair(symbol, &self.settings.quote_asset)
            .ok_or(ProviderError::UnknownSymbol)?;

        // KuCoin pages by time range, so ask for exactly `limit` bar lengths back
        let end_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let span_secs = timeframe.duration_ms() / 1000 * limit.clamp(1, MAX_KLINES) as i64;
        let query = [
            ("type", kind.to_string()),
            ("symbol", pair),
            ("startAt", (end_at - span_secs).to_string()),
            ("endAt", end_at.to_string()),
        ];

        let body = self
            .client
            .get(format!("{}/api/v1/market/candles", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_klines(&body)
    }
}

/// `BTCUSDT` → `BTC-USDT`. Already separated symbols pass through.
pub(crate) fn to_pair(symbol: &str, quote_asset: &str) -> Option<String> {
    if symbol.contains('-') {
        return Some(symbol.to_string());
    }
    std::iter::once(quote_asset)
        .chain(KNOWN_QUOTES)
        .find_map(|quote| {
            let base = symbol.strip_suffix(quote)?;
            (!base.is_empty()).then(|| format!("{base}-{quote}"))
        })
}

pub(crate) fn parse_universe(body: &str, quote_asset: &str) -> Result<Vec<String>, ProviderError> {
    let response: KucoinResponse<Map<String, Value>> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let filters = [("enableTrading", "true"), ("quoteCurrency", quote_asset)];

    Ok(response
        .into_data()?
        .iter()
        .filter(|s| matches_filters(s, &filters))
        .filter_map(|s| s.get("symbol").and_then(Value::as_str))
        .map(|pair| pair.replace('-', ""))
        .collect())
}

/// Rows are `[time(s), open, close, high, low, volume, turnover]`, newest first.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Bar>, ProviderError> {
    let response: KucoinResponse<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let mut bars = response
        .into_data()?
        .iter()
        .map(|row| {
            let field = |i: usize| row.get(i).and_then(lenient_f64);
            Some(Bar {
                timestamp: row.first().and_then(lenient_i64)? * 1000,
                open: field(1)?,
                close: field(2)?,
                high: field(3)?,
                low: field(4)?,
                volume: field(5)?,
            })
        })
        .collect::<Option<Vec<Bar>>>()
        .ok_or_else(|| ProviderError::Malformed("incomplete candle row".to_string()))?;

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

#[async_trait]
impl MarketDataProvider for KucoinClient {
    async fn universe(&self, exchange: &str, _timeframe: Timeframe) -> Result<Vec<String>, ScreenerError> {
        let symbols = self
            .fetch_universe()
            .await
            .map_err(|e| ScreenerError::unavailable(format!("{exchange} universe"), e.to_string()))?;
        debug!(exchange, listed = symbols.len(), "resolved universe");
        Ok(self.settings.finish_universe(symbols))
    }

    async fn market_count(&self, exchange: &str) -> Result<u32, ScreenerError> {
        let symbols = self
            .fetch_universe()
            .await
            .map_err(|e| ScreenerError::unavailable(format!("{exchange} universe"), e.to_string()))?;
        Ok(distinct(symbols).len() as u32)
    }

    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries, ScreenerError> {
        let bars = self
            .fetch_klines(symbol, timeframe, min_length)
            .await
            .map_err(|e| e.into_screener(exchange, symbol))?;
        BarSeries::new(exchange, symbol, timeframe, bars)
    }
}
