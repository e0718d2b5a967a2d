use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{HttpSettings, MarketDataProvider, ProviderError, distinct, lenient_f64, lenient_i64, matches_filters};
use crate::errors::ScreenerError;
use crate::models::{Bar, BarSeries};
use crate::timeframe::Timeframe;

const BASE_URL: &str = "https://api.bybit.com";
const MAX_KLINES: usize = 1000;
const INVALID_SYMBOL_CODE: i64 = 10001;

/// Bybit v5 envelope: `{ retCode, retMsg, result: { list: [...] } }`.
#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<BybitResult<T>>,
}

#[derive(Debug, Deserialize)]
struct BybitResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

impl<T> BybitResponse<T> {
    fn into_list(self) -> Result<Vec<T>, ProviderError> {
        if self.ret_code == INVALID_SYMBOL_CODE && self.ret_msg.to_ascii_lowercase().contains("symbol") {
            return Err(ProviderError::UnknownSymbol);
        }
        if self.ret_code != 0 {
            return Err(ProviderError::Api(format!("{} ({})", self.ret_msg, self.ret_code)));
        }
        Ok(self.result.map(|r| r.list).unwrap_or_default())
    }
}

/// Bybit spot REST client.
pub struct BybitClient {
    client: Client,
    settings: HttpSettings,
    base_url: String,
}

impl BybitClient {
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
            .get(format!("{}/v5/market/instruments-info", self.base_url))
            .query(&[("category", "spot")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_universe(&body, &self.settings.quote_asset)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>, ProviderError> {
        let limit = limit.clamp(1, MAX_KLINES).to_string();
        let body = self
            .client
            .get(format!("{}/v5/market/kline", self.base_url))
            .query(&[
                ("category", "spot"),
                ("symbol", symbol),
                ("interval", timeframe.bybit_interval()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_klines(&body)
    }
}

pub(crate) fn parse_universe(body: &str, quote_asset: &str) -> Result<Vec<String>, ProviderError> {
    let response: BybitResponse<Map<String, Value>> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let filters = [("status", "Trading"), ("quoteCoin", quote_asset)];

    Ok(response
        .into_list()?
        .iter()
        .filter(|s| matches_filters(s, &filters))
        .filter_map(|s| s.get("symbol").and_then(Value::as_str).map(String::from))
        .collect())
}

/// Rows are `[startTime, open, high, low, close, volume, turnover]`, newest first.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Bar>, ProviderError> {
    let response: BybitResponse<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let mut bars = response
        .into_list()?
        .iter()
        .map(|row| {
            let field = |i: usize| row.get(i).and_then(lenient_f64);
            Some(Bar {
                timestamp: row.first().and_then(lenient_i64)?,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            })
        })
        .collect::<Option<Vec<Bar>>>()
        .ok_or_else(|| ProviderError::Malformed("incomplete kline row".to_string()))?;

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

#[async_trait]
impl MarketDataProvider for BybitClient {
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
