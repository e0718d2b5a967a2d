use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{HttpSettings, MarketDataProvider, ProviderError, distinct, lenient_f64, lenient_i64, matches_filters};
use crate::errors::ScreenerError;
use crate::models::{Bar, BarSeries};
use crate::timeframe::Timeframe;

const BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES: usize = 1000;
const INVALID_SYMBOL_CODE: i64 = -1121;

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance spot REST client.
pub struct BinanceClient {
    client: Client,
    settings: HttpSettings,
    base_url: String,
}

impl BinanceClient {
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
        let response = self
            .client
            .get(format!("{}/api/v3/exchangeInfo", self.base_url))
            .send()
            .await?;
        let body = check_status(response).await?;
        parse_universe(&body, &self.settings.quote_asset)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>, ProviderError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.binance_interval().to_string()),
            ("limit", limit.clamp(1, MAX_KLINES).to_string()),
        ];
        let response = self
            .client
            .get(format!("{}/api/v3/klines", self.base_url))
            .query(&query)
            .send()
            .await?;
        let body = check_status(response).await?;
        parse_klines(&body)
    }
}

/// Turns non-success responses into typed errors and returns the body text.
async fn check_status(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let text = response.text().await?;

    if status == StatusCode::IM_A_TEAPOT || status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = ban_remaining_ms(&text, now_ms());
        warn!(%status, ?retry_after_ms, "binance rate limit hit");
        return Err(ProviderError::RateLimited { retry_after_ms });
    }
    if !status.is_success() {
        return Err(match serde_json::from_str::<ApiError>(&text) {
            Ok(api) if api.code == INVALID_SYMBOL_CODE => ProviderError::UnknownSymbol,
            Ok(api) => ProviderError::Api(format!("{} ({})", api.msg, api.code)),
            Err(_) => ProviderError::Api(format!("HTTP {status}")),
        });
    }
    Ok(text)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Binance reports IP bans (code -1003) as "... banned until <epoch ms>".
pub(crate) fn ban_remaining_ms(body: &str, now_ms: u64) -> Option<u64> {
    static BAN_UNTIL: OnceLock<Option<Regex>> = OnceLock::new();
    if !body.contains("-1003") {
        return None;
    }
    let re = BAN_UNTIL.get_or_init(|| Regex::new(r"until\s+(\d+)").ok()).as_ref()?;
    let ban_until: u64 = re.captures(body)?.get(1)?.as_str().parse().ok()?;
    ban_until.checked_sub(now_ms)
}

/// Spot symbols that are trading and quoted in `quote_asset`.
pub(crate) fn parse_universe(body: &str, quote_asset: &str) -> Result<Vec<String>, ProviderError> {
    let info: ExchangeInfo =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let filters = [("status", "TRADING"), ("quoteAsset", quote_asset)];

    Ok(info
        .symbols
        .iter()
        .filter(|s| matches_filters(s, &filters))
        .filter_map(|s| s.get("symbol").and_then(Value::as_str).map(String::from))
        .collect())
}

/// Kline rows are `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Bar>, ProviderError> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    rows.iter()
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
        .ok_or_else(|| ProviderError::Malformed("incomplete kline row".to_string()))
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_rows() {
        let body = r#"[
            [1700000000000, "100.0", "105.5", "99.0", "104.0", "12.5", 1700000899999, "0", 10, "0", "0", "0"],
            [1700000900000, "104.0", "106.0", "103.0", "103.5", "8", 1700001799999, "0", 7, "0", "0", "0"]
        ]"#;
        let bars = parse_klines(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 1_700_000_000_000);
        assert_eq!(bars[0].high, 105.5);
        assert_eq!(bars[1].close, 103.5);
        assert_eq!(bars[1].volume, 8.0);
    }

    #[test]
    fn short_row_is_malformed() {
        assert!(matches!(
            parse_klines(r#"[[1700000000000, "1", "2"]]"#),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn universe_keeps_trading_quote_pairs() {
        let body = r#"{ "symbols": [
            { "symbol": "ETHUSDT", "status": "TRADING", "quoteAsset": "USDT" },
            { "symbol": "ETHBTC", "status": "TRADING", "quoteAsset": "BTC" },
            { "symbol": "LUNAUSDT", "status": "BREAK", "quoteAsset": "USDT" },
            { "symbol": "BTCUSDT", "status": "TRADING", "quoteAsset": "USDT" }
        ] }"#;
        assert_eq!(parse_universe(body, "USDT").unwrap(), ["ETHUSDT", "BTCUSDT"]);
    }

    #[test]
    fn ban_message_yields_remaining_time() {
        let body = r#"{"code":-1003,"msg":"Way too many requests; IP banned until 1700000060000."}"#;
        assert_eq!(ban_remaining_ms(body, 1_700_000_000_000), Some(60_000));
        assert_eq!(ban_remaining_ms(body, 1_700_000_070_000), None);
        assert_eq!(ban_remaining_ms(r#"{"code":-1021}"#, 0), None);
    }
}
