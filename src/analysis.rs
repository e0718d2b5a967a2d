//! Single-symbol report combining indicators and pattern checks.

use serde::Serialize;
use tracing::debug;

use crate::engine::Engine;
use crate::errors::{Result, ScreenerError};
use crate::indicators::{bollinger, percent_change, rating, rsi};
use crate::models::{BollingerState, CandlePattern, PatternType, Rating, serialize_decimal};
use crate::patterns::{advanced_pattern, consecutive_candles};
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    /// Open time of the latest bar, epoch milliseconds.
    pub timestamp: i64,
    #[serde(serialize_with = "serialize_decimal")]
    pub close: f64,
    #[serde(serialize_with = "serialize_decimal")]
    pub volume: f64,
    #[serde(serialize_with = "serialize_decimal")]
    pub percent_change: f64,
    pub bollinger: BollingerState,
    pub rating: Rating,
    pub signal: &'static str,
    #[serde(serialize_with = "serialize_decimal")]
    pub rsi: f64,
    /// Patterns matching right now under the configured default parameters.
    pub patterns: Vec<CandlePattern>,
}

/// Accepts `BTCUSDT` as well as TradingView-style `KUCOIN:BTCUSDT`.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let bare = raw.rsplit(':').next().unwrap_or(raw).trim();
    if bare.is_empty() {
        return Err(ScreenerError::invalid("symbol", "must not be empty"));
    }
    Ok(bare.to_ascii_uppercase())
}

impl Engine {
    /// Full report for one symbol. Either every field is computed or the first
    /// failure is returned unchanged.
    pub async fn coin_analysis(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: Timeframe,
    ) -> Result<AnalysisReport> {
        let symbol = normalize_symbol(symbol)?;
        let exchange = self.check_market(exchange, timeframe)?.name.clone();
        let cfg = self.config();

        let required = cfg
            .indicators
            .bollinger_period
            .max(cfg.rating.required_bars())
            .max(cfg.indicators.rsi_period + 1)
            .max(cfg.patterns.pattern_length)
            .max(2);
        let series = self.fetch(&exchange, &symbol, timeframe, required).await?;
        debug!(%symbol, %exchange, %timeframe, bars = series.len(), "analyzing");

        let state = bollinger(&series, cfg.indicators.bollinger_period, cfg.indicators.bollinger_mult)?;
        let level = rating(&series, &state, &cfg.rating)?;
        let change = percent_change(&series)?;
        let rsi_value = rsi(&series, cfg.indicators.rsi_period)?;

        let defaults = cfg.patterns;
        let mut patterns = Vec::new();
        for direction in [PatternType::Bullish, PatternType::Bearish] {
            if let Some(found) =
                consecutive_candles(&series, direction, defaults.candle_count, defaults.min_growth)?
            {
                patterns.push(found);
            }
        }
        if let Some(found) = advanced_pattern(&series, defaults.pattern_length, defaults.min_size_increase)? {
            patterns.push(self.confirm_higher_timeframes(found).await);
        }

        let last = series
            .last()
            .ok_or(ScreenerError::InsufficientData { required, available: 0 })?;

        Ok(AnalysisReport {
            symbol,
            exchange,
            timeframe,
            timestamp: last.timestamp,
            close: last.close,
            volume: last.volume,
            percent_change: change,
            bollinger: state,
            rating: level,
            signal: level.label(),
            rsi: rsi_value,
            patterns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_normalized() {
        assert_eq!(normalize_symbol("btcusdt").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol("KUCOIN:ethusdt ").unwrap(), "ETHUSDT");
        assert!(matches!(
            normalize_symbol("  "),
            Err(ScreenerError::InvalidParameter { name: "symbol", .. })
        ));
    }
}
