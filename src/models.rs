//! Value objects shared by the indicator, screening, pattern and analysis layers.
//!
//! Everything here is created fresh per request and owned by the call that
//! produced it. Floating point fields are rounded to [`DECIMAL_PLACES`] when
//! serialized so repeated calls over the same data render byte-identical JSON.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::ScreenerError;
use crate::timeframe::Timeframe;

pub const DECIMAL_PLACES: i32 = 8;

/// Rounds to [`DECIMAL_PLACES`] so JSON output does not drift on float noise.
pub fn round_decimal(value: f64) -> f64 {
    let scale = 10f64.powi(DECIMAL_PLACES);
    let rounded = (value * scale).round() / scale;
    // keep "-0.0" out of the output
    if rounded == 0.0 { 0.0 } else { rounded }
}

pub(crate) fn serialize_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_decimal(*value))
}

// --- Bars ---

/// One OHLCV interval. `timestamp` is the bar open time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn direction(&self) -> Option<PatternType> {
        if self.is_bullish() {
            Some(PatternType::Bullish)
        } else if self.is_bearish() {
            Some(PatternType::Bearish)
        } else {
            None
        }
    }

    /// high ≥ max(open, close) ≥ min(open, close) ≥ low, volume ≥ 0, all finite.
    pub fn is_well_formed(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        values.iter().all(|v| v.is_finite())
            && self.volume >= 0.0
            && self.high >= self.open.max(self.close)
            && self.open.min(self.close) >= self.low
    }
}

/// Bars for one (exchange, symbol, timeframe), oldest first, strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    exchange: String,
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<Self, ScreenerError> {
        let exchange = exchange.into();
        let symbol = symbol.into();
        let context = format!("{exchange}:{symbol} {timeframe}");

        if let Some(bad) = bars.iter().find(|b| !b.is_well_formed()) {
            return Err(ScreenerError::unavailable(
                context,
                format!("malformed bar at {}", bad.timestamp),
            ));
        }
        if let Some(pair) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(ScreenerError::unavailable(
                context,
                format!(
                    "timestamps not strictly increasing ({} then {})",
                    pair[0].timestamp, pair[1].timestamp
                ),
            ));
        }

        Ok(Self {
            exchange,
            symbol,
            timeframe,
            bars,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// The trailing `n` bars, or `None` when the series is shorter.
    pub fn tail(&self, n: usize) -> Option<&[Bar]> {
        let len = self.bars.len();
        (n <= len).then(|| &self.bars[len - n..])
    }

    /// Fails with `InsufficientData` unless at least `required` bars exist.
    pub fn require(&self, required: usize) -> Result<(), ScreenerError> {
        if self.bars.len() < required {
            return Err(ScreenerError::InsufficientData {
                required,
                available: self.bars.len(),
            });
        }
        Ok(())
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }
}

// --- Indicators ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerState {
    #[serde(serialize_with = "serialize_decimal")]
    pub middle: f64,
    #[serde(serialize_with = "serialize_decimal")]
    pub upper: f64,
    #[serde(serialize_with = "serialize_decimal")]
    pub lower: f64,
    #[serde(serialize_with = "serialize_decimal")]
    pub bandwidth: f64,
}

/// Five-level signal derived from band position and momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rating {
    StrongSell = -2,
    Sell = -1,
    Neutral = 0,
    Buy = 1,
    StrongBuy = 2,
}

impl Rating {
    pub const ALL: [Rating; 5] = [
        Rating::StrongSell,
        Rating::Sell,
        Rating::Neutral,
        Rating::Buy,
        Rating::StrongBuy,
    ];

    pub fn value(self) -> i8 {
        self as i8
    }

    pub fn label(self) -> &'static str {
        match self {
            Rating::StrongSell => "Strong Sell",
            Rating::Sell => "Sell",
            Rating::Neutral => "Neutral",
            Rating::Buy => "Buy",
            Rating::StrongBuy => "Strong Buy",
        }
    }

    /// Clamps a raw score into the five-level scale.
    pub(crate) fn from_score(score: i8) -> Rating {
        match score {
            i8::MIN..=-2 => Rating::StrongSell,
            -1 => Rating::Sell,
            0 => Rating::Neutral,
            1 => Rating::Buy,
            _ => Rating::StrongBuy,
        }
    }
}

impl TryFrom<i64> for Rating {
    type Error = ScreenerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -2..=2 => Ok(Rating::from_score(value as i8)),
            other => Err(ScreenerError::invalid(
                "rating",
                format!("{other} is outside -2..=2"),
            )),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+} ({})", self.value(), self.label())
    }
}

impl Serialize for Rating {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.value())
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Rating::try_from(raw).map_err(de::Error::custom)
    }
}

// --- Results ---

/// One ranked row of a screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenResult {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    #[serde(serialize_with = "serialize_decimal")]
    pub metric_value: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Bullish,
    Bearish,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Bullish => "bullish",
            PatternType::Bearish => "bearish",
        }
    }

    pub fn matches(self, bar: &Bar) -> bool {
        match self {
            PatternType::Bullish => bar.is_bullish(),
            PatternType::Bearish => bar.is_bearish(),
        }
    }
}

impl FromStr for PatternType {
    type Err = ScreenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(PatternType::Bullish),
            "bearish" => Ok(PatternType::Bearish),
            other => Err(ScreenerError::invalid(
                "pattern_type",
                format!("`{other}` is neither bullish nor bearish"),
            )),
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected consecutive-direction or accelerating-body pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandlePattern {
    pub symbol: String,
    pub exchange: String,
    pub pattern_type: PatternType,
    pub run_length: usize,
    #[serde(serialize_with = "serialize_decimal")]
    pub growth_percent: f64,
    pub matched_timeframes: Vec<Timeframe>,
}

/// Static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub supported_timeframes: Vec<Timeframe>,
    pub market_count: u32,
}

impl Exchange {
    pub fn supports(&self, timeframe: Timeframe) -> bool {
        self.supported_timeframes.contains(&timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn series_rejects_duplicate_timestamps() {
        let err = BarSeries::new(
            "KUCOIN",
            "BTCUSDT",
            Timeframe::Min15,
            vec![bar(1, 1.0, 2.0), bar(1, 2.0, 3.0)],
        )
        .unwrap_err();
        assert!(matches!(err, ScreenerError::DataUnavailable { .. }));
    }

    #[test]
    fn series_rejects_high_below_close() {
        let mut broken = bar(1, 1.0, 2.0);
        broken.high = 1.5;
        let err = BarSeries::new("KUCOIN", "BTCUSDT", Timeframe::Min15, vec![broken]).unwrap_err();
        assert!(matches!(err, ScreenerError::DataUnavailable { .. }));
    }

    #[test]
    fn tail_and_require() {
        let series = BarSeries::new(
            "KUCOIN",
            "BTCUSDT",
            Timeframe::Min15,
            vec![bar(1, 1.0, 2.0), bar(2, 2.0, 3.0), bar(3, 3.0, 2.5)],
        )
        .unwrap();
        assert_eq!(series.tail(2).unwrap()[0].timestamp, 2);
        assert!(series.tail(4).is_none());
        assert_eq!(
            series.require(5),
            Err(ScreenerError::InsufficientData {
                required: 5,
                available: 3
            })
        );
    }

    #[test]
    fn rating_round_trips_through_integers() {
        for rating in Rating::ALL {
            assert_eq!(Rating::try_from(rating.value() as i64).unwrap(), rating);
        }
        assert!(Rating::try_from(3).is_err());
        assert_eq!(serde_json::to_string(&Rating::StrongBuy).unwrap(), "2");
    }

    #[test]
    fn decimals_are_rounded_on_output() {
        let row = ScreenResult {
            symbol: "BTCUSDT".into(),
            exchange: "KUCOIN".into(),
            timeframe: Timeframe::Hour1,
            metric_value: 0.1 + 0.2,
            rank: 1,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"metric_value\":0.3"), "{json}");
    }
}
