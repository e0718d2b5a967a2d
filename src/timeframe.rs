use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::ScreenerError;

/// Candle interval. Ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timeframe {
    Min5,
    Min15,
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
        Timeframe::Week1,
        Timeframe::Month1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1D",
            Timeframe::Week1 => "1W",
            Timeframe::Month1 => "1M",
        }
    }

    /// Nominal bar length in milliseconds (a month counts as 30 days).
    pub fn duration_ms(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Timeframe::Min5 => 5 * MINUTE,
            Timeframe::Min15 => 15 * MINUTE,
            Timeframe::Hour1 => 60 * MINUTE,
            Timeframe::Hour4 => 240 * MINUTE,
            Timeframe::Day1 => 1_440 * MINUTE,
            Timeframe::Week1 => 7 * 1_440 * MINUTE,
            Timeframe::Month1 => 30 * 1_440 * MINUTE,
        }
    }

    /// The next coarser timeframe, used for multi-timeframe confirmation.
    pub fn higher(self) -> Option<Timeframe> {
        let idx = Self::ALL.iter().position(|tf| *tf == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn binance_interval(self) -> &'static str {
        match self {
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
            Timeframe::Month1 => "1M",
        }
    }

    pub fn bybit_interval(self) -> &'static str {
        match self {
            Timeframe::Min5 => "5",
            Timeframe::Min15 => "15",
            Timeframe::Hour1 => "60",
            Timeframe::Hour4 => "240",
            Timeframe::Day1 => "D",
            Timeframe::Week1 => "W",
            Timeframe::Month1 => "M",
        }
    }

    /// KuCoin has no monthly candles.
    pub fn kucoin_type(self) -> Option<&'static str> {
        match self {
            Timeframe::Min5 => Some("5min"),
            Timeframe::Min15 => Some("15min"),
            Timeframe::Hour1 => Some("1hour"),
            Timeframe::Hour4 => Some("4hour"),
            Timeframe::Day1 => Some("1day"),
            Timeframe::Week1 => Some("1week"),
            Timeframe::Month1 => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ScreenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5m" => Ok(Timeframe::Min5),
            "15m" => Ok(Timeframe::Min15),
            "1h" | "1H" => Ok(Timeframe::Hour1),
            "4h" | "4H" => Ok(Timeframe::Hour4),
            "1D" | "1d" => Ok(Timeframe::Day1),
            "1W" | "1w" => Ok(Timeframe::Week1),
            // lowercase "1m" would read as one minute
            "1M" => Ok(Timeframe::Month1),
            other => Err(ScreenerError::invalid(
                "timeframe",
                format!("unsupported timeframe `{other}` (expected one of 5m, 15m, 1h, 4h, 1D, 1W, 1M)"),
            )),
        }
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
