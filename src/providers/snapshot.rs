//! A frozen capture of bar series, stored as `klines.json`.
//!
//! Screening against a snapshot is fully reproducible: the same snapshot and
//! request always produce byte-identical output.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::MarketDataProvider;
use crate::errors::ScreenerError;
use crate::models::{Bar, BarSeries};
use crate::storage_utils::AsyncStorageManager;
use crate::timeframe::Timeframe;

pub const SNAPSHOT_FILE: &str = "klines";

type SeriesKey = (String, String, Timeframe);

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    exchange: String,
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    captured_at: i64,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotProvider {
    series: HashMap<SeriesKey, BarSeries>,
    captured_at: i64,
}

impl SnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch milliseconds of the capture, 0 for hand-built snapshots.
    pub fn captured_at(&self) -> i64 {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn insert(&mut self, series: BarSeries) {
        let key = (
            series.exchange().to_ascii_uppercase(),
            series.symbol().to_ascii_uppercase(),
            series.timeframe(),
        );
        self.series.insert(key, series);
    }

    pub fn with_series(mut self, series: BarSeries) -> Self {
        self.insert(series);
        self
    }

    /// Adds every series of `newer`, replacing overlapping ones, and takes
    /// over its capture time.
    pub fn merge(&mut self, newer: SnapshotProvider) {
        self.series.extend(newer.series);
        self.captured_at = self.captured_at.max(newer.captured_at);
    }

    /// Number of distinct symbols stored per exchange.
    pub fn market_counts(&self) -> BTreeMap<String, u32> {
        let mut symbols: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (exchange, symbol, _) in self.series.keys() {
            symbols.entry(exchange).or_default().push(symbol);
        }
        symbols
            .into_iter()
            .map(|(exchange, mut list)| {
                list.sort();
                list.dedup();
                (exchange.to_string(), list.len() as u32)
            })
            .collect()
    }

    /// Loads `klines.json`. Every stored series is re-validated.
    pub async fn load(storage: &AsyncStorageManager) -> anyhow::Result<Self> {
        let file: SnapshotFile = storage.load(SNAPSHOT_FILE).await?;
        let mut snapshot = Self {
            series: HashMap::with_capacity(file.entries.len()),
            captured_at: file.captured_at,
        };
        for entry in file.entries {
            snapshot.insert(BarSeries::new(entry.exchange, entry.symbol, entry.timeframe, entry.bars)?);
        }
        info!(series = snapshot.len(), captured_at = snapshot.captured_at, "loaded snapshot");
        Ok(snapshot)
    }

    pub async fn save(&self, storage: &AsyncStorageManager) -> anyhow::Result<()> {
        let mut entries: Vec<SnapshotEntry> = self
            .series
            .values()
            .map(|s| SnapshotEntry {
                exchange: s.exchange().to_string(),
                symbol: s.symbol().to_string(),
                timeframe: s.timeframe(),
                bars: s.bars().to_vec(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.exchange, &a.symbol, a.timeframe).cmp(&(&b.exchange, &b.symbol, b.timeframe))
        });
        storage
            .save(
                SNAPSHOT_FILE,
                &SnapshotFile {
                    captured_at: self.captured_at,
                    entries,
                },
            )
            .await
    }
}

#[async_trait]
impl MarketDataProvider for SnapshotProvider {
    async fn universe(&self, exchange: &str, timeframe: Timeframe) -> Result<Vec<String>, ScreenerError> {
        let exchange = exchange.to_ascii_uppercase();
        let mut symbols: Vec<String> = self
            .series
            .keys()
            .filter(|(ex, _, tf)| *ex == exchange && *tf == timeframe)
            .map(|(_, symbol, _)| symbol.clone())
            .collect();
        if symbols.is_empty() {
            return Err(ScreenerError::unavailable(
                format!("{exchange} {timeframe}"),
                "not present in the snapshot",
            ));
        }
        symbols.sort();
        Ok(symbols)
    }

    async fn market_count(&self, exchange: &str) -> Result<u32, ScreenerError> {
        self.market_counts()
            .remove(&exchange.to_ascii_uppercase())
            .ok_or_else(|| ScreenerError::unavailable(exchange, "not present in the snapshot"))
    }

    /// Serves the trailing `min_length` bars, or the whole series if shorter.
    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries, ScreenerError> {
        let key = (exchange.to_ascii_uppercase(), symbol.to_ascii_uppercase(), timeframe);
        match self.series.get(&key) {
            Some(series) => {
                let bars = series.tail(min_length).unwrap_or(series.bars());
                BarSeries::new(series.exchange(), series.symbol(), timeframe, bars.to_vec())
            }
            None => {
                let known_market = self
                    .series
                    .keys()
                    .any(|(ex, _, tf)| *ex == key.0 && *tf == timeframe);
                if known_market {
                    Err(ScreenerError::SymbolNotFound {
                        exchange: exchange.to_string(),
                        symbol: symbol.to_string(),
                    })
                } else {
                    Err(ScreenerError::unavailable(
                        format!("{exchange}:{symbol} {timeframe}"),
                        "not present in the snapshot",
                    ))
                }
            }
        }
    }
}

/// Downloads `lookback` bars for every symbol of `exchange` on each timeframe,
/// `batch_size` requests at a time with `pause` between batches. Symbols that
/// fail are logged and left out.
pub async fn capture(
    provider: &dyn MarketDataProvider,
    exchange: &str,
    timeframes: &[Timeframe],
    lookback: usize,
    batch_size: usize,
    pause: Duration,
) -> Result<SnapshotProvider, ScreenerError> {
    let mut snapshot = SnapshotProvider {
        series: HashMap::new(),
        captured_at: Utc::now().timestamp_millis(),
    };

    for &timeframe in timeframes {
        let symbols = provider.universe(exchange, timeframe).await?;
        let batch_size = batch_size.max(1);
        let mut failed = 0;

        for (i, batch) in symbols.chunks(batch_size).enumerate() {
            let start_time = Instant::now();

            let tasks: Vec<_> = batch
                .iter()
                .map(|symbol| provider.get_bars(exchange, symbol, timeframe, lookback))
                .collect();
            for (symbol, result) in batch.iter().zip(futures::future::join_all(tasks).await) {
                match result {
                    Ok(series) => snapshot.insert(series),
                    Err(err) => {
                        warn!(%symbol, %timeframe, error = %err, "skipping symbol in capture");
                        failed += 1;
                    }
                }
            }

            if i * batch_size + batch.len() < symbols.len() {
                let elapsed = start_time.elapsed();
                if elapsed < pause {
                    tokio::time::sleep(pause - elapsed).await;
                }
            }
        }

        info!(exchange, %timeframe, symbols = symbols.len(), failed, "captured timeframe");
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(exchange: &str, symbol: &str, timeframe: Timeframe, closes: &[f64]) -> BarSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: i as i64 * timeframe.duration_ms(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect();
        BarSeries::new(exchange, symbol, timeframe, bars).unwrap()
    }

    #[tokio::test]
    async fn universe_is_sorted_and_scoped_to_timeframe() {
        let snap = SnapshotProvider::new()
            .with_series(series("KUCOIN", "ETHUSDT", Timeframe::Min15, &[1.0]))
            .with_series(series("KUCOIN", "ADAUSDT", Timeframe::Min15, &[1.0]))
            .with_series(series("KUCOIN", "BTCUSDT", Timeframe::Hour1, &[1.0]));
        assert_eq!(
            snap.universe("kucoin", Timeframe::Min15).await.unwrap(),
            ["ADAUSDT", "ETHUSDT"]
        );
        assert!(matches!(
            snap.universe("BINANCE", Timeframe::Min15).await,
            Err(ScreenerError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn missing_symbol_on_known_market_is_not_found() {
        let snap = SnapshotProvider::new().with_series(series("KUCOIN", "ETHUSDT", Timeframe::Min15, &[1.0]));
        assert!(matches!(
            snap.get_bars("KUCOIN", "NOPEUSDT", Timeframe::Min15, 10).await,
            Err(ScreenerError::SymbolNotFound { .. })
        ));
        assert!(matches!(
            snap.get_bars("KUCOIN", "ETHUSDT", Timeframe::Hour4, 10).await,
            Err(ScreenerError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn get_bars_serves_the_tail() {
        let snap = SnapshotProvider::new()
            .with_series(series("BINANCE", "BTCUSDT", Timeframe::Hour1, &[1.0, 2.0, 3.0, 4.0]));
        let tail = snap.get_bars("BINANCE", "btcusdt", Timeframe::Hour1, 2).await.unwrap();
        assert_eq!(tail.closes().collect::<Vec<_>>(), [3.0, 4.0]);
        let all = snap.get_bars("BINANCE", "BTCUSDT", Timeframe::Hour1, 50).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let snap = SnapshotProvider::new()
            .with_series(series("BYBIT", "SOLUSDT", Timeframe::Hour4, &[10.0, 11.0]))
            .with_series(series("BYBIT", "BTCUSDT", Timeframe::Hour4, &[20.0]));
        snap.save(&storage).await.unwrap();

        let loaded = SnapshotProvider::load(&storage).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.market_counts().get("BYBIT"), Some(&2));
        assert_eq!(loaded.market_count("bybit").await.unwrap(), 2);
        assert!(loaded.market_count("BINANCE").await.is_err());
    }

    #[tokio::test]
    async fn merge_replaces_overlapping_series() {
        let mut old = SnapshotProvider::new()
            .with_series(series("BYBIT", "SOLUSDT", Timeframe::Hour4, &[1.0]))
            .with_series(series("BYBIT", "ETHUSDT", Timeframe::Hour4, &[1.0]));
        old.merge(SnapshotProvider::new().with_series(series("BYBIT", "SOLUSDT", Timeframe::Hour4, &[5.0, 6.0])));
        assert_eq!(old.len(), 2);
        let sol = old.get_bars("BYBIT", "SOLUSDT", Timeframe::Hour4, 10).await.unwrap();
        assert_eq!(sol.len(), 2);
    }

    #[tokio::test]
    async fn capture_skips_failing_symbols() {
        let source = SnapshotProvider::new()
            .with_series(series("KUCOIN", "AAAUSDT", Timeframe::Min15, &[1.0, 2.0]))
            .with_series(series("KUCOIN", "BBBUSDT", Timeframe::Min15, &[3.0, 4.0]));
        let captured = capture(&source, "KUCOIN", &[Timeframe::Min15], 100, 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(captured.len(), 2);
        assert!(captured.captured_at() > 0);

        let err = capture(&source, "KUCOIN", &[Timeframe::Hour1], 100, 1, Duration::ZERO).await;
        assert!(matches!(err, Err(ScreenerError::DataUnavailable { .. })));
    }
}
