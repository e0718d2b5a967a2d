#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use market_screener::catalog::Catalog;
use market_screener::providers::MarketDataProvider;
use market_screener::providers::snapshot::SnapshotProvider;
use market_screener::storage_utils::AppConfig;
use market_screener::{Bar, BarSeries, Engine, ScreenerError, Timeframe};

pub const EXCHANGE: &str = "KUCOIN";

/// Builds a series from `(open, close)` pairs; high/low hug the body.
pub fn series_from_bodies(symbol: &str, timeframe: Timeframe, bodies: &[(f64, f64)]) -> BarSeries {
    let bars = bodies
        .iter()
        .enumerate()
        .map(|(i, &(open, close))| Bar {
            timestamp: 1_700_000_000_000 + i as i64 * timeframe.duration_ms(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 10.0,
        })
        .collect();
    BarSeries::new(EXCHANGE, symbol, timeframe, bars).unwrap()
}

/// Each bar opens at the previous close; the first bar has no body.
pub fn series_from_closes(symbol: &str, timeframe: Timeframe, closes: &[f64]) -> BarSeries {
    let bodies: Vec<(f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| (if i == 0 { c } else { closes[i - 1] }, c))
        .collect();
    series_from_bodies(symbol, timeframe, &bodies)
}

fn flat_then(base: f64, count: usize, last: f64) -> Vec<f64> {
    let mut closes = vec![base; count - 1];
    closes.push(last);
    closes
}

/// The KUCOIN 15m market used across the integration tests.
///
/// | symbol     | last change | notes                                   |
/// |------------|-------------|-----------------------------------------|
/// | AAAUSDT    | +5%         | ties with DDDUSDT                       |
/// | DDDUSDT    | +5%         |                                         |
/// | ACCUSDT    | +3.88%      | bodies 1, 2, 4: accelerating, bullish x3 |
/// | BBBUSDT    | +1%         | tight bands                             |
/// | RUNUSDT    | +0.78%      | 29 rising bars                          |
/// | EEEUSDT    | 0%          | perfectly flat                          |
/// | SHORTUSDT  | 0%          | only 5 bars                             |
/// | LOWUSDT    | +0.22%      | bouncing off the lower band: sell       |
/// | MIDUSDT    | +0.10%      | just above the middle, rising: buy      |
/// | CCCUSDT    | −3%         |                                         |
pub fn market_series() -> Vec<BarSeries> {
    let tf = Timeframe::Min15;
    let mut accelerating: Vec<(f64, f64)> = vec![(100.0, 100.0); 27];
    accelerating.extend([(100.0, 101.0), (101.0, 103.0), (103.0, 107.0)]);
    let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
    let choppy: Vec<f64> = (0..26).map(|i| if i % 2 == 0 { 95.0 } else { 105.0 }).collect();
    let mid = [choppy.clone(), vec![100.0, 99.8, 100.5, 100.6]].concat();
    let low = [choppy, vec![90.0, 91.5, 91.0, 91.2]].concat();

    vec![
        series_from_closes("AAAUSDT", tf, &flat_then(100.0, 30, 105.0)),
        series_from_closes("DDDUSDT", tf, &flat_then(200.0, 30, 210.0)),
        series_from_bodies("ACCUSDT", tf, &accelerating),
        series_from_closes("BBBUSDT", tf, &flat_then(100.0, 30, 101.0)),
        series_from_closes("RUNUSDT", tf, &rising),
        series_from_closes("EEEUSDT", tf, &[50.0; 30]),
        series_from_closes("SHORTUSDT", tf, &[10.0; 5]),
        series_from_closes("CCCUSDT", tf, &flat_then(100.0, 30, 97.0)),
        series_from_closes("MIDUSDT", tf, &mid),
        series_from_closes("LOWUSDT", tf, &low),
        // higher timeframe data for confirmation and analysis
        series_from_bodies("ACCUSDT", Timeframe::Hour1, &[(90.0, 95.0), (95.0, 99.0)]),
        series_from_closes("BTCUSDT", Timeframe::Hour1, &(0..30).map(|i| 30_000.0 + 10.0 * i as f64).collect::<Vec<_>>()),
    ]
}

pub fn snapshot() -> SnapshotProvider {
    market_series()
        .into_iter()
        .fold(SnapshotProvider::new(), SnapshotProvider::with_series)
}

pub fn engine_with(provider: Arc<dyn MarketDataProvider>) -> Engine {
    Engine::new(
        provider,
        Arc::new(Catalog::builtin()),
        AppConfig::default().engine_config(),
    )
}

pub fn engine() -> Engine {
    engine_with(Arc::new(snapshot()))
}

/// Lists a universe but fails every bar request with `DataUnavailable`,
/// counting the calls it receives.
pub struct FailingProvider {
    pub symbols: Vec<String>,
    pub calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for FailingProvider {
    async fn universe(&self, _exchange: &str, _timeframe: Timeframe) -> Result<Vec<String>, ScreenerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.symbols.clone())
    }

    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        _timeframe: Timeframe,
        _min_length: usize,
    ) -> Result<BarSeries, ScreenerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScreenerError::unavailable(format!("{exchange}:{symbol}"), "connection reset"))
    }
}

/// Serves the snapshot but fails bar requests for one symbol.
pub struct FlakyProvider {
    pub inner: SnapshotProvider,
    pub broken: &'static str,
}

#[async_trait]
impl MarketDataProvider for FlakyProvider {
    async fn universe(&self, exchange: &str, timeframe: Timeframe) -> Result<Vec<String>, ScreenerError> {
        self.inner.universe(exchange, timeframe).await
    }

    async fn get_bars(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries, ScreenerError> {
        if symbol == self.broken {
            return Err(ScreenerError::unavailable(symbol, "timed out"));
        }
        self.inner.get_bars(exchange, symbol, timeframe, min_length).await
    }
}
