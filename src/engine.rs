//! The request-scoped core: one [`Engine`] owns the data provider and the
//! exchange catalog and runs every screen, scan and analysis against them.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::errors::{Result, ScreenerError};
use crate::indicators::{IndicatorConfig, RatingConfig};
use crate::models::{BarSeries, Exchange};
use crate::patterns::PatternDefaults;
use crate::providers::MarketDataProvider;
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-symbol fetches in flight at once.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { concurrency: 16 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub indicators: IndicatorConfig,
    pub rating: RatingConfig,
    pub patterns: PatternDefaults,
    pub scan: ScanConfig,
    /// Bars requested per fetch; operations needing more ask for more.
    pub lookback: usize,
}

/// Matches of a universe scan plus the number of symbols that were skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scan<T> {
    pub results: Vec<T>,
    pub omitted: usize,
}

impl<T> Scan<T> {
    pub fn map<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Scan<U> {
        Scan {
            results: f(self.results),
            omitted: self.omitted,
        }
    }
}

pub struct Engine {
    provider: Arc<dyn MarketDataProvider>,
    catalog: Arc<Catalog>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        catalog: Arc<Catalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Catalog entries ordered by exchange name.
    pub fn exchanges_list(&self) -> Result<Vec<Exchange>> {
        let exchanges = self.catalog.list_exchanges();
        if exchanges.is_empty() {
            return Err(ScreenerError::CatalogUnavailable(
                "catalog has no exchanges".to_string(),
            ));
        }
        Ok(exchanges.to_vec())
    }

    /// Resolves the catalog entry for `exchange` and checks it serves `timeframe`.
    pub(crate) fn check_market(&self, exchange: &str, timeframe: Timeframe) -> Result<&Exchange> {
        let entry = self.catalog.find(exchange).ok_or_else(|| {
            ScreenerError::invalid("exchange", format!("unknown exchange `{exchange}`"))
        })?;
        if !entry.supports(timeframe) {
            return Err(ScreenerError::invalid(
                "timeframe",
                format!("{} does not offer {timeframe} candles", entry.name),
            ));
        }
        Ok(entry)
    }

    /// Asks for `wanted` bars (or the configured lookback, if larger) and
    /// returns whatever history the provider has.
    pub(crate) async fn fetch_recent(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        wanted: usize,
    ) -> Result<BarSeries> {
        self.provider
            .get_bars(exchange, symbol, timeframe, wanted.max(self.config.lookback))
            .await
    }

    /// Like [`Engine::fetch_recent`] but fails with `InsufficientData` when
    /// fewer than `min_length` bars come back.
    pub(crate) async fn fetch(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        min_length: usize,
    ) -> Result<BarSeries> {
        let series = self.fetch_recent(exchange, symbol, timeframe, min_length).await?;
        series.require(min_length)?;
        Ok(series)
    }

    /// Runs `evaluate` for every symbol of the exchange's universe with bounded
    /// concurrency. Per-symbol failures are omitted; the scan only fails when the
    /// universe cannot be resolved or every symbol's data was unavailable.
    pub(crate) async fn scan_universe<T, F, Fut>(
        &self,
        exchange: &str,
        timeframe: Timeframe,
        evaluate: F,
    ) -> Result<Scan<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let universe = self.provider.universe(exchange, timeframe).await?;
        let total = universe.len();

        let outcomes: Vec<(String, Result<Option<T>>)> = stream::iter(universe)
            .map(|symbol| {
                let pending = evaluate(symbol.clone());
                async move { (symbol, pending.await) }
            })
            .buffer_unordered(self.config.scan.concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::new();
        let mut omitted = 0;
        let mut unavailable = 0;
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(Some(found)) => results.push(found),
                Ok(None) => {}
                Err(err) if err.is_per_symbol() => {
                    debug!(%symbol, error = %err, "omitting symbol from scan");
                    if matches!(err, ScreenerError::DataUnavailable { .. }) {
                        unavailable += 1;
                    }
                    omitted += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if total > 0 && unavailable == total {
            return Err(ScreenerError::unavailable(
                format!("{exchange} {timeframe}"),
                format!("data for all {total} symbols was unavailable"),
            ));
        }

        info!(
            exchange,
            %timeframe,
            universe = total,
            matched = results.len(),
            omitted,
            "universe scan finished"
        );
        Ok(Scan { results, omitted })
    }
}
