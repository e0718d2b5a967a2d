//! Universe-wide screens: top movers, Bollinger squeezes and rating filters.
//!
//! Every screen collects one metric per symbol, sorts by that metric (ties by
//! symbol) and only then truncates, so the output never depends on the order
//! in which per-symbol fetches complete.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, Scan};
use crate::errors::{Result, ScreenerError};
use crate::indicators::{bollinger, percent_change, rating};
use crate::models::{Rating, ScreenResult, round_decimal};
use crate::timeframe::Timeframe;

/// Upper bound on rows returned by a screen or scan. Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(usize);

impl Limit {
    pub const DEFAULT: Limit = Limit(25);

    pub fn new(raw: i64) -> Result<Self> {
        if raw <= 0 {
            return Err(ScreenerError::invalid(
                "limit",
                format!("{raw} is not a positive row count"),
            ));
        }
        Ok(Limit(raw as usize))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Gainers,
    Losers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sorts `(symbol, metric)` rows, truncates to `limit` and assigns 1-based ranks.
pub fn rank_rows(
    mut rows: Vec<(String, f64)>,
    order: SortOrder,
    limit: Limit,
    exchange: &str,
    timeframe: Timeframe,
) -> Vec<ScreenResult> {
    rows.sort_by(|(sym_a, a), (sym_b, b)| {
        let by_metric = match order {
            SortOrder::Ascending => a.total_cmp(b),
            SortOrder::Descending => b.total_cmp(a),
        };
        by_metric.then_with(|| sym_a.cmp(sym_b))
    });
    rows.truncate(limit.get());

    rows.into_iter()
        .enumerate()
        .map(|(i, (symbol, metric_value))| ScreenResult {
            symbol,
            exchange: exchange.to_string(),
            timeframe,
            metric_value,
            rank: i + 1,
        })
        .collect()
}

impl Engine {
    /// Ranks the universe by latest-bar percent change.
    pub async fn top_movers(
        &self,
        exchange: &str,
        timeframe: Timeframe,
        direction: Direction,
        limit: Limit,
    ) -> Result<Scan<ScreenResult>> {
        let exchange = self.check_market(exchange, timeframe)?.name.as_str();

        let scan = self
            .scan_universe(exchange, timeframe, move |symbol| async move {
                let series = self.fetch(exchange, &symbol, timeframe, 2).await?;
                Ok(Some((symbol, percent_change(&series)?)))
            })
            .await?;

        let order = match direction {
            Direction::Gainers => SortOrder::Descending,
            Direction::Losers => SortOrder::Ascending,
        };
        Ok(scan.map(|rows| rank_rows(rows, order, limit, exchange, timeframe)))
    }

    pub async fn top_gainers(&self, exchange: &str, timeframe: Timeframe, limit: Limit) -> Result<Scan<ScreenResult>> {
        self.top_movers(exchange, timeframe, Direction::Gainers, limit).await
    }

    pub async fn top_losers(&self, exchange: &str, timeframe: Timeframe, limit: Limit) -> Result<Scan<ScreenResult>> {
        self.top_movers(exchange, timeframe, Direction::Losers, limit).await
    }

    /// Symbols whose Bollinger bandwidth is below `bbw_threshold`, tightest first.
    pub async fn bollinger_scan(
        &self,
        exchange: &str,
        timeframe: Timeframe,
        bbw_threshold: f64,
        limit: Limit,
    ) -> Result<Scan<ScreenResult>> {
        if !bbw_threshold.is_finite() || bbw_threshold <= 0.0 {
            return Err(ScreenerError::invalid(
                "bbw_threshold",
                format!("{bbw_threshold} is not a positive bandwidth"),
            ));
        }
        let exchange = self.check_market(exchange, timeframe)?.name.as_str();
        let cfg = self.config().indicators;

        let scan = self
            .scan_universe(exchange, timeframe, move |symbol| async move {
                let series = self
                    .fetch(exchange, &symbol, timeframe, cfg.bollinger_period)
                    .await?;
                let state = bollinger(&series, cfg.bollinger_period, cfg.bollinger_mult)?;
                Ok(squeezed(state.bandwidth, bbw_threshold).then_some((symbol, state.bandwidth)))
            })
            .await?;

        Ok(scan.map(|rows| rank_rows(rows, SortOrder::Ascending, limit, exchange, timeframe)))
    }

    /// Symbols whose computed [`Rating`] equals `wanted`, strongest movers first.
    pub async fn rating_filter(
        &self,
        exchange: &str,
        timeframe: Timeframe,
        wanted: Rating,
        limit: Limit,
    ) -> Result<Scan<ScreenResult>> {
        let exchange = self.check_market(exchange, timeframe)?.name.as_str();
        let indicators = self.config().indicators;
        let rating_cfg = self.config().rating;
        let required = indicators
            .bollinger_period
            .max(rating_cfg.required_bars())
            .max(2);

        let scan = self
            .scan_universe(exchange, timeframe, move |symbol| async move {
                let series = self.fetch(exchange, &symbol, timeframe, required).await?;
                let state = bollinger(&series, indicators.bollinger_period, indicators.bollinger_mult)?;
                if rating(&series, &state, &rating_cfg)? != wanted {
                    return Ok(None);
                }
                Ok(Some((symbol, percent_change(&series)?)))
            })
            .await?;

        Ok(scan.map(|rows| rank_rows(rows, SortOrder::Descending, limit, exchange, timeframe)))
    }
}

/// Bandwidth is compared at output precision.
fn squeezed(bandwidth: f64, threshold: f64) -> bool {
    round_decimal(bandwidth) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    #[test]
    fn limit_rejects_zero_and_negative() {
        assert!(matches!(
            Limit::new(0),
            Err(ScreenerError::InvalidParameter { name: "limit", .. })
        ));
        assert!(Limit::new(-3).is_err());
        assert_eq!(Limit::new(7).unwrap().get(), 7);
        assert_eq!(Limit::default().get(), 25);
    }

    #[test]
    fn descending_ties_fall_back_to_symbol() {
        let ranked = rank_rows(
            rows(&[("SOLUSDT", 3.0), ("ADAUSDT", 3.0), ("BTCUSDT", 5.0), ("XRPUSDT", -1.0)]),
            SortOrder::Descending,
            Limit::new(3).unwrap(),
            "KUCOIN",
            Timeframe::Min15,
        );
        let order: Vec<(&str, usize)> = ranked.iter().map(|r| (r.symbol.as_str(), r.rank)).collect();
        assert_eq!(order, [("BTCUSDT", 1), ("ADAUSDT", 2), ("SOLUSDT", 3)]);
    }

    #[test]
    fn ascending_order_and_short_input() {
        let ranked = rank_rows(
            rows(&[("B", 0.03), ("A", 0.01)]),
            SortOrder::Ascending,
            Limit::new(10).unwrap(),
            "BINANCE",
            Timeframe::Hour4,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].symbol, "A");
        assert_eq!(ranked[1].metric_value, 0.03);
        assert!(rank_rows(Vec::new(), SortOrder::Ascending, Limit::DEFAULT, "BINANCE", Timeframe::Hour4).is_empty());
    }

    #[test]
    fn squeeze_threshold_is_strict_at_output_precision() {
        // (0.41 - 0.37) / 1.0 lands just under 0.04 in f64
        let bandwidth = (0.41 - 0.37) / 1.0;
        assert!(bandwidth < 0.04);
        assert!(!squeezed(bandwidth, 0.04));
        assert!(squeezed(0.0399, 0.04));
        assert!(!squeezed(0.04, 0.04));
    }
}
