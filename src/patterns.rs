//! Multi-candle structure detection: consecutive same-direction runs and
//! accelerating ("advancing size") bodies, single series or across a universe.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Engine, Scan};
use crate::errors::{Result, ScreenerError};
use crate::models::{BarSeries, CandlePattern, PatternType, round_decimal};
use crate::screening::Limit;
use crate::timeframe::Timeframe;

/// Parameters used when a caller does not pass its own, e.g. in coin analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternDefaults {
    pub candle_count: usize,
    pub min_growth: f64,
    pub pattern_length: usize,
    pub min_size_increase: f64,
    /// How many coarser timeframes an advanced pattern is checked against.
    pub confirmation_depth: usize,
}

impl Default for PatternDefaults {
    fn default() -> Self {
        Self {
            candle_count: 3,
            min_growth: 2.0,
            pattern_length: 3,
            min_size_increase: 10.0,
            confirmation_depth: 2,
        }
    }
}

pub fn validate_consecutive(candle_count: usize, min_growth: f64) -> Result<()> {
    if candle_count == 0 {
        return Err(ScreenerError::invalid("candle_count", "must be at least 1"));
    }
    if !min_growth.is_finite() {
        return Err(ScreenerError::invalid("min_growth", "must be a finite number"));
    }
    Ok(())
}

pub fn validate_advanced(pattern_length: usize, min_size_increase: f64) -> Result<()> {
    if pattern_length < 2 {
        return Err(ScreenerError::invalid(
            "pattern_length",
            "needs at least 2 candles to compare body sizes",
        ));
    }
    if !min_size_increase.is_finite() || min_size_increase < 0.0 {
        return Err(ScreenerError::invalid(
            "min_size_increase",
            format!("{min_size_increase} is not a finite, non-negative percentage"),
        ));
    }
    Ok(())
}

/// Matches when each of the last `candle_count` bars closes in `pattern_type`'s
/// direction and the move from the window's first open to its last close is at
/// least `min_growth` percent in that direction. A series shorter than the
/// window is simply no match.
pub fn consecutive_candles(
    series: &BarSeries,
    pattern_type: PatternType,
    candle_count: usize,
    min_growth: f64,
) -> Result<Option<CandlePattern>> {
    validate_consecutive(candle_count, min_growth)?;

    let Some(window) = series.tail(candle_count) else {
        return Ok(None);
    };
    if !window.iter().all(|bar| pattern_type.matches(bar)) {
        return Ok(None);
    }

    let first_open = window[0].open;
    let last_close = window[window.len() - 1].close;
    if first_open == 0.0 {
        return Ok(None);
    }
    let growth = match pattern_type {
        PatternType::Bullish => (last_close - first_open) * 100.0 / first_open,
        PatternType::Bearish => (first_open - last_close) * 100.0 / first_open,
    };
    // compared at output precision so a move exactly at the threshold matches
    if round_decimal(growth) < min_growth {
        return Ok(None);
    }

    let run_length = series
        .bars()
        .iter()
        .rev()
        .take_while(|bar| pattern_type.matches(bar))
        .count();

    Ok(Some(CandlePattern {
        symbol: series.symbol().to_string(),
        exchange: series.exchange().to_string(),
        pattern_type,
        run_length,
        growth_percent: growth,
        matched_timeframes: vec![series.timeframe()],
    }))
}

/// Matches when every one of the last `pattern_length` bodies is at least
/// `min_size_increase` percent larger than the one before it, in any direction.
/// A zero-sized body before the last bar is never a match.
pub fn advanced_pattern(
    series: &BarSeries,
    pattern_length: usize,
    min_size_increase: f64,
) -> Result<Option<CandlePattern>> {
    validate_advanced(pattern_length, min_size_increase)?;

    let Some(window) = series.tail(pattern_length) else {
        return Ok(None);
    };

    for pair in window.windows(2) {
        let prev = pair[0].body();
        if prev == 0.0 {
            return Ok(None);
        }
        let increase = (pair[1].body() - prev) * 100.0 / prev;
        if round_decimal(increase) < min_size_increase {
            return Ok(None);
        }
    }

    let first = &window[0];
    let last = &window[window.len() - 1];
    let Some(pattern_type) = last.direction() else {
        return Ok(None);
    };

    Ok(Some(CandlePattern {
        symbol: series.symbol().to_string(),
        exchange: series.exchange().to_string(),
        pattern_type,
        run_length: pattern_length,
        growth_percent: (last.body() - first.body()) * 100.0 / first.body(),
        matched_timeframes: vec![series.timeframe()],
    }))
}

/// Largest growth first, then longer runs, then symbol.
pub fn rank_patterns(mut patterns: Vec<CandlePattern>, limit: Limit) -> Vec<CandlePattern> {
    patterns.sort_by(|a, b| {
        b.growth_percent
            .total_cmp(&a.growth_percent)
            .then_with(|| b.run_length.cmp(&a.run_length))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    patterns.truncate(limit.get());
    patterns
}

impl Engine {
    pub async fn consecutive_candles_scan(
        &self,
        exchange: &str,
        timeframe: Timeframe,
        pattern_type: PatternType,
        candle_count: usize,
        min_growth: f64,
        limit: Limit,
    ) -> Result<Scan<CandlePattern>> {
        validate_consecutive(candle_count, min_growth)?;
        let exchange = self.check_market(exchange, timeframe)?.name.as_str();

        let scan = self
            .scan_universe(exchange, timeframe, move |symbol| async move {
                let series = self.fetch_recent(exchange, &symbol, timeframe, candle_count).await?;
                consecutive_candles(&series, pattern_type, candle_count, min_growth)
            })
            .await?;
        Ok(scan.map(|found| rank_patterns(found, limit)))
    }

    pub async fn advanced_candle_pattern(
        &self,
        exchange: &str,
        base_timeframe: Timeframe,
        pattern_length: usize,
        min_size_increase: f64,
        limit: Limit,
    ) -> Result<Scan<CandlePattern>> {
        validate_advanced(pattern_length, min_size_increase)?;
        let exchange = self.check_market(exchange, base_timeframe)?.name.as_str();

        let scan = self
            .scan_universe(exchange, base_timeframe, move |symbol| async move {
                let series = self.fetch_recent(exchange, &symbol, base_timeframe, pattern_length).await?;
                match advanced_pattern(&series, pattern_length, min_size_increase)? {
                    Some(found) => Ok(Some(self.confirm_higher_timeframes(found).await)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(scan.map(|found| rank_patterns(found, limit)))
    }

    /// Appends each coarser timeframe whose latest bar closes in the pattern's
    /// direction. Missing data on a coarser timeframe only skips that timeframe.
    pub(crate) async fn confirm_higher_timeframes(&self, mut pattern: CandlePattern) -> CandlePattern {
        let Some(&base) = pattern.matched_timeframes.first() else {
            return pattern;
        };
        let ladder = std::iter::successors(base.higher(), |tf| tf.higher())
            .take(self.config().patterns.confirmation_depth);

        for timeframe in ladder {
            if self.check_market(&pattern.exchange, timeframe).is_err() {
                break;
            }
            match self.fetch(&pattern.exchange, &pattern.symbol, timeframe, 1).await {
                Ok(series) => {
                    if series.last().is_some_and(|bar| pattern.pattern_type.matches(bar)) {
                        pattern.matched_timeframes.push(timeframe);
                    }
                }
                Err(err) => {
                    debug!(symbol = %pattern.symbol, %timeframe, error = %err, "confirmation skipped");
                }
            }
        }
        pattern
    }
}
