//! Pure indicator math over a [`BarSeries`]: Bollinger Bands, bandwidth,
//! percent change, RSI and the five-level [`Rating`].

use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{BollingerBands, RelativeStrengthIndex};

use crate::errors::{Result, ScreenerError};
use crate::models::{BarSeries, BollingerState, Rating};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub bollinger_period: usize,
    pub bollinger_mult: f64,
    pub rsi_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            bollinger_period: 20,
            bollinger_mult: 2.0,
            rsi_period: 14,
        }
    }
}

/// Thresholds that turn band position and momentum into a [`Rating`].
///
/// `band_touch` is the fraction of the band width, measured from either band,
/// that counts as the "strong" zone. `slope_window` is how many bars back the
/// momentum reference close sits. Slopes within `±flat_slope_pct` percent are
/// treated as flat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub band_touch: f64,
    pub slope_window: usize,
    pub flat_slope_pct: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            band_touch: 0.25,
            slope_window: 3,
            flat_slope_pct: 0.0,
        }
    }
}

impl RatingConfig {
    pub fn required_bars(&self) -> usize {
        self.slope_window + 1
    }
}

/// Bollinger Bands over the trailing `period` closes.
pub fn bollinger(series: &BarSeries, period: usize, mult: f64) -> Result<BollingerState> {
    if period == 0 {
        return Err(ScreenerError::invalid("bollinger_period", "must be at least 1"));
    }
    if !mult.is_finite() || mult < 0.0 {
        return Err(ScreenerError::invalid(
            "bollinger_mult",
            format!("{mult} is not a finite, non-negative multiplier"),
        ));
    }
    series.require(period)?;

    let mut bands = BollingerBands::new(period, mult)
        .map_err(|e| ScreenerError::invalid("bollinger_period", format!("{e:?}")))?;
    let window = series.tail(period).unwrap_or_default();
    let output = window
        .iter()
        .map(|bar| bands.next(bar.close))
        .last()
        .ok_or(ScreenerError::InsufficientData {
            required: period,
            available: series.len(),
        })?;

    let mut state = BollingerState {
        middle: output.average,
        upper: output.upper,
        lower: output.lower,
        bandwidth: 0.0,
    };
    state.bandwidth = bandwidth(&state)?;
    Ok(state)
}

/// (upper − lower) / middle.
pub fn bandwidth(state: &BollingerState) -> Result<f64> {
    if state.middle == 0.0 {
        return Err(ScreenerError::DivisionUndefined(
            "bandwidth with a zero middle band",
        ));
    }
    Ok((state.upper - state.lower) / state.middle)
}

/// Latest close vs the previous close, in percent.
pub fn percent_change(series: &BarSeries) -> Result<f64> {
    series.require(2)?;
    let bars = series.bars();
    let prev = bars[bars.len() - 2].close;
    let last = bars[bars.len() - 1].close;
    if prev == 0.0 {
        return Err(ScreenerError::DivisionUndefined(
            "percent change from a zero close",
        ));
    }
    Ok((last - prev) * 100.0 / prev)
}

pub fn rsi(series: &BarSeries, period: usize) -> Result<f64> {
    let mut rsi_indicator = RelativeStrengthIndex::new(period)
        .map_err(|e| ScreenerError::invalid("rsi_period", format!("{e:?}")))?;
    series.require(period + 1)?;

    let mut last_rsi = 0.0;
    for price in series.closes() {
        last_rsi = rsi_indicator.next(price);
    }
    Ok(last_rsi)
}

/// Where the latest close sits between the bands: 0 at lower, 1 at upper.
pub fn percent_b(close: f64, state: &BollingerState) -> f64 {
    let width = state.upper - state.lower;
    if width == 0.0 {
        return 0.5;
    }
    (close - state.lower) / width
}

pub fn rating(series: &BarSeries, state: &BollingerState, config: &RatingConfig) -> Result<Rating> {
    if config.slope_window == 0 {
        return Err(ScreenerError::invalid("slope_window", "must be at least 1"));
    }
    if !(0.0..0.5).contains(&config.band_touch) {
        return Err(ScreenerError::invalid(
            "band_touch",
            format!("{} is outside [0, 0.5)", config.band_touch),
        ));
    }
    series.require(config.required_bars())?;

    let bars = series.bars();
    let last = bars[bars.len() - 1].close;
    let reference = bars[bars.len() - 1 - config.slope_window].close;
    if reference == 0.0 {
        return Err(ScreenerError::DivisionUndefined(
            "momentum slope from a zero close",
        ));
    }

    let b = percent_b(last, state);
    let position: i8 = if b >= 1.0 - config.band_touch {
        2
    } else if b > 0.5 {
        1
    } else if b <= config.band_touch {
        -2
    } else if b < 0.5 {
        -1
    } else {
        0
    };

    let slope = (last - reference) * 100.0 / reference;
    let momentum: i8 = if slope > config.flat_slope_pct {
        1
    } else if slope < -config.flat_slope_pct {
        -1
    } else {
        0
    };

    // disagreeing or flat momentum pulls the score one step toward neutral
    let score = if position == 0 || momentum == position.signum() {
        position
    } else {
        position - position.signum()
    };
    Ok(Rating::from_score(score))
}
