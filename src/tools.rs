//! The fixed set of callable tools.
//!
//! A request is a JSON document tagged by tool name, e.g.
//! `{"tool": "top_gainers", "exchange": "KUCOIN", "timeframe": "15m", "limit": 5}`.
//! Omitted fields take the documented defaults. Parameters are validated
//! before any market data is requested.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::AnalysisReport;
use crate::engine::{Engine, Scan};
use crate::errors::{Result, ScreenerError, ToolError};
use crate::models::{CandlePattern, Exchange, PatternType, Rating, ScreenResult};
use crate::screening::Limit;
use crate::timeframe::Timeframe;

fn default_exchange() -> String {
    "KUCOIN".to_string()
}

fn default_timeframe() -> String {
    Timeframe::Min15.as_str().to_string()
}

fn default_limit() -> i64 {
    Limit::DEFAULT.get() as i64
}

fn default_bbw_threshold() -> f64 {
    0.04
}

fn default_rating() -> i64 {
    Rating::StrongBuy.value() as i64
}

fn default_pattern_type() -> String {
    PatternType::Bullish.as_str().to_string()
}

fn default_candle_count() -> i64 {
    3
}

fn default_min_growth() -> f64 {
    2.0
}

fn default_pattern_length() -> i64 {
    3
}

fn default_min_size_increase() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoversParams {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BollingerParams {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_bbw_threshold")]
    pub bbw_threshold: f64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingParams {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_rating")]
    pub rating: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub symbol: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsecutiveParams {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_pattern_type")]
    pub pattern_type: String,
    #[serde(default = "default_candle_count")]
    pub candle_count: i64,
    #[serde(default = "default_min_growth")]
    pub min_growth: f64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedParams {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub base_timeframe: String,
    #[serde(default = "default_pattern_length")]
    pub pattern_length: i64,
    #[serde(default = "default_min_size_increase")]
    pub min_size_increase: f64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    TopGainers(MoversParams),
    TopLosers(MoversParams),
    BollingerScan(BollingerParams),
    RatingFilter(RatingParams),
    CoinAnalysis(AnalysisParams),
    ConsecutiveCandlesScan(ConsecutiveParams),
    AdvancedCandlePattern(AdvancedParams),
    ExchangesList,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Screen(Scan<ScreenResult>),
    Patterns(Scan<CandlePattern>),
    Analysis(Box<AnalysisReport>),
    Exchanges(Vec<Exchange>),
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::TopGainers(_) => "top_gainers",
            ToolRequest::TopLosers(_) => "top_losers",
            ToolRequest::BollingerScan(_) => "bollinger_scan",
            ToolRequest::RatingFilter(_) => "rating_filter",
            ToolRequest::CoinAnalysis(_) => "coin_analysis",
            ToolRequest::ConsecutiveCandlesScan(_) => "consecutive_candles_scan",
            ToolRequest::AdvancedCandlePattern(_) => "advanced_candle_pattern",
            ToolRequest::ExchangesList => "exchanges_list",
        }
    }

    /// Parses a JSON request. Malformed documents are rejected as an invalid
    /// `request` parameter.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ScreenerError::invalid("request", e.to_string()))
    }

    /// One call per tool, with the arguments of the demonstration run.
    pub fn demo_suite() -> Vec<ToolRequest> {
        let movers = |exchange: &str, timeframe: &str| MoversParams {
            exchange: exchange.to_string(),
            timeframe: timeframe.to_string(),
            limit: 5,
        };
        vec![
            ToolRequest::TopGainers(movers("KUCOIN", "15m")),
            ToolRequest::TopLosers(movers("BINANCE", "1h")),
            ToolRequest::BollingerScan(BollingerParams {
                exchange: "KUCOIN".to_string(),
                timeframe: "4h".to_string(),
                bbw_threshold: 0.04,
                limit: 5,
            }),
            ToolRequest::RatingFilter(RatingParams {
                exchange: "KUCOIN".to_string(),
                timeframe: "15m".to_string(),
                rating: 2,
                limit: 5,
            }),
            ToolRequest::CoinAnalysis(AnalysisParams {
                symbol: "BTCUSDT".to_string(),
                exchange: "KUCOIN".to_string(),
                timeframe: "1h".to_string(),
            }),
            ToolRequest::ConsecutiveCandlesScan(ConsecutiveParams {
                exchange: "KUCOIN".to_string(),
                timeframe: "15m".to_string(),
                pattern_type: "bullish".to_string(),
                candle_count: 3,
                min_growth: 2.0,
                limit: 5,
            }),
            ToolRequest::AdvancedCandlePattern(AdvancedParams {
                exchange: "KUCOIN".to_string(),
                base_timeframe: "15m".to_string(),
                pattern_length: 3,
                min_size_increase: 10.0,
                limit: 5,
            }),
            ToolRequest::ExchangesList,
        ]
    }
}

/// Converts a signed count argument, rejecting negatives under `name`.
fn count(name: &'static str, raw: i64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| ScreenerError::invalid(name, format!("{raw} must not be negative")))
}

/// Runs one request against the engine.
pub async fn dispatch(engine: &Engine, request: ToolRequest) -> Result<ToolResponse> {
    debug!(tool = request.name(), "dispatching");
    match request {
        ToolRequest::TopGainers(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.timeframe.parse()?;
            Ok(ToolResponse::Screen(engine.top_gainers(&p.exchange, timeframe, limit).await?))
        }
        ToolRequest::TopLosers(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.timeframe.parse()?;
            Ok(ToolResponse::Screen(engine.top_losers(&p.exchange, timeframe, limit).await?))
        }
        ToolRequest::BollingerScan(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.timeframe.parse()?;
            Ok(ToolResponse::Screen(
                engine.bollinger_scan(&p.exchange, timeframe, p.bbw_threshold, limit).await?,
            ))
        }
        ToolRequest::RatingFilter(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.timeframe.parse()?;
            let wanted = Rating::try_from(p.rating)?;
            Ok(ToolResponse::Screen(
                engine.rating_filter(&p.exchange, timeframe, wanted, limit).await?,
            ))
        }
        ToolRequest::CoinAnalysis(p) => {
            let timeframe: Timeframe = p.timeframe.parse()?;
            let report = engine.coin_analysis(&p.symbol, &p.exchange, timeframe).await?;
            Ok(ToolResponse::Analysis(Box::new(report)))
        }
        ToolRequest::ConsecutiveCandlesScan(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.timeframe.parse()?;
            let pattern_type: PatternType = p.pattern_type.parse()?;
            let candle_count = count("candle_count", p.candle_count)?;
            Ok(ToolResponse::Patterns(
                engine
                    .consecutive_candles_scan(&p.exchange, timeframe, pattern_type, candle_count, p.min_growth, limit)
                    .await?,
            ))
        }
        ToolRequest::AdvancedCandlePattern(p) => {
            let limit = Limit::new(p.limit)?;
            let timeframe: Timeframe = p.base_timeframe.parse()?;
            let pattern_length = count("pattern_length", p.pattern_length)?;
            Ok(ToolResponse::Patterns(
                engine
                    .advanced_candle_pattern(&p.exchange, timeframe, pattern_length, p.min_size_increase, limit)
                    .await?,
            ))
        }
        ToolRequest::ExchangesList => Ok(ToolResponse::Exchanges(engine.exchanges_list()?)),
    }
}

/// Renders a dispatch outcome as pretty JSON: the response document, or
/// `{"error": <kind>, "message": <text>}`.
pub fn to_json(outcome: &Result<ToolResponse>) -> serde_json::Result<String> {
    match outcome {
        Ok(response) => serde_json::to_string_pretty(response),
        Err(err) => serde_json::to_string_pretty(&ToolError::from(err)),
    }
}
