//! Market screening and candle-pattern engine over per-symbol OHLCV series.

pub mod analysis;
pub mod catalog;
pub mod comfy_table;
pub mod engine;
pub mod errors;
pub mod indicators;
pub mod models;
pub mod patterns;
pub mod providers;
pub mod screening;
pub mod storage_utils;
pub mod timeframe;
pub mod tools;
pub mod tui;

pub use engine::{Engine, EngineConfig, Scan};
pub use errors::{ErrorKind, ScreenerError, ToolError};
pub use models::{Bar, BarSeries, BollingerState, CandlePattern, Exchange, PatternType, Rating, ScreenResult};
pub use timeframe::Timeframe;
pub use tools::{ToolRequest, ToolResponse, dispatch};
