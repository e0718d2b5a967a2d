use serde::Serialize;
use thiserror::Error;

/// The unified error type for every screening, pattern and analysis operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScreenerError {
    /// A request argument was rejected before any market data was fetched.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The data source does not know this symbol on this exchange.
    #[error("Symbol {symbol} not found on {exchange}")]
    SymbolNotFound { exchange: String, symbol: String },

    /// The data source failed (network, rate limit, malformed payload).
    #[error("Market data unavailable for {context}: {reason}")]
    DataUnavailable { context: String, reason: String },

    /// The bar history is shorter than the indicator window needs.
    #[error("Insufficient data: {required} bars required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// A ratio over a zero denominator (zero-priced instrument).
    #[error("Division undefined: {0}")]
    DivisionUndefined(&'static str),

    /// The exchange catalog could not be loaded.
    #[error("Exchange catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

/// Stable machine-readable name for each [`ScreenerError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    SymbolNotFound,
    DataUnavailable,
    InsufficientData,
    DivisionUndefined,
    CatalogUnavailable,
}

impl ScreenerError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn unavailable(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            Self::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::DivisionUndefined(_) => ErrorKind::DivisionUndefined,
            Self::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
        }
    }

    /// Failures a universe scan omits instead of aborting on.
    pub fn is_per_symbol(&self) -> bool {
        matches!(
            self,
            Self::SymbolNotFound { .. }
                | Self::DataUnavailable { .. }
                | Self::InsufficientData { .. }
                | Self::DivisionUndefined(_)
        )
    }
}

/// The document a failed tool call is rendered as.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub error: ErrorKind,
    pub message: String,
}

impl From<&ScreenerError> for ToolError {
    fn from(err: &ScreenerError) -> Self {
        Self {
            error: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = ScreenerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_uses_snake_case_kind() {
        let err = ScreenerError::InsufficientData {
            required: 20,
            available: 4,
        };
        let json = serde_json::to_value(ToolError::from(&err)).unwrap();
        assert_eq!(json["error"], "insufficient_data");
        assert_eq!(
            json["message"],
            "Insufficient data: 20 bars required, 4 available"
        );
    }

    #[test]
    fn invalid_parameter_is_not_per_symbol() {
        assert!(!ScreenerError::invalid("limit", "must be positive").is_per_symbol());
        assert!(ScreenerError::unavailable("BINANCE:BTCUSDT", "timeout").is_per_symbol());
    }
}
