use thiserror::Error;

/// Errors raised by the accumulation controller.
///
/// Only `RulesUnavailable` at start time ever reaches the caller of
/// [`crate::execution::TradingEngine::start`]; everything else is caught and
/// logged inside the cycle that produced it.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("trading rules unavailable for {symbol}: {reason}")]
    RulesUnavailable { symbol: String, reason: String },

    #[error("order rejected by validation: {}", errors.join("; "))]
    ValidationRejected { errors: Vec<String> },

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("clock sync failed: {0}")]
    ClockSyncFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::Gateway(err.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Gateway(format!("malformed response: {}", err))
    }
}

impl From<serde_urlencoded::ser::Error> for BotError {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        BotError::Gateway(format!("query encoding: {}", err))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejected_joins_errors() {
        let err = BotError::ValidationRejected {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "order rejected by validation: a; b");
    }

    #[test]
    fn test_rules_unavailable_names_symbol() {
        let err = BotError::RulesUnavailable {
            symbol: "BTCUSDT".to_string(),
            reason: "not listed".to_string(),
        };
        assert!(err.to_string().contains("BTCUSDT"));
    }
}
