use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single observed price
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceSample {
    pub fn now(price: f64) -> Self {
        Self {
            price,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free and locked amounts of one asset
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

/// Exchange acknowledgement of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub executed_qty: f64,
    pub status: String,
}

/// Exchange-imposed order constraints for one symbol
///
/// Invariant: `min_qty <= max_qty` and `step_size > 0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TradingRules {
    pub min_qty: f64,
    pub max_qty: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub base_asset_precision: u32,
    pub quote_precision: u32,
}

impl Default for TradingRules {
    /// Used for any filter the exchange omits.
    fn default() -> Self {
        Self {
            min_qty: 0.0,
            max_qty: 1_000_000.0,
            step_size: 1.0,
            min_notional: 10.0,
            base_asset_precision: 8,
            quote_precision: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    /// Not enough history for the long moving average
    Indeterminate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Momentum {
    Oversold,
    Overbought,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PricePosition {
    BelowSma,
    AboveSma,
    Unknown,
}

/// Indicator values and the signals classified from them in one cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalSnapshot {
    pub price: f64,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub rsi: f64,
    pub trend: Trend,
    pub momentum: Momentum,
    pub price_position: PricePosition,
}

/// What the decision engine wants done this cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ActionKind {
    None,
    /// Spend `amount_quote` units of the quote asset
    Buy { amount_quote: f64 },
    /// Sell `amount_base` units of the base asset
    Sell { amount_base: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub reason: String,
    /// In [0, 1]
    pub confidence: f64,
}

impl Action {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::None,
            reason: reason.into(),
            confidence: 0.0,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, ActionKind::None)
    }
}

/// Outcome of checking a proposed order against [`TradingRules`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    /// 0 when invalid
    pub adjusted_quantity: f64,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn accepted(adjusted_quantity: f64) -> Self {
        Self {
            valid: true,
            adjusted_quantity,
            errors: Vec::new(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            adjusted_quantity: 0.0,
            errors: vec![error.into()],
        }
    }
}
