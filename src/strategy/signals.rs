use crate::indicators::{calculate_rsi, calculate_sma, DEFAULT_RSI_PERIOD};
use crate::models::{Momentum, PricePosition, SignalSnapshot, Trend};

/// Configuration for signal generation
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: DEFAULT_RSI_PERIOD,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            short_ma_period: 20,
            long_ma_period: 50,
        }
    }
}

impl SignalConfig {
    /// Samples needed before every indicator is defined
    pub fn samples_needed(&self) -> usize {
        self.long_ma_period
            .max(self.short_ma_period)
            .max(self.rsi_period + 1)
    }
}

/// Trend from the moving-average pair
///
/// Indeterminate until both averages exist.
pub fn classify_trend(sma_short: Option<f64>, sma_long: Option<f64>) -> Trend {
    match (sma_short, sma_long) {
        (Some(short), Some(long)) if short > long => Trend::Bullish,
        (Some(_), Some(_)) => Trend::Bearish,
        _ => Trend::Indeterminate,
    }
}

pub fn classify_momentum(rsi: f64, config: &SignalConfig) -> Momentum {
    if rsi < config.rsi_oversold {
        Momentum::Oversold
    } else if rsi > config.rsi_overbought {
        Momentum::Overbought
    } else {
        Momentum::Neutral
    }
}

pub fn classify_price_position(price: f64, sma_short: Option<f64>) -> PricePosition {
    match sma_short {
        None => PricePosition::Unknown,
        Some(sma) if price < sma => PricePosition::BelowSma,
        Some(_) => PricePosition::AboveSma,
    }
}

/// Compute indicators over `prices` (oldest first) and classify them
///
/// `price` is the current price; it is normally the last element of
/// `prices`.
pub fn analyze(prices: &[f64], price: f64, config: &SignalConfig) -> SignalSnapshot {
    let sma_short = calculate_sma(prices, config.short_ma_period);
    let sma_long = calculate_sma(prices, config.long_ma_period);
    let rsi = calculate_rsi(prices, config.rsi_period);

    SignalSnapshot {
        price,
        sma_short,
        sma_long,
        rsi,
        trend: classify_trend(sma_short, sma_long),
        momentum: classify_momentum(rsi, config),
        price_position: classify_price_position(price, sma_short),
    }
}
