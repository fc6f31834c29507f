use super::signals::{analyze, SignalConfig};
use crate::execution::PriceHistory;
use crate::models::{
    Action, ActionKind, Momentum, PricePosition, PriceSample, SignalSnapshot, Trend,
};

/// Quote balance required before trend-following DCA kicks in
const DCA_MIN_QUOTE_BALANCE: f64 = 50.0;
/// Base balance required before any profit is taken
const PROFIT_TAKING_MIN_BASE_BALANCE: f64 = 100.0;

/// Result of one evaluation: the action plus the signals behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub snapshot: SignalSnapshot,
}

/// Accumulation strategy
///
/// A priority ladder biased toward buying. The first matching rule wins:
/// 1. Oversold and below SMA: strong buy (30%)
/// 2. Oversold or below SMA: moderate buy (15%)
/// 3. Bullish trend with spare quote: DCA buy (5%)
/// 4. Overbought, above SMA, meaningful holdings: sell 20% of base
/// 5. Otherwise hold
///
/// Buy percentages apply to both the quote balance and the configured base
/// order amount; the smaller result is used.
#[derive(Debug, Clone)]
pub struct AccumulationStrategy {
    config: SignalConfig,
    base_order_amount: f64,
    history: PriceHistory,
}

impl AccumulationStrategy {
    pub fn new(base_order_amount: f64) -> Self {
        Self::with_config(base_order_amount, SignalConfig::default())
    }

    pub fn with_config(base_order_amount: f64, config: SignalConfig) -> Self {
        Self {
            config,
            base_order_amount,
            history: PriceHistory::default(),
        }
    }

    /// Record the new price, recompute indicators and pick an action
    pub fn evaluate(
        &mut self,
        sample: PriceSample,
        base_balance: f64,
        quote_balance: f64,
    ) -> Decision {
        self.history.append(sample);

        let prices = self.history.prices();
        let snapshot = analyze(&prices, sample.price, &self.config);
        let action = decide(&snapshot, base_balance, quote_balance, self.base_order_amount);

        tracing::debug!(
            price = sample.price,
            samples = prices.len(),
            rsi = snapshot.rsi,
            trend = ?snapshot.trend,
            momentum = ?snapshot.momentum,
            position = ?snapshot.price_position,
            action = ?action.kind,
            "Evaluated accumulation signals"
        );

        Decision { action, snapshot }
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        "Accumulation"
    }
}

fn buy(
    fraction: f64,
    quote_balance: f64,
    base_order_amount: f64,
    confidence: f64,
    reason: &str,
) -> Action {
    let amount_quote = (fraction * quote_balance).min(fraction * base_order_amount);

    if amount_quote > 0.0 {
        Action {
            kind: ActionKind::Buy { amount_quote },
            reason: reason.to_string(),
            confidence,
        }
    } else {
        Action::hold(format!("{} but no quote balance to spend", reason))
    }
}

/// The priority ladder over an already classified snapshot
pub fn decide(
    snapshot: &SignalSnapshot,
    base_balance: f64,
    quote_balance: f64,
    base_order_amount: f64,
) -> Action {
    let oversold = snapshot.momentum == Momentum::Oversold;
    let below_sma = snapshot.price_position == PricePosition::BelowSma;

    if oversold && below_sma {
        return buy(0.30, quote_balance, base_order_amount, 0.9, "strong accumulation signal");
    }

    if oversold || below_sma {
        return buy(0.15, quote_balance, base_order_amount, 0.7, "moderate accumulation signal");
    }

    if snapshot.trend == Trend::Bullish && quote_balance > DCA_MIN_QUOTE_BALANCE {
        return buy(0.05, quote_balance, base_order_amount, 0.5, "DCA in uptrend");
    }

    if snapshot.momentum == Momentum::Overbought
        && snapshot.price_position == PricePosition::AboveSma
        && base_balance > PROFIT_TAKING_MIN_BASE_BALANCE
    {
        return Action {
            kind: ActionKind::Sell {
                amount_base: 0.20 * base_balance,
            },
            reason: "partial profit taking".to_string(),
            confidence: 0.6,
        };
    }

    Action::hold("no accumulation signal")
}
