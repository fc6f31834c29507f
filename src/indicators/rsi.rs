/// RSI reported when there is not enough history
pub const NEUTRAL_RSI: f64 = 50.0;

/// Default RSI lookback
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Calculate Relative Strength Index (RSI)
///
/// Uses the last `period` price deltas (so `period + 1` prices). Gains and
/// absolute losses are summed separately and averaged over `period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Returns [`NEUTRAL_RSI`] when fewer than `period + 1` prices exist, and 100
/// when the window has no losses at all.
pub fn calculate_rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return NEUTRAL_RSI;
    }

    let window = &prices[prices.len() - (period + 1)..];

    let (gains, losses) = window
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold((0.0_f64, 0.0_f64), |(gains, losses), change| {
            if change > 0.0 {
                (gains + change, losses)
            } else {
                (gains, losses + change.abs())
            }
        });

    if losses == 0.0 {
        return 100.0;
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    let rs = avg_gain / avg_loss;

    (100.0 - (100.0 / (1.0 + rs))).clamp(0.0, 100.0)
}
