// Technical indicators module
// SMA and RSI over a plain price slice

pub mod moving_average;
pub mod rsi;

pub use moving_average::calculate_sma;
pub use rsi::{calculate_rsi, DEFAULT_RSI_PERIOD, NEUTRAL_RSI};
