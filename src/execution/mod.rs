// Price history, exchange rules, clock sync and the control loop
pub mod clock;
pub mod engine;
pub mod price_history;
pub mod trading_rules;

pub use clock::{ClockSync, CLOCK_SYNC_INTERVAL};
pub use engine::{CycleOutcome, EngineSettings, EngineStatus, TradingEngine};
pub use price_history::{PriceHistory, DEFAULT_HISTORY_CAPACITY};
pub use trading_rules::{quantize, rules_from_metadata, validate, TradingRulesResolver};
