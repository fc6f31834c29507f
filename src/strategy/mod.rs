// Trading strategy module
pub mod accumulation;
pub mod signals;

pub use accumulation::{decide, AccumulationStrategy, Decision};
pub use signals::{analyze, SignalConfig};
