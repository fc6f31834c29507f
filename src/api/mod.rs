pub mod binance;
pub mod paper;

pub use binance::{BinanceClient, BinanceConfig};
pub use paper::PaperGateway;

use crate::models::{Balance, OrderReceipt, Side};
use crate::Result;
use async_trait::async_trait;

/// One exchange filter relevant to order sizing
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolFilter {
    LotSize {
        min_qty: f64,
        max_qty: f64,
        step_size: f64,
    },
    /// `MIN_NOTIONAL` or `NOTIONAL`
    MinNotional { min_notional: f64 },
    Other(String),
}

/// Exchange metadata for one listed symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMetadata {
    pub symbol: String,
    pub base_asset_precision: u32,
    pub quote_precision: u32,
    pub filters: Vec<SymbolFilter>,
}

/// Everything the controller needs from an exchange
///
/// Every method may fail with [`crate::BotError::Gateway`]; the control loop
/// treats such failures as recoverable for the current cycle.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<f64>;

    async fn get_balance(&self, asset: &str) -> Result<Balance>;

    /// Balances for several assets, in the order asked
    ///
    /// Gateways that can read the whole account in one request should
    /// override this.
    async fn get_balances(&self, assets: &[&str]) -> Result<Vec<Balance>> {
        let mut balances = Vec::with_capacity(assets.len());
        for asset in assets {
            balances.push(self.get_balance(asset).await?);
        }
        Ok(balances)
    }

    async fn market_order(&self, symbol: &str, side: Side, quantity: f64)
        -> Result<OrderReceipt>;

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderReceipt>>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// `Ok(None)` when the exchange does not list `symbol`
    async fn get_exchange_metadata(&self, symbol: &str) -> Result<Option<SymbolMetadata>>;

    /// Exchange server time in epoch milliseconds
    async fn get_server_time(&self) -> Result<i64>;
}
