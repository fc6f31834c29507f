use super::{ExchangeGateway, SymbolMetadata};
use crate::models::{Balance, OrderReceipt, Side};
use crate::Result;
use async_trait::async_trait;

/// Dry-run gateway
///
/// Market data, balances and metadata come from the wrapped gateway; orders
/// are acknowledged locally as filled and never reach the exchange.
pub struct PaperGateway<G> {
    inner: G,
}

impl<G: ExchangeGateway> PaperGateway<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: ExchangeGateway> ExchangeGateway for PaperGateway<G> {
    async fn get_price(&self, symbol: &str) -> Result<f64> {
        self.inner.get_price(symbol).await
    }

    async fn get_balance(&self, asset: &str) -> Result<Balance> {
        self.inner.get_balance(asset).await
    }

    async fn get_balances(&self, assets: &[&str]) -> Result<Vec<Balance>> {
        self.inner.get_balances(assets).await
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<OrderReceipt> {
        let order_id = format!("paper-{}", uuid::Uuid::new_v4().simple());
        tracing::info!(%symbol, %side, quantity, %order_id, "📝 Paper order filled");

        Ok(OrderReceipt {
            order_id,
            client_order_id: None,
            symbol: symbol.to_string(),
            side,
            executed_qty: quantity,
            status: "FILLED".to_string(),
        })
    }

    async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderReceipt>> {
        // Paper orders fill immediately
        Ok(Vec::new())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        tracing::debug!(%symbol, %order_id, "Paper cancel ignored");
        Ok(())
    }

    async fn get_exchange_metadata(&self, symbol: &str) -> Result<Option<SymbolMetadata>> {
        self.inner.get_exchange_metadata(symbol).await
    }

    async fn get_server_time(&self) -> Result<i64> {
        self.inner.get_server_time().await
    }
}
