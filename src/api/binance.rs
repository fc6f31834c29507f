use super::{ExchangeGateway, SymbolFilter, SymbolMetadata};
use crate::execution::ClockSync;
use crate::models::{Balance, OrderReceipt, Side};
use crate::{BotError, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const REQUESTS_PER_SECOND: u32 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const QUANTITY_DECIMALS: u32 = 8;
/// Binance error code for an unknown symbol
const INVALID_SYMBOL_CODE: i64 = -1121;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub recv_window_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_BASE.to_string(),
            api_key: String::new(),
            secret_key: String::new(),
            recv_window_ms: 5_000,
        }
    }
}

/// Spot REST client for Binance-compatible exchanges
///
/// Signed requests are stamped with the shared [`ClockSync`] offset. All
/// clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    config: BinanceConfig,
    clock: Arc<ClockSync>,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    #[serde(default)]
    client_order_id: Option<String>,
    side: String,
    status: String,
    executed_qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset_precision: u32,
    quote_precision: u32,
    filters: Vec<serde_json::Value>, // Many filter shapes, only two matter
}

impl BinanceClient {
    pub fn new(config: BinanceConfig, clock: Arc<ClockSync>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let per_second = NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            config,
            clock,
            rate_limiter,
        })
    }

    pub fn clock(&self) -> &Arc<ClockSync> {
        &self.clock
    }

    /// Append timestamp and recvWindow, then sign the resulting query
    fn signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String> {
        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        params.push(("timestamp", self.clock.adjusted_now_millis().to_string()));

        let query = serde_urlencoded::to_string(&params)?;
        let signature = sign_query(&self.config.secret_key, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let query = serde_urlencoded::to_string(&params)?;
        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.config.base_url, endpoint, query)
        };

        self.rate_limiter.until_ready().await;
        let response = self.client.get(&url).send().await?;
        parse_response(response).await
    }

    async fn account(&self) -> Result<AccountInfo> {
        self.signed_request(Method::GET, "/api/v3/account", vec![]).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.config.base_url, endpoint, query);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;
        parse_response(response).await
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<f64> {
        let ticker: TickerPrice = self
            .public_get("/api/v3/ticker/price", vec![("symbol", symbol.to_string())])
            .await?;
        parse_f64(&ticker.price, "price")
    }

    async fn get_balance(&self, asset: &str) -> Result<Balance> {
        let account = self.account().await?;
        balance_of(&account, asset)
    }

    /// One signed account request for all `assets`
    async fn get_balances(&self, assets: &[&str]) -> Result<Vec<Balance>> {
        let account = self.account().await?;
        assets
            .iter()
            .map(|asset| balance_of(&account, asset))
            .collect()
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<OrderReceipt> {
        let client_order_id = uuid::Uuid::new_v4().simple().to_string();
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_quantity(quantity)?),
            ("newClientOrderId", client_order_id),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        tracing::info!(%symbol, %side, quantity, "Sending market order");

        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await?;
        into_receipt(response)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderReceipt>> {
        let params = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();

        let orders: Vec<OrderResponse> = self
            .signed_request(Method::GET, "/api/v3/openOrders", params)
            .await?;
        orders.into_iter().map(into_receipt).collect()
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let _: serde_json::Value = self
            .signed_request(Method::DELETE, "/api/v3/order", params)
            .await?;
        Ok(())
    }

    async fn get_exchange_metadata(&self, symbol: &str) -> Result<Option<SymbolMetadata>> {
        let info: ExchangeInfo = match self
            .public_get("/api/v3/exchangeInfo", vec![("symbol", symbol.to_string())])
            .await
        {
            Ok(info) => info,
            Err(BotError::Gateway(msg)) if msg.contains(&INVALID_SYMBOL_CODE.to_string()) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        Ok(info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .map(|s| SymbolMetadata {
                filters: s.filters.iter().map(parse_filter).collect(),
                symbol: s.symbol,
                base_asset_precision: s.base_asset_precision,
                quote_precision: s.quote_precision,
            }))
    }

    async fn get_server_time(&self) -> Result<i64> {
        let time: ServerTime = self.public_get("/api/v3/time", vec![]).await?;
        Ok(time.server_time)
    }
}

fn balance_of(account: &AccountInfo, asset: &str) -> Result<Balance> {
    // Assets never held are simply absent from the account listing
    match account.balances.iter().find(|b| b.asset == asset) {
        Some(balance) => Ok(Balance {
            free: parse_f64(&balance.free, "free")?,
            locked: parse_f64(&balance.locked, "locked")?,
        }),
        None => {
            tracing::debug!(asset, "Asset not present in account, assuming zero");
            Ok(Balance::default())
        }
    }
}

/// HMAC-SHA256 signature of a query string, hex encoded
pub fn sign_query(secret_key: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| BotError::Config(format!("invalid secret key: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Render a quantity as a plain decimal string with at most 8 decimals
///
/// Rounds to nearest rather than down: the binary value of an already
/// quantized quantity may sit just below its decimal form.
pub fn format_quantity(quantity: f64) -> Result<String> {
    let decimal = Decimal::from_f64_retain(quantity)
        .ok_or_else(|| BotError::Gateway(format!("unrepresentable quantity {}", quantity)))?;
    Ok(decimal
        .round_dp_with_strategy(QUANTITY_DECIMALS, RoundingStrategy::MidpointNearestEven)
        .normalize()
        .to_string())
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str(&body)?);
    }

    Err(match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => BotError::Gateway(format!(
            "{} (code {}): {}",
            status, api_error.code, api_error.msg
        )),
        Err(_) if status == StatusCode::TOO_MANY_REQUESTS => {
            BotError::Gateway("rate limited (429)".to_string())
        }
        Err(_) => BotError::Gateway(format!("{}: {}", status, body)),
    })
}

fn parse_f64(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| BotError::Gateway(format!("bad {} value {:?}: {}", field, raw, e)))
}

fn value_f64(filter: &serde_json::Value, field: &str) -> Option<f64> {
    match filter.get(field)? {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

fn parse_filter(filter: &serde_json::Value) -> SymbolFilter {
    let filter_type = filter
        .get("filterType")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let parsed = match filter_type {
        "LOT_SIZE" => value_f64(filter, "minQty").and_then(|min_qty| {
            Some(SymbolFilter::LotSize {
                min_qty,
                max_qty: value_f64(filter, "maxQty")?,
                step_size: value_f64(filter, "stepSize")?,
            })
        }),
        "MIN_NOTIONAL" | "NOTIONAL" => value_f64(filter, "minNotional")
            .map(|min_notional| SymbolFilter::MinNotional { min_notional }),
        _ => None,
    };

    parsed.unwrap_or_else(|| SymbolFilter::Other(filter_type.to_string()))
}

fn into_receipt(response: OrderResponse) -> Result<OrderReceipt> {
    let side = match response.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(BotError::Gateway(format!("unknown order side {}", other))),
    };

    Ok(OrderReceipt {
        order_id: response.order_id.to_string(),
        client_order_id: response.client_order_id,
        symbol: response.symbol,
        side,
        executed_qty: parse_f64(&response.executed_qty, "executedQty")?,
        status: response.status,
    })
}
