use crate::api::{ExchangeGateway, SymbolFilter, SymbolMetadata};
use crate::models::{TradingRules, ValidationResult};
use crate::{BotError, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// How long fetched rules stay fresh
pub const RULES_CACHE_TTL: Duration = Duration::from_secs(300);

/// Quantities are rounded to this many decimals after stepping
pub const QUANTITY_DECIMALS: i32 = 8;

pub const ERR_BELOW_MIN_QTY: &str = "below minimum quantity";
pub const ERR_ROUNDS_TO_ZERO: &str = "quantity rounds to zero at this step size";

#[derive(Debug, Clone, Copy)]
struct CachedRules {
    rules: TradingRules,
    fetched_at: Instant,
}

/// Per-symbol cache of exchange trading rules
///
/// The map is held while a refresh is in flight, so concurrent callers for
/// the same resolver never fetch twice.
#[derive(Debug)]
pub struct TradingRulesResolver {
    cache: Mutex<HashMap<String, CachedRules>>,
    ttl: Duration,
}

impl TradingRulesResolver {
    pub fn new() -> Self {
        Self::with_ttl(RULES_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Rules for `symbol`, fetched from the exchange when missing or stale
    pub async fn get_rules<G>(&self, gateway: &G, symbol: &str) -> Result<TradingRules>
    where
        G: ExchangeGateway + ?Sized,
    {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(symbol) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.rules);
            }
        }

        let metadata = gateway
            .get_exchange_metadata(symbol)
            .await
            .map_err(|e| BotError::RulesUnavailable {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| BotError::RulesUnavailable {
                symbol: symbol.to_string(),
                reason: "symbol not listed on exchange".to_string(),
            })?;

        let rules = rules_from_metadata(&metadata)?;

        tracing::info!(
            %symbol,
            min_qty = rules.min_qty,
            max_qty = rules.max_qty,
            step_size = rules.step_size,
            min_notional = rules.min_notional,
            "Loaded trading rules"
        );

        cache.insert(
            symbol.to_string(),
            CachedRules {
                rules,
                fetched_at: Instant::now(),
            },
        );

        Ok(rules)
    }

    /// Last fetched rules for `symbol`, even if stale
    pub async fn last_known(&self, symbol: &str) -> Option<TradingRules> {
        self.cache.lock().await.get(symbol).map(|c| c.rules)
    }
}

impl Default for TradingRulesResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract lot-size and notional constraints from exchange metadata
///
/// A missing filter falls back to [`TradingRules::default`] values; metadata
/// with neither filter, or with inconsistent bounds, is unusable.
pub fn rules_from_metadata(metadata: &SymbolMetadata) -> Result<TradingRules> {
    let mut rules = TradingRules {
        base_asset_precision: metadata.base_asset_precision,
        quote_precision: metadata.quote_precision,
        ..TradingRules::default()
    };
    let mut usable = false;

    for filter in &metadata.filters {
        match *filter {
            SymbolFilter::LotSize {
                min_qty,
                max_qty,
                step_size,
            } => {
                rules.min_qty = min_qty;
                rules.max_qty = max_qty;
                rules.step_size = step_size;
                usable = true;
            }
            SymbolFilter::MinNotional { min_notional } => {
                rules.min_notional = min_notional;
                usable = true;
            }
            SymbolFilter::Other(_) => {}
        }
    }

    let unavailable = |reason: &str| BotError::RulesUnavailable {
        symbol: metadata.symbol.clone(),
        reason: reason.to_string(),
    };

    if !usable {
        return Err(unavailable("no lot size or notional filter"));
    }
    if !(rules.step_size > 0.0) {
        return Err(unavailable("step size must be positive"));
    }
    if rules.min_qty > rules.max_qty {
        return Err(unavailable("min quantity exceeds max quantity"));
    }

    Ok(rules)
}

fn round_to_decimals(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Whole steps in `ratio`, tolerating float error just below an integer
fn whole_steps(ratio: f64) -> f64 {
    let nearest = ratio.round();
    if (ratio - nearest).abs() <= 1e-9 * nearest.abs().max(1.0) {
        nearest
    } else {
        ratio.floor()
    }
}

/// Adjust a raw quantity down to a valid step multiple within the lot bounds
///
/// Returns 0 (never an error) when the quantity is below `min_qty` before or
/// after stepping. Callers must check for the zero sentinel.
pub fn quantize(raw_qty: f64, rules: &TradingRules) -> f64 {
    if !raw_qty.is_finite() || raw_qty < rules.min_qty {
        return 0.0;
    }

    let qty = raw_qty.min(rules.max_qty);
    let steps = whole_steps(qty / rules.step_size);
    let stepped = round_to_decimals(steps * rules.step_size, QUANTITY_DECIMALS);

    if stepped <= 0.0 || stepped < rules.min_qty {
        return 0.0;
    }
    stepped
}

/// Single gate every order passes before submission
pub fn validate(symbol: &str, qty: f64, price: f64, rules: &TradingRules) -> ValidationResult {
    if !qty.is_finite() || qty <= 0.0 {
        return ValidationResult::rejected("quantity must be positive");
    }
    if !price.is_finite() || price <= 0.0 {
        return ValidationResult::rejected("price must be positive");
    }
    if qty < rules.min_qty {
        tracing::debug!(%symbol, qty, min_qty = rules.min_qty, "Quantity below minimum");
        return ValidationResult::rejected(ERR_BELOW_MIN_QTY);
    }

    let adjusted = quantize(qty, rules);
    if adjusted == 0.0 {
        return ValidationResult::rejected(ERR_ROUNDS_TO_ZERO);
    }

    let notional = adjusted * price;
    if notional < rules.min_notional {
        return ValidationResult::rejected(format!(
            "order value {:.8} below minimum notional {} (short by {:.8})",
            notional,
            rules.min_notional,
            rules.min_notional - notional
        ));
    }

    ValidationResult::accepted(adjusted)
}
