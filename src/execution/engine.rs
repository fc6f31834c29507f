use super::{validate, ClockSync, TradingRulesResolver};
use crate::api::ExchangeGateway;
use crate::models::{Action, ActionKind, OrderReceipt, PriceSample, Side, TradingRules};
use crate::strategy::{AccumulationStrategy, Decision};
use crate::{BotError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Immutable per-instance settings of the control loop
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Quote-currency units
    pub base_order_amount: f64,
    /// Base-asset units; 0 disables the target
    pub accumulation_target: f64,
    pub cycle_interval: Duration,
    pub cancel_on_stop: bool,
}

/// What a single cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Engine is stopped
    Inactive,
    /// Another cycle still holds the engine
    InFlight,
    Held { reason: String },
    Rejected { errors: Vec<String> },
    /// Stop was requested while the cycle was running
    Discarded,
    Submitted(OrderReceipt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub active: bool,
    pub symbol: String,
    pub rules: Option<TradingRules>,
    pub cycles_run: u64,
    pub orders_submitted: u64,
    pub last_action: Option<Action>,
}

#[derive(Debug, Default)]
struct EngineState {
    last_action: Option<Action>,
}

#[derive(Default)]
struct LoopControl {
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct EngineInner<G> {
    gateway: Arc<G>,
    clock: Arc<ClockSync>,
    rules: TradingRulesResolver,
    settings: EngineSettings,
    /// Held for the whole cycle, doubles as the overlap guard
    strategy: Mutex<AccumulationStrategy>,
    state: Mutex<EngineState>,
    active: AtomicBool,
    /// Bumped on every stop; a cycle only submits under the run it started in
    run_id: AtomicU64,
    cycles_run: AtomicU64,
    orders_submitted: AtomicU64,
}

/// Periodic accumulation controller for one symbol
///
/// `Idle -> Running` on [`start`](Self::start), which loads trading rules
/// once and fails if they cannot be loaded. `Running -> Idle` on
/// [`stop`](Self::stop). While running, one cycle per interval pulls price
/// and balances, asks the strategy for an action, validates it against the
/// exchange rules and submits a market order. Errors inside a cycle are
/// logged and never stop the loop.
pub struct TradingEngine<G> {
    inner: Arc<EngineInner<G>>,
    control: Mutex<LoopControl>,
}

impl<G> TradingEngine<G>
where
    G: ExchangeGateway + 'static,
{
    pub fn new(gateway: Arc<G>, clock: Arc<ClockSync>, settings: EngineSettings) -> Self {
        Self::with_strategy(
            gateway,
            clock,
            AccumulationStrategy::new(settings.base_order_amount),
            settings,
        )
    }

    pub fn with_strategy(
        gateway: Arc<G>,
        clock: Arc<ClockSync>,
        strategy: AccumulationStrategy,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                gateway,
                clock,
                rules: TradingRulesResolver::new(),
                settings,
                strategy: Mutex::new(strategy),
                state: Mutex::new(EngineState::default()),
                active: AtomicBool::new(false),
                run_id: AtomicU64::new(0),
                cycles_run: AtomicU64::new(0),
                orders_submitted: AtomicU64::new(0),
            }),
            control: Mutex::new(LoopControl::default()),
        }
    }

    /// Load trading rules and start the periodic loop
    ///
    /// Starting an already running engine is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.inner.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let inner = &self.inner;
        let symbol = &inner.settings.symbol;

        if let Err(e) = inner.clock.sync(inner.gateway.as_ref()).await {
            tracing::warn!(%symbol, error = %e, "Clock sync failed, signing with stale offset");
        }

        inner.rules.get_rules(inner.gateway.as_ref(), symbol).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        inner.active.store(true, Ordering::SeqCst);

        tracing::info!(
            %symbol,
            interval_secs = inner.settings.cycle_interval.as_secs_f64(),
            base_order_amount = inner.settings.base_order_amount,
            accumulation_target = inner.settings.accumulation_target,
            "🚀 Accumulation engine started"
        );

        control.task = Some(tokio::spawn(run_loop(inner.clone(), stop_rx)));
        control.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Stop the loop; idempotent
    ///
    /// No cycle starts after this returns and a cycle still in flight will
    /// not submit its order.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let was_active = self.inner.active.swap(false, Ordering::SeqCst);
        self.inner.run_id.fetch_add(1, Ordering::SeqCst);

        if let Some(stop_tx) = control.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if !was_active {
            return;
        }

        tracing::info!(symbol = %self.inner.settings.symbol, "🛑 Accumulation engine stopped");

        if self.inner.settings.cancel_on_stop {
            match self.cancel_open_orders().await {
                Ok(cancelled) if cancelled > 0 => {
                    tracing::info!(cancelled, "Cancelled open orders on stop")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to cancel open orders on stop"),
            }
        }
    }

    /// Wait for the loop task to exit after [`stop`](Self::stop)
    ///
    /// A cycle in flight at stop time finishes first.
    pub async fn join(&self) {
        let task = self.control.lock().await.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Control loop task failed");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> EngineStatus {
        let rules = self.inner.rules.last_known(&self.inner.settings.symbol).await;
        let state = self.inner.state.lock().await;
        EngineStatus {
            active: self.is_active(),
            symbol: self.inner.settings.symbol.clone(),
            rules,
            cycles_run: self.inner.cycles_run.load(Ordering::SeqCst),
            orders_submitted: self.inner.orders_submitted.load(Ordering::SeqCst),
            last_action: state.last_action.clone(),
        }
    }

    /// Run one cycle now, outside the timer
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.inner.run_cycle().await
    }

    pub async fn open_orders(&self) -> Result<Vec<OrderReceipt>> {
        self.inner
            .gateway
            .get_open_orders(Some(&self.inner.settings.symbol))
            .await
    }

    /// Cancel every open order for the symbol, returning how many were cancelled
    pub async fn cancel_open_orders(&self) -> Result<usize> {
        let symbol = &self.inner.settings.symbol;
        let orders = self.open_orders().await?;
        let mut cancelled = 0;

        for order in &orders {
            match self.inner.gateway.cancel_order(symbol, &order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => {
                    tracing::warn!(%symbol, order_id = %order.order_id, error = %e, "Cancel failed")
                }
            }
        }

        Ok(cancelled)
    }
}

async fn run_loop<G>(inner: Arc<EngineInner<G>>, mut stop_rx: watch::Receiver<bool>)
where
    G: ExchangeGateway + 'static,
{
    let period = inner.settings.cycle_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let cycle_inner = inner.clone();
                // Separate task so a panic is contained to this cycle
                let result = tokio::spawn(async move { cycle_inner.run_cycle().await }).await;

                match result {
                    Ok(Ok(outcome)) => {
                        tracing::debug!(outcome = ?outcome, "Cycle finished");
                    }
                    Ok(Err(e)) => {
                        tracing::error!(symbol = %inner.settings.symbol, error = %e, "Cycle failed");
                    }
                    Err(e) => {
                        tracing::error!(symbol = %inner.settings.symbol, error = %e, "Cycle panicked");
                    }
                }
            }
        }
    }

    tracing::debug!(symbol = %inner.settings.symbol, "Control loop exited");
}

impl<G> EngineInner<G>
where
    G: ExchangeGateway,
{
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Current rules, falling back to the last known ones on refresh failure
    async fn current_rules(&self) -> Result<TradingRules> {
        let symbol = &self.settings.symbol;

        let error = match self.rules.get_rules(self.gateway.as_ref(), symbol).await {
            Ok(rules) => return Ok(rules),
            Err(e) => e,
        };

        match self.rules.last_known(symbol).await {
            Some(rules) => {
                tracing::warn!(%symbol, error = %error, "Rules refresh failed, using last known rules");
                Ok(rules)
            }
            None => Err(error),
        }
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let run_id = self.run_id.load(Ordering::SeqCst);
        if !self.is_active() {
            return Ok(CycleOutcome::Inactive);
        }

        let Ok(mut strategy) = self.strategy.try_lock() else {
            tracing::warn!(symbol = %self.settings.symbol, "Previous cycle still in flight, skipping tick");
            return Ok(CycleOutcome::InFlight);
        };

        self.cycles_run.fetch_add(1, Ordering::SeqCst);
        let settings = &self.settings;
        let symbol = &settings.symbol;

        if let Err(e) = self.clock.sync(self.gateway.as_ref()).await {
            tracing::warn!(%symbol, error = %e, "Clock sync failed, continuing with stale offset");
        }

        let rules = self.current_rules().await?;

        let assets = [settings.base_asset.as_str(), settings.quote_asset.as_str()];
        let (price, balances) = tokio::try_join!(
            self.gateway.get_price(symbol),
            self.gateway.get_balances(&assets),
        )?;
        let (base, quote) = match balances.as_slice() {
            [base, quote] => (*base, *quote),
            other => {
                return Err(BotError::Gateway(format!(
                    "expected 2 balances, got {}",
                    other.len()
                )))
            }
        };

        let Decision { mut action, snapshot } =
            strategy.evaluate(PriceSample::now(price), base.free, quote.free);

        let target = settings.accumulation_target;
        let progress_pct = if target > 0.0 {
            base.free / target * 100.0
        } else {
            0.0
        };

        if target > 0.0 && base.free >= target && matches!(action.kind, ActionKind::Buy { .. }) {
            action = Action::hold(format!("accumulation target reached ({})", action.reason));
        }

        tracing::info!(
            %symbol,
            price,
            base_free = base.free,
            quote_free = quote.free,
            sma_short = ?snapshot.sma_short,
            sma_long = ?snapshot.sma_long,
            rsi = %format!("{:.2}", snapshot.rsi),
            trend = ?snapshot.trend,
            momentum = ?snapshot.momentum,
            position = ?snapshot.price_position,
            progress = %format!("{:.2}%", progress_pct),
            "💹 Cycle snapshot"
        );

        self.state.lock().await.last_action = Some(action.clone());

        let (side, proposed) = match action.kind {
            ActionKind::None => {
                tracing::info!(%symbol, reason = %action.reason, "→ Holding");
                return Ok(CycleOutcome::Held {
                    reason: action.reason,
                });
            }
            ActionKind::Buy { amount_quote } => (Side::Buy, amount_quote),
            ActionKind::Sell { amount_base } => (Side::Sell, amount_base),
        };

        // Price may have moved since the decision was made
        let live_price = self.gateway.get_price(symbol).await?;
        let quantity = match side {
            Side::Buy => proposed / live_price,
            Side::Sell => proposed,
        };

        let validation = validate(symbol, quantity, live_price, &rules);
        if !validation.valid {
            let rejected = BotError::ValidationRejected {
                errors: validation.errors.clone(),
            };
            tracing::warn!(
                %symbol,
                %side,
                quantity,
                reason = %action.reason,
                error = %rejected,
                "→ Skipping order this cycle"
            );
            return Ok(CycleOutcome::Rejected {
                errors: validation.errors,
            });
        }

        // A stop, even one followed by a restart, voids this cycle's decision
        if !self.is_active() || self.run_id.load(Ordering::SeqCst) != run_id {
            tracing::info!(%symbol, %side, "Stop requested mid-cycle, discarding order");
            return Ok(CycleOutcome::Discarded);
        }

        let receipt = self
            .gateway
            .market_order(symbol, side, validation.adjusted_quantity)
            .await?;
        self.orders_submitted.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            %symbol,
            %side,
            quantity = validation.adjusted_quantity,
            executed = receipt.executed_qty,
            order_id = %receipt.order_id,
            status = %receipt.status,
            confidence = action.confidence,
            reason = %action.reason,
            "✅ Order submitted"
        );

        Ok(CycleOutcome::Submitted(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SymbolFilter, SymbolMetadata};
    use crate::models::Balance;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    struct MockGateway {
        price: StdMutex<f64>,
        base_free: StdMutex<f64>,
        quote_free: StdMutex<f64>,
        metadata: Option<SymbolMetadata>,
        price_delay: StdMutex<Duration>,
        fail_prices: AtomicBool,
        fail_metadata: AtomicBool,
        panic_on_price: AtomicBool,
        orders: StdMutex<Vec<(Side, f64)>>,
        open_orders: StdMutex<Vec<OrderReceipt>>,
        cancelled: StdMutex<Vec<String>>,
        price_calls: AtomicUsize,
    }

    impl MockGateway {
        fn new(min_notional: f64) -> Self {
            Self {
                price: StdMutex::new(1.0),
                base_free: StdMutex::new(0.0),
                quote_free: StdMutex::new(1000.0),
                metadata: Some(SymbolMetadata {
                    symbol: "DOGEUSDT".to_string(),
                    base_asset_precision: 8,
                    quote_precision: 8,
                    filters: vec![
                        SymbolFilter::LotSize {
                            min_qty: 0.01,
                            max_qty: 100_000.0,
                            step_size: 0.01,
                        },
                        SymbolFilter::MinNotional { min_notional },
                    ],
                }),
                price_delay: StdMutex::new(Duration::ZERO),
                fail_prices: AtomicBool::new(false),
                fail_metadata: AtomicBool::new(false),
                panic_on_price: AtomicBool::new(false),
                orders: StdMutex::new(Vec::new()),
                open_orders: StdMutex::new(Vec::new()),
                cancelled: StdMutex::new(Vec::new()),
                price_calls: AtomicUsize::new(0),
            }
        }

        fn unlisted() -> Self {
            Self {
                metadata: None,
                ..Self::new(10.0)
            }
        }

        fn set_price(&self, price: f64) {
            *self.price.lock().unwrap() = price;
        }

        fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn get_price(&self, _symbol: &str) -> Result<f64> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.price_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.panic_on_price.load(Ordering::SeqCst) {
                panic!("price feed exploded");
            }
            if self.fail_prices.load(Ordering::SeqCst) {
                return Err(BotError::Gateway("503 Service Unavailable".to_string()));
            }
            Ok(*self.price.lock().unwrap())
        }

        async fn get_balance(&self, asset: &str) -> Result<Balance> {
            let free = match asset {
                "DOGE" => *self.base_free.lock().unwrap(),
                _ => *self.quote_free.lock().unwrap(),
            };
            Ok(Balance { free, locked: 0.0 })
        }

        async fn market_order(
            &self,
            symbol: &str,
            side: Side,
            quantity: f64,
        ) -> Result<OrderReceipt> {
            let mut orders = self.orders.lock().unwrap();
            orders.push((side, quantity));
            Ok(OrderReceipt {
                order_id: orders.len().to_string(),
                client_order_id: None,
                symbol: symbol.to_string(),
                side,
                executed_qty: quantity,
                status: "FILLED".to_string(),
            })
        }

        async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderReceipt>> {
            Ok(self.open_orders.lock().unwrap().clone())
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn get_exchange_metadata(&self, _symbol: &str) -> Result<Option<SymbolMetadata>> {
            if self.fail_metadata.load(Ordering::SeqCst) {
                return Err(BotError::Gateway("exchangeInfo timed out".to_string()));
            }
            Ok(self.metadata.clone())
        }

        async fn get_server_time(&self) -> Result<i64> {
            Ok(chrono::Utc::now().timestamp_millis())
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            symbol: "DOGEUSDT".to_string(),
            base_asset: "DOGE".to_string(),
            quote_asset: "USDT".to_string(),
            base_order_amount: 1000.0,
            accumulation_target: 10_000.0,
            cycle_interval: Duration::from_secs(10),
            cancel_on_stop: false,
        }
    }

    fn engine_with(gateway: Arc<MockGateway>, settings: EngineSettings) -> TradingEngine<MockGateway> {
        TradingEngine::new(gateway, Arc::new(ClockSync::new()), settings)
    }

    /// 19 flat cycles followed by a 10% drop
    async fn drive_to_sharp_drop(engine: &TradingEngine<MockGateway>, gateway: &MockGateway) -> CycleOutcome {
        for _ in 0..19 {
            let outcome = engine.run_cycle().await.unwrap();
            assert!(matches!(outcome, CycleOutcome::Held { .. }), "{:?}", outcome);
        }
        gateway.set_price(0.90);
        engine.run_cycle().await.unwrap()
    }

    #[tokio::test]
    async fn test_start_fails_without_rules() {
        let gateway = Arc::new(MockGateway::unlisted());
        let engine = engine_with(gateway, settings());

        let result = engine.start().await;

        assert!(matches!(result, Err(BotError::RulesUnavailable { .. })));
        assert!(!engine.is_active());
        assert!(engine.status().await.rules.is_none());
    }

    #[tokio::test]
    async fn test_cycle_when_idle_does_nothing() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::Inactive);
        assert_eq!(gateway.price_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sharp_drop_submits_quantized_buy() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        let outcome = drive_to_sharp_drop(&engine, &gateway).await;

        // Strong tier: min(0.30 * 1000, 0.30 * 1000) = 300 USDT at 0.90
        match outcome {
            CycleOutcome::Submitted(receipt) => {
                assert_eq!(receipt.side, Side::Buy);
                assert_eq!(receipt.executed_qty, 333.33);
            }
            other => panic!("expected submission, got {:?}", other),
        }

        let status = engine.status().await;
        assert_eq!(status.cycles_run, 20);
        assert_eq!(status.orders_submitted, 1);
        assert_eq!(status.last_action.unwrap().confidence, 0.9);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_validation_failure_skips_order() {
        let gateway = Arc::new(MockGateway::new(10_000.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        let outcome = drive_to_sharp_drop(&engine, &gateway).await;

        match outcome {
            CycleOutcome::Rejected { errors } => {
                assert!(errors[0].contains("minimum notional"))
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(gateway.order_count(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_target_reached_suppresses_buy() {
        let gateway = Arc::new(MockGateway::new(10.0));
        *gateway.base_free.lock().unwrap() = 50.0;
        let engine = engine_with(
            gateway.clone(),
            EngineSettings {
                accumulation_target: 50.0,
                ..settings()
            },
        );
        engine.start().await.unwrap();

        let outcome = drive_to_sharp_drop(&engine, &gateway).await;

        match outcome {
            CycleOutcome::Held { reason } => assert!(reason.contains("target reached")),
            other => panic!("expected hold, got {:?}", other),
        }
        assert_eq!(gateway.order_count(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_gateway_error_is_returned_from_cycle() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        gateway.fail_prices.store(true, Ordering::SeqCst);
        let result = engine.run_cycle().await;

        assert!(matches!(result, Err(BotError::Gateway(_))));
        assert!(engine.is_active());
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cycle_is_skipped() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = Arc::new(engine_with(gateway.clone(), settings()));
        engine.start().await.unwrap();
        *gateway.price_delay.lock().unwrap() = Duration::from_secs(5);

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::InFlight);
        assert!(matches!(
            first.await.unwrap().unwrap(),
            CycleOutcome::Held { .. }
        ));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_discards_order() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = Arc::new(engine_with(gateway.clone(), settings()));
        engine.start().await.unwrap();

        for _ in 0..19 {
            engine.run_cycle().await.unwrap();
        }
        gateway.set_price(0.90);
        *gateway.price_delay.lock().unwrap() = Duration::from_secs(5);

        let cycle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cycle().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.stop().await;

        assert_eq!(cycle.await.unwrap().unwrap(), CycleOutcome::Discarded);
        assert_eq!(gateway.order_count(), 0);
        assert_eq!(engine.status().await.orders_submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_loop_runs_and_stops() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        let cycles_while_running = engine.status().await.cycles_run;
        assert_eq!(cycles_while_running, 3);

        engine.stop().await;
        engine.join().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let status = engine.status().await;
        assert!(!status.active);
        assert_eq!(status.cycles_run, cycles_while_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failing_cycles() {
        let gateway = Arc::new(MockGateway::new(10.0));
        gateway.fail_prices.store(true, Ordering::SeqCst);
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        gateway.fail_prices.store(false, Ordering::SeqCst);
        gateway.panic_on_price.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        gateway.panic_on_price.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let status = engine.status().await;
        assert!(status.active);
        assert_eq!(status.cycles_run, 4);
        assert!(matches!(
            status.last_action.map(|a| a.kind),
            Some(ActionKind::None)
        ));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_slow_loop_cycle_sends_nothing() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        for _ in 0..19 {
            engine.run_cycle().await.unwrap();
        }
        gateway.set_price(0.90);
        *gateway.price_delay.lock().unwrap() = Duration::from_secs(8);

        // First timer tick fires at 10s and blocks on the slow price feed
        tokio::time::sleep(Duration::from_secs(12)).await;
        engine.stop().await;
        engine.join().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_revive_stale_cycle() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        for _ in 0..19 {
            engine.run_cycle().await.unwrap();
        }
        gateway.set_price(0.90);
        *gateway.price_delay.lock().unwrap() = Duration::from_secs(5);

        // Tick at 10s starts a cycle that decides to buy at 15s and submits at 20s
        tokio::time::sleep(Duration::from_secs(11)).await;
        engine.stop().await;
        engine.start().await.unwrap();
        assert!(engine.is_active());

        // The new loop's first cycle cannot submit before 31s
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(gateway.order_count(), 0);
        assert_eq!(engine.status().await.orders_submitted, 0);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rules_refresh_failure_uses_last_known_rules() {
        let gateway = Arc::new(MockGateway::new(10.0));
        let engine = engine_with(gateway.clone(), settings());
        engine.start().await.unwrap();

        gateway.fail_metadata.store(true, Ordering::SeqCst);
        // Past the 300s rules TTL, clear of the 10s tick boundaries
        tokio::time::sleep(Duration::from_secs(405)).await;

        let outcome = engine.run_cycle().await;

        assert!(matches!(outcome, Ok(CycleOutcome::Held { .. })), "{:?}", outcome);
        let status = engine.status().await;
        assert!(status.active);
        assert_eq!(status.rules.unwrap().step_size, 0.01);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_cancels_open_orders() {
        let gateway = Arc::new(MockGateway::new(10.0));
        gateway.open_orders.lock().unwrap().push(OrderReceipt {
            order_id: "77".to_string(),
            client_order_id: None,
            symbol: "DOGEUSDT".to_string(),
            side: Side::Buy,
            executed_qty: 0.0,
            status: "NEW".to_string(),
        });
        let engine = engine_with(
            gateway.clone(),
            EngineSettings {
                cancel_on_stop: true,
                ..settings()
            },
        );
        engine.start().await.unwrap();

        engine.stop().await;
        engine.stop().await;

        assert!(!engine.is_active());
        assert_eq!(*gateway.cancelled.lock().unwrap(), vec!["77".to_string()]);
    }
}
