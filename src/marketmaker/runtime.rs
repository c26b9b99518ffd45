//! Per-symbol market-making task runtime (spec.md §4.6, §5).

use crate::concurrency::ShutdownSignal;
use crate::marketmaker::quote_strategy::{tick, PerformanceCounters, QuoteStrategy, StrategyStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[async_trait]
pub trait MidPriceClient: Send + Sync {
    async fn mid_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

#[async_trait]
pub trait OrderClient: Send + Sync {
    async fn place_order(&self, symbol: &str, side: crate::marketmaker::quote_strategy::MakerSide, price: Decimal, quantity: Decimal) -> anyhow::Result<()>;
}

struct RunningStrategy {
    status_tx: watch::Sender<QuoteStrategy>,
    handle: JoinHandle<()>,
}

/// Maps `symbol -> strategy state + cooperative task`. Starting an
/// already-running strategy is a no-op; pausing/stopping signals the task
/// to exit at its next tick (spec.md §4.6, §5).
pub struct MarketMakerRuntime {
    mid_price: Arc<dyn MidPriceClient>,
    orders: Arc<dyn OrderClient>,
    tick_interval: Duration,
    running: Mutex<HashMap<String, RunningStrategy>>,
    counters: Arc<Mutex<HashMap<String, PerformanceCounters>>>,
}

impl MarketMakerRuntime {
    pub fn new(mid_price: Arc<dyn MidPriceClient>, orders: Arc<dyn OrderClient>, tick_interval: Duration) -> Self {
        Self { mid_price, orders, tick_interval, running: Mutex::new(HashMap::new()), counters: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Sets the strategy for its symbol. ACTIVE starts the task if one
    /// isn't already running for that symbol; PAUSED/STOPPED lets a running
    /// task observe the new status and exit at its next tick.
    pub fn set_strategy(&self, strategy: QuoteStrategy, shutdown: ShutdownSignal) {
        let symbol = strategy.symbol.clone();
        let mut running = self.running.lock();
        if let Some(existing) = running.get(&symbol) {
            let _ = existing.status_tx.send(strategy);
            return;
        }
        if strategy.status != StrategyStatus::Active {
            return;
        }

        let (status_tx, status_rx) = watch::channel(strategy);
        let mid_price = self.mid_price.clone();
        let orders = self.orders.clone();
        let tick_interval = self.tick_interval;
        let counters = self.counters.clone();
        let symbol_for_task = symbol.clone();

        let handle = tokio::spawn(Self::run_symbol_loop(symbol_for_task, mid_price, orders, status_rx, tick_interval, counters, shutdown));
        running.insert(symbol, RunningStrategy { status_tx, handle });
    }

    pub fn get_status(&self, symbol: &str) -> Option<StrategyStatus> {
        self.running.lock().get(symbol).map(|r| r.status_tx.borrow().status)
    }

    pub fn get_performance(&self, symbol: &str) -> PerformanceCounters {
        self.counters.lock().get(symbol).cloned().unwrap_or_default()
    }

    async fn run_symbol_loop(
        symbol: String,
        mid_price: Arc<dyn MidPriceClient>,
        orders: Arc<dyn OrderClient>,
        mut status_rx: watch::Receiver<QuoteStrategy>,
        tick_interval: Duration,
        counters: Arc<Mutex<HashMap<String, PerformanceCounters>>>,
        mut shutdown: ShutdownSignal,
    ) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if shutdown.is_triggered() {
                        info!(symbol, "market-maker task exiting on shutdown");
                        return;
                    }
                    continue;
                }
            }

            let current = status_rx.borrow().clone();
            if current.status != StrategyStatus::Active {
                info!(symbol, "market-maker task exiting, strategy no longer ACTIVE");
                return;
            }

            let mid = match mid_price.mid_price(&symbol).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(symbol, error = %e, "market-maker: mid price fetch failed, skipping tick");
                    continue;
                }
            };

            if let Some(quotes) = tick(&current, mid) {
                for quote in quotes {
                    if let Err(e) = orders.place_order(&symbol, quote.side, quote.price, quote.quantity).await {
                        warn!(symbol, error = %e, "market-maker: order placement failed");
                    }
                }
                let mut c = counters.lock();
                let entry = c.entry(symbol.clone()).or_default();
                entry.ticks += 1;
                entry.quotes_placed += 2;
            }
        }
    }

    /// Aborts every running task; used on full-process shutdown.
    pub fn abort_all(&self) {
        let mut running = self.running.lock();
        for (_, strategy) in running.drain() {
            strategy.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown_channel;
    use crate::marketmaker::quote_strategy::MakerSide;
    use rust_decimal_macros::dec;

    struct FixedMid(Decimal);
    #[async_trait]
    impl MidPriceClient for FixedMid {
        async fn mid_price(&self, _symbol: &str) -> anyhow::Result<Decimal> {
            Ok(self.0)
        }
    }

    struct RecordingOrders(Arc<Mutex<Vec<(MakerSide, Decimal, Decimal)>>>);
    #[async_trait]
    impl OrderClient for RecordingOrders {
        async fn place_order(&self, _symbol: &str, side: MakerSide, price: Decimal, quantity: Decimal) -> anyhow::Result<()> {
            self.0.lock().push((side, price, quantity));
            Ok(())
        }
    }

    fn strategy(symbol: &str, status: StrategyStatus) -> QuoteStrategy {
        QuoteStrategy {
            id: "s1".into(),
            symbol: symbol.into(),
            spread: dec!(0.002),
            min_order_size: dec!(1),
            max_order_size: dec!(10),
            max_position: dec!(50),
            status,
        }
    }

    #[tokio::test]
    async fn starting_twice_does_not_spawn_a_second_task() {
        let orders_log = Arc::new(Mutex::new(Vec::new()));
        let runtime = MarketMakerRuntime::new(
            Arc::new(FixedMid(dec!(100))),
            Arc::new(RecordingOrders(orders_log.clone())),
            Duration::from_millis(20),
        );
        let (_handle, signal) = shutdown_channel();

        runtime.set_strategy(strategy("BTC", StrategyStatus::Active), signal.clone());
        assert_eq!(runtime.running.lock().len(), 1);
        runtime.set_strategy(strategy("BTC", StrategyStatus::Active), signal);
        assert_eq!(runtime.running.lock().len(), 1, "duplicate start must be a no-op");

        runtime.abort_all();
    }

    #[tokio::test]
    async fn pausing_stops_further_quoting() {
        let orders_log = Arc::new(Mutex::new(Vec::new()));
        let runtime = MarketMakerRuntime::new(
            Arc::new(FixedMid(dec!(100))),
            Arc::new(RecordingOrders(orders_log.clone())),
            Duration::from_millis(10),
        );
        let (_handle, signal) = shutdown_channel();
        runtime.set_strategy(strategy("ETH", StrategyStatus::Active), signal.clone());
        tokio::time::sleep(Duration::from_millis(35)).await;
        runtime.set_strategy(strategy("ETH", StrategyStatus::Paused), signal);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let count_after_pause = orders_log.lock().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orders_log.lock().len(), count_after_pause, "no more quotes after pausing");
        assert!(count_after_pause > 0, "should have quoted at least once while active");
    }
}
