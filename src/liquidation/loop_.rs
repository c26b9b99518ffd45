//! Background liquidation scan loop (spec.md §4.4).

use crate::concurrency::ShutdownSignal;
use crate::liquidation::clients::{AccountClient, PositionClient, PositionSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct PositionLiquidationTriggered {
    pub user_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub margin_level: Decimal,
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
}

pub struct LiquidationLoop {
    accounts: Arc<dyn AccountClient>,
    positions: Arc<dyn PositionClient>,
    tick_interval: Duration,
    mm_threshold: Decimal,
    on_trigger: Box<dyn Fn(PositionLiquidationTriggered) + Send + Sync>,
}

impl LiquidationLoop {
    pub fn new(
        accounts: Arc<dyn AccountClient>,
        positions: Arc<dyn PositionClient>,
        tick_interval: Duration,
        mm_threshold: Decimal,
        on_trigger: Box<dyn Fn(PositionLiquidationTriggered) + Send + Sync>,
    ) -> Self {
        Self { accounts, positions, tick_interval, mm_threshold, on_trigger }
    }

    /// Runs until `shutdown` is signaled; cancellation is observed at tick
    /// boundaries only, the in-flight scan always runs to completion.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if shutdown.is_triggered() {
                        info!("liquidation loop exiting at tick boundary");
                        return;
                    }
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "liquidation scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    if shutdown.is_triggered() {
                        info!("liquidation loop exiting on shutdown signal");
                        return;
                    }
                }
            }
        }
    }

    /// One full pass over every MARGIN account, paginated (spec.md §4.4).
    pub async fn scan_once(&self) -> anyhow::Result<()> {
        let mut page = 0u32;
        loop {
            let accounts = self.accounts.list_margin_accounts(page, DEFAULT_PAGE_SIZE).await?;
            if accounts.is_empty() {
                break;
            }
            for account in &accounts {
                if let Err(e) = self.assess_account(account).await {
                    warn!(account_id = %account.account_id, error = %e, "liquidation: account assessment failed, skipping");
                }
            }
            if accounts.len() < DEFAULT_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    async fn assess_account(&self, account: &crate::liquidation::clients::MarginAccount) -> anyhow::Result<()> {
        let positions = self.positions.list_positions(&account.account_id).await?;
        let used_margin: Decimal = positions.iter().map(|p| p.margin_requirement).sum();
        if used_margin == Decimal::ZERO {
            return Ok(());
        }
        let unrealized_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let equity = account.balance + unrealized_pnl;
        let margin_level = equity / used_margin;

        if margin_level < self.mm_threshold {
            let now = Utc::now();
            for position in &positions {
                (self.on_trigger)(PositionLiquidationTriggered {
                    user_id: account.user_id.clone(),
                    account_id: account.account_id.clone(),
                    symbol: position.symbol.clone(),
                    side: position.side,
                    quantity: position.quantity,
                    margin_level,
                    reason: "Margin Level below MM threshold".to_string(),
                    triggered_at: now,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown_channel;
    use crate::liquidation::clients::{MarginAccount, Position};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    struct OneAccountOnePosition;

    #[async_trait]
    impl AccountClient for OneAccountOnePosition {
        async fn list_margin_accounts(&self, page: u32, _page_size: u32) -> anyhow::Result<Vec<MarginAccount>> {
            if page > 0 {
                return Ok(vec![]);
            }
            Ok(vec![MarginAccount { account_id: "acc-m".into(), user_id: "user-m".into(), balance: dec!(1000) }])
        }
    }

    #[async_trait]
    impl PositionClient for OneAccountOnePosition {
        async fn list_positions(&self, _account_id: &str) -> anyhow::Result<Vec<Position>> {
            Ok(vec![Position {
                symbol: "BTC".into(),
                side: PositionSide::Long,
                quantity: dec!(1),
                margin_requirement: dec!(2000),
                unrealized_pnl: dec!(-900),
            }])
        }
    }

    /// S4 — liquidation trigger: margin_level = (1000 - 900) / 2000 = 0.05.
    #[tokio::test]
    async fn s4_liquidation_trigger() {
        let triggered = Arc::new(Mutex::new(Vec::new()));
        let triggered_clone = triggered.clone();

        let loop_ = LiquidationLoop::new(
            Arc::new(OneAccountOnePosition),
            Arc::new(OneAccountOnePosition),
            Duration::from_secs(10),
            dec!(1.10),
            Box::new(move |event| triggered_clone.lock().push(event)),
        );

        loop_.scan_once().await.unwrap();

        let events = triggered.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].margin_level, dec!(0.05));
        assert_eq!(events[0].symbol, "BTC");
    }

    #[tokio::test]
    async fn run_exits_promptly_on_shutdown() {
        struct Empty;
        #[async_trait]
        impl AccountClient for Empty {
            async fn list_margin_accounts(&self, _page: u32, _page_size: u32) -> anyhow::Result<Vec<MarginAccount>> {
                Ok(vec![])
            }
        }
        #[async_trait]
        impl PositionClient for Empty {
            async fn list_positions(&self, _account_id: &str) -> anyhow::Result<Vec<Position>> {
                Ok(vec![])
            }
        }

        let (handle, signal) = shutdown_channel();
        let loop_ = LiquidationLoop::new(Arc::new(Empty), Arc::new(Empty), Duration::from_millis(20), dec!(1.10), Box::new(|_| {}));

        let task = tokio::spawn(async move { loop_.run(signal).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.trigger();

        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
