//! Balance ledger
//!
//! The only mutation primitive for available balances. Every adjustment is
//! a single conditional statement in the store, so concurrent credits and
//! debits on one `(user, symbol)` serialize without lost updates.

use bigdecimal::{BigDecimal, Signed};
use std::sync::Arc;
use tracing::debug;

use common::{Direction, UserId};
use observability::LedgerMetrics;
use storage::{DebitOutcome, LedgerStore, LedgerTx};

use crate::error::{Result, WalletError};

/// How `ensure_asset` treats an asset that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureMode {
    /// Existing asset is an error (explicit provisioning)
    Strict,
    /// Existing asset is a no-op (provisioning on first use)
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// Per-user, per-symbol available balances
#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn LedgerStore>,
    metrics: LedgerMetrics,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            metrics: LedgerMetrics::new(),
        }
    }

    /// Committed balance of an asset
    pub async fn get_balance(&self, user_id: UserId, symbol: &str) -> Result<BigDecimal> {
        self.store
            .balance(user_id, symbol)
            .await?
            .ok_or_else(|| WalletError::AssetNotFound {
                user_id,
                symbol: symbol.to_string(),
            })
    }

    /// Create the asset row in its own transaction
    pub async fn ensure_asset(
        &self,
        user_id: UserId,
        symbol: &str,
        mode: EnsureMode,
    ) -> Result<EnsureOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self.ensure_asset_in(tx.as_mut(), user_id, symbol, mode).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Create the asset row inside a caller's transaction
    pub async fn ensure_asset_in(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: UserId,
        symbol: &str,
        mode: EnsureMode,
    ) -> Result<EnsureOutcome> {
        if tx.ensure_asset(user_id, symbol).await? {
            debug!(user_id, symbol, "Asset created");
            return Ok(EnsureOutcome::Created);
        }
        match mode {
            EnsureMode::Lazy => Ok(EnsureOutcome::AlreadyExists),
            EnsureMode::Strict => Err(WalletError::AssetExists {
                user_id,
                symbol: symbol.to_string(),
            }),
        }
    }

    /// Apply one adjustment in its own transaction; returns the new balance
    pub async fn adjust(
        &self,
        user_id: UserId,
        symbol: &str,
        delta: &BigDecimal,
        direction: Direction,
    ) -> Result<BigDecimal> {
        let mut tx = self.store.begin().await?;
        let balance = self
            .adjust_in(tx.as_mut(), user_id, symbol, delta, direction)
            .await?;
        tx.commit().await?;
        self.committed(direction, 1);
        Ok(balance)
    }

    /// Count adjustments made through [`adjust_in`](Self::adjust_in) once
    /// the caller's transaction has committed
    pub fn committed(&self, direction: Direction, count: u64) {
        if count > 0 {
            self.metrics
                .record_balance_adjustments(direction.as_str(), count);
        }
    }

    /// Apply one adjustment inside a caller's transaction
    ///
    /// A failed debit leaves the balance untouched; the caller decides
    /// whether to roll back the rest of its transaction, and reports the
    /// adjustment through [`committed`](Self::committed) after commit.
    pub async fn adjust_in(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: UserId,
        symbol: &str,
        delta: &BigDecimal,
        direction: Direction,
    ) -> Result<BigDecimal> {
        if delta.is_negative() {
            return Err(WalletError::InvalidAmount(format!(
                "{} delta {} is negative",
                direction, delta
            )));
        }

        let balance = match direction {
            Direction::Credit => tx
                .credit_balance(user_id, symbol, delta)
                .await?
                .ok_or_else(|| WalletError::AssetNotFound {
                    user_id,
                    symbol: symbol.to_string(),
                })?,
            Direction::Debit => match tx.debit_balance(user_id, symbol, delta).await? {
                DebitOutcome::Applied(balance) => balance,
                DebitOutcome::Insufficient(available) => {
                    return Err(WalletError::InsufficientBalance {
                        user_id,
                        symbol: symbol.to_string(),
                        available,
                        requested: delta.clone(),
                    })
                }
                DebitOutcome::Missing => {
                    return Err(WalletError::AssetNotFound {
                        user_id,
                        symbol: symbol.to_string(),
                    })
                }
            },
        };

        debug!(user_id, symbol, %delta, %direction, %balance, "Balance adjusted");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::str::FromStr;
    use storage::InMemoryLedgerStore;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Arc::new(InMemoryLedgerStore::new()))
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_asset_modes() {
        let ledger = ledger();
        assert_eq!(
            ledger.ensure_asset(1, "btc", EnsureMode::Strict).await.unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(
            ledger.ensure_asset(1, "btc", EnsureMode::Lazy).await.unwrap(),
            EnsureOutcome::AlreadyExists
        );
        assert_matches!(
            ledger.ensure_asset(1, "btc", EnsureMode::Strict).await,
            Err(WalletError::AssetExists { .. })
        );
    }

    #[tokio::test]
    async fn test_overdraft_fails_and_leaves_balance() {
        let ledger = ledger();
        ledger.ensure_asset(1, "usdt", EnsureMode::Lazy).await.unwrap();
        ledger.adjust(1, "usdt", &dec("10"), Direction::Credit).await.unwrap();

        let err = ledger
            .adjust(1, "usdt", &dec("15"), Direction::Debit)
            .await
            .unwrap_err();
        assert_matches!(err, WalletError::InsufficientBalance { ref available, .. } if *available == dec("10"));
        assert_eq!(ledger.get_balance(1, "usdt").await.unwrap(), dec("10"));
    }

    #[tokio::test]
    async fn test_negative_delta_rejected() {
        let ledger = ledger();
        ledger.ensure_asset(1, "usdt", EnsureMode::Lazy).await.unwrap();
        assert_matches!(
            ledger.adjust(1, "usdt", &dec("-1"), Direction::Credit).await,
            Err(WalletError::InvalidAmount(_))
        );
    }

    #[tokio::test]
    async fn test_missing_asset() {
        let ledger = ledger();
        assert_matches!(
            ledger.adjust(9, "eth", &dec("1"), Direction::Credit).await,
            Err(WalletError::AssetNotFound { .. })
        );
        assert_matches!(
            ledger.get_balance(9, "eth").await,
            Err(WalletError::AssetNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_credit_debit_cycles_do_not_drift() {
        let ledger = ledger();
        ledger.ensure_asset(1, "btc", EnsureMode::Lazy).await.unwrap();
        ledger.adjust(1, "btc", &dec("1.1"), Direction::Credit).await.unwrap();

        let amount = dec("0.00000001");
        for _ in 0..10_000 {
            ledger.adjust(1, "btc", &amount, Direction::Credit).await.unwrap();
            ledger.adjust(1, "btc", &amount, Direction::Debit).await.unwrap();
        }

        assert_eq!(ledger.get_balance(1, "btc").await.unwrap(), dec("1.1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adjustments_sum() {
        let ledger = ledger();
        ledger.ensure_asset(1, "usdt", EnsureMode::Lazy).await.unwrap();
        ledger.adjust(1, "usdt", &dec("1000"), Direction::Credit).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let direction = if i % 2 == 0 { Direction::Credit } else { Direction::Debit };
                ledger.adjust(1, "usdt", &dec("2.5"), direction).await.unwrap();
                ledger.adjust(1, "usdt", &dec("0.5"), Direction::Credit).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 32 credits and 32 debits of 2.5 cancel out; 64 credits of 0.5 remain
        assert_eq!(ledger.get_balance(1, "usdt").await.unwrap(), dec("1032"));
    }

    #[test]
    fn test_only_committed_adjustments_are_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let store = Arc::new(InMemoryLedgerStore::new());
                let ledger = BalanceLedger::new(store.clone());
                ledger.ensure_asset(1, "usdt", EnsureMode::Lazy).await.unwrap();

                let mut tx = store.begin().await.unwrap();
                ledger
                    .adjust_in(tx.as_mut(), 1, "usdt", &dec("5"), Direction::Credit)
                    .await
                    .unwrap();
                tx.rollback().await.unwrap();

                ledger.adjust(1, "usdt", &dec("2"), Direction::Credit).await.unwrap();
            });
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"ledger_balance_adjustments_total{direction="credit"} 1"#),
            "{}",
            rendered
        );
    }
}
