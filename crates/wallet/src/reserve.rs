//! Custodial reserve manager
//!
//! Reserves are keyed by `(user, symbol, platform, protocol, address)` and
//! guarded by an advisory lock flag on `(user, symbol, platform, protocol)`.
//! The flag is taken with a compare-and-set in the store and fails fast
//! with [`WalletError::ReserveBusy`]; it never blocks.
//!
//! A key with no rows yet is vacant and has no flag to set, so locking it
//! succeeds without excluding anyone. Two first deposits racing on a new
//! key both proceed; each lands through the store's atomic reserve upsert,
//! which is what keeps their sum exact. Debits never run unlocked against
//! a vacant key: with no row there is nothing to debit and they fail with
//! [`WalletError::InsufficientReserve`].

use bigdecimal::{BigDecimal, Signed};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use common::{Direction, Platform, Protocol, Reserve, ReserveKey};
use observability::LedgerMetrics;
use storage::{LedgerStore, LedgerTx, LockOutcome, ReserveOutcome};

use crate::error::{Result, WalletError};

/// Custodial reserve amounts and their lock flags
#[derive(Clone)]
pub struct ReserveManager {
    store: Arc<dyn LedgerStore>,
    metrics: LedgerMetrics,
}

impl ReserveManager {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            metrics: LedgerMetrics::new(),
        }
    }

    /// Total reserve across users for one symbol on one platform/protocol
    pub async fn get_reserve(
        &self,
        symbol: &str,
        platform: Platform,
        protocol: Protocol,
    ) -> Result<BigDecimal> {
        Ok(self.store.reserve_total(symbol, platform, protocol).await?)
    }

    /// Per-address rows of one key
    pub async fn reserves(&self, key: &ReserveKey) -> Result<Vec<Reserve>> {
        Ok(self.store.reserves(key).await?)
    }

    /// Take the lock on `key`
    ///
    /// A key without rows is vacant; locking it succeeds so that the first
    /// deposit to a new address is not refused.
    pub async fn lock(&self, key: &ReserveKey) -> Result<()> {
        match self.store.lock_reserve(key).await? {
            LockOutcome::Acquired(rows) => {
                debug!(key = %key, rows, "Reserve locked");
                Ok(())
            }
            LockOutcome::Vacant => {
                debug!(key = %key, "Reserve key vacant, nothing to lock");
                Ok(())
            }
            LockOutcome::Busy => {
                self.metrics.record_reserve_busy();
                Err(WalletError::ReserveBusy(key.to_string()))
            }
        }
    }

    pub async fn unlock(&self, key: &ReserveKey) -> Result<()> {
        let rows = self.store.unlock_reserve(key).await?;
        debug!(key = %key, rows, "Reserve unlocked");
        Ok(())
    }

    /// Run `op` while holding the lock on `key`
    ///
    /// The lock is released whether `op` succeeds or fails. Deadlines belong
    /// on `op` itself: if this future is dropped mid-flight the flag stays
    /// set and must be cleared with [`ReserveManager::unlock`].
    pub async fn with_lock<T, E, F>(&self, key: &ReserveKey, op: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>> + Send,
        E: From<WalletError>,
    {
        self.lock(key).await?;
        let result = op.await;
        if let Err(e) = self.unlock(key).await {
            warn!(key = %key, error = %e, "Failed to release reserve lock");
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }

    /// Lock, adjust in a fresh transaction, unlock; returns the new value
    pub async fn adjust(
        &self,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
        direction: Direction,
    ) -> Result<BigDecimal> {
        self.with_lock(key, async {
            let mut tx = self.store.begin().await?;
            let value = self.adjust_in(tx.as_mut(), key, address, delta, direction).await?;
            tx.commit().await?;
            Ok::<_, WalletError>(value)
        })
        .await
    }

    /// Adjust inside a caller's transaction; the caller holds the lock
    pub async fn adjust_in(
        &self,
        tx: &mut dyn LedgerTx,
        key: &ReserveKey,
        address: &str,
        delta: &BigDecimal,
        direction: Direction,
    ) -> Result<BigDecimal> {
        if delta.is_negative() {
            return Err(WalletError::InvalidAmount(format!(
                "{} delta {} is negative",
                direction, delta
            )));
        }
        let signed = match direction {
            Direction::Credit => delta.clone(),
            Direction::Debit => -delta,
        };

        match tx.adjust_reserve(key, address, &signed).await? {
            ReserveOutcome::Applied(value) => {
                debug!(key = %key, address, %signed, %value, "Reserve adjusted");
                Ok(value)
            }
            ReserveOutcome::Insufficient => Err(WalletError::InsufficientReserve {
                key: key.to_string(),
                address: address.to_string(),
            }),
        }
    }
}
