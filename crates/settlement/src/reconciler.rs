//! Chain transaction reconciler
//!
//! Per hash the ledger holds at most one transaction row:
//!
//! - first sighting inserts it as PENDING with a snapshot of the chain
//! - a later sighting of an INTERNAL row re-flags it as a DEPOSIT
//! - any other repeat is a no-op
//!
//! Confirmation moves PENDING to CONFIRMED and credits a deposit in the same
//! transaction that flips the status, so a replayed confirmation finds the
//! row already final and credits nothing.

use bigdecimal::Signed;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    Allocation, Assignment, ChainId, Direction, ReserveKey, Transaction, TransactionId,
    TxStatus,
};
use observability::LedgerMetrics;
use storage::LedgerStore;
use wallet::{BalanceLedger, EnsureMode, ReserveManager};

use crate::error::SettlementError;
use crate::registry::ChainTaskRegistry;
use crate::types::{BlockReport, ChainEvent, ConfirmOutcome, IngestOutcome};
use crate::Result;

/// Where `confirm` stands once the unlocked checks are done
enum ConfirmStep {
    Done(ConfirmOutcome),
    /// A deposit ready to finalize under the lock of its reserve key
    Locked(ReserveKey),
}

#[derive(Clone)]
pub struct TransactionReconciler {
    store: Arc<dyn LedgerStore>,
    balances: BalanceLedger,
    reserves: ReserveManager,
    registry: ChainTaskRegistry,
    operation_timeout: Duration,
    metrics: LedgerMetrics,
}

impl TransactionReconciler {
    pub fn new(store: Arc<dyn LedgerStore>, operation_timeout: Duration) -> Self {
        Self {
            balances: BalanceLedger::new(store.clone()),
            reserves: ReserveManager::new(store.clone()),
            store,
            registry: ChainTaskRegistry::new(),
            operation_timeout,
            metrics: LedgerMetrics::new(),
        }
    }

    pub fn registry(&self) -> &ChainTaskRegistry {
        &self.registry
    }

    /// Record a chain event, idempotently on its hash
    pub async fn ingest(&self, event: ChainEvent) -> Result<IngestOutcome> {
        let outcome = self.with_timeout(self.ingest_inner(event)).await;
        match &outcome {
            Ok(o) => self.metrics.record_chain_event(o.as_str()),
            Err(_) => self.metrics.record_chain_event("failed"),
        }
        outcome
    }

    /// Apply a confirmation count to a pending transaction
    ///
    /// A deposit is finalized under its reserve lock. The deadline covers
    /// the work inside the lock only, so the lock is released on timeout.
    pub async fn confirm(&self, hash: &str, confirmations: i64) -> Result<ConfirmOutcome> {
        match self.with_timeout(self.confirm_inner(hash, confirmations)).await? {
            ConfirmStep::Done(outcome) => Ok(outcome),
            ConfirmStep::Locked(key) => {
                self.reserves
                    .with_lock(&key, self.with_timeout(self.finalize(hash, confirmations)))
                    .await
            }
        }
    }

    /// Ingest every event of one block while holding the chain's task slot
    pub async fn ingest_block(
        &self,
        chain_id: ChainId,
        block: i64,
        events: Vec<ChainEvent>,
    ) -> Result<BlockReport> {
        let guard = self
            .registry
            .try_start(chain_id)
            .ok_or(SettlementError::ChainBusy(chain_id))?;

        if self.store.chain(chain_id).await?.is_none() {
            return Err(SettlementError::NotFound(format!("chain {}", chain_id)));
        }
        if let Some(stray) = events.iter().find(|e| e.chain_id != chain_id) {
            return Err(SettlementError::InvalidEvent(format!(
                "event for chain {} in a block of chain {}",
                stray.chain_id, chain_id
            )));
        }

        let mut report = BlockReport {
            chain_id,
            block,
            ..BlockReport::default()
        };
        for event in events {
            match self.ingest(event).await? {
                IngestOutcome::Created(_) => report.created += 1,
                IngestOutcome::Reflagged(_) => report.reflagged += 1,
                IngestOutcome::Duplicate { .. } => report.duplicates += 1,
            }
        }

        let mut tx = self.store.begin().await?;
        tx.set_chain_block(chain_id, block).await?;
        tx.commit().await?;
        guard.record_block(block);

        info!(
            chain_id,
            block,
            created = report.created,
            reflagged = report.reflagged,
            duplicates = report.duplicates,
            "Block ingested"
        );
        Ok(report)
    }

    pub async fn transaction(&self, hash: &str) -> Result<Option<Transaction>> {
        Ok(self.store.transaction(hash).await?)
    }

    /// Transactions spawned by `parent_id`
    pub async fn children(&self, parent_id: TransactionId) -> Result<Vec<Transaction>> {
        Ok(self.store.children(parent_id).await?)
    }

    async fn with_timeout<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| SettlementError::Timeout(self.operation_timeout))?
    }

    async fn ingest_inner(&self, event: ChainEvent) -> Result<IngestOutcome> {
        if event.value.is_negative() || event.fees.is_negative() {
            return Err(SettlementError::InvalidEvent(format!(
                "negative amount in event for {}",
                event.symbol
            )));
        }
        let hash = match event.hash.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ if event.allocation == Allocation::Internal => Uuid::new_v4().to_string(),
            _ => {
                return Err(SettlementError::InvalidEvent(
                    "external event without a hash".to_string(),
                ))
            }
        };

        let chain = self
            .store
            .chain(event.chain_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("chain {}", event.chain_id)))?;

        let mut tx = self.store.begin().await?;
        if let Some(mut existing) = tx.transaction_for_update(&hash).await? {
            let reflag = existing.allocation == Allocation::Internal
                && existing.status == TxStatus::Pending
                && existing.assignment != Assignment::Deposit;
            if !reflag {
                tx.rollback().await?;
                debug!(hash = %hash, "Duplicate chain event");
                return Ok(IngestOutcome::Duplicate { hash });
            }

            existing.assignment = Assignment::Deposit;
            existing.status = TxStatus::Pending;
            tx.update_transaction(&existing).await?;
            tx.commit().await?;
            info!(hash = %hash, id = existing.id, "Internal transfer re-flagged as deposit");
            return Ok(IngestOutcome::Reflagged(existing));
        }

        let transaction = Transaction {
            id: 0,
            hash: hash.clone(),
            symbol: event.symbol,
            value: event.value,
            fees: event.fees,
            confirmation: event.confirmations,
            to: event.to,
            block: event.block,
            chain_id: event.chain_id,
            user_id: event.user_id,
            assignment: event.assignment,
            tx_type: event.tx_type,
            platform: event.platform,
            protocol: event.protocol,
            allocation: event.allocation,
            parent: event.parent,
            status: TxStatus::Pending,
            chain: Some(chain.snapshot()),
            created_at: Utc::now(),
        };

        match tx.insert_transaction(&transaction).await? {
            Some(stored) => {
                tx.commit().await?;
                info!(
                    hash = %hash,
                    id = stored.id,
                    user_id = stored.user_id,
                    symbol = %stored.symbol,
                    value = %stored.value,
                    assignment = %stored.assignment,
                    "Chain transaction recorded"
                );
                Ok(IngestOutcome::Created(stored))
            }
            None => {
                tx.rollback().await?;
                debug!(hash = %hash, "Chain event recorded concurrently");
                Ok(IngestOutcome::Duplicate { hash })
            }
        }
    }

    async fn confirm_inner(&self, hash: &str, confirmations: i64) -> Result<ConfirmStep> {
        let snapshot = self
            .store
            .transaction(hash)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("transaction {}", hash)))?;
        if snapshot.status != TxStatus::Pending {
            return Ok(ConfirmStep::Done(ConfirmOutcome::AlreadyFinal(snapshot.status)));
        }

        let required = match &snapshot.chain {
            Some(chain) => chain.confirmation,
            None => {
                self.store
                    .chain(snapshot.chain_id)
                    .await?
                    .ok_or_else(|| {
                        SettlementError::NotFound(format!("chain {}", snapshot.chain_id))
                    })?
                    .confirmation
            }
        };

        if confirmations < required {
            let mut tx = self.store.begin().await?;
            let Some(mut current) = tx.transaction_for_update(hash).await? else {
                return Err(SettlementError::NotFound(format!("transaction {}", hash)));
            };
            if current.status != TxStatus::Pending {
                tx.rollback().await?;
                return Ok(ConfirmStep::Done(ConfirmOutcome::AlreadyFinal(current.status)));
            }
            current.confirmation = current.confirmation.max(confirmations);
            tx.update_transaction(&current).await?;
            tx.commit().await?;
            debug!(hash, confirmations, required, "Waiting for confirmations");
            return Ok(ConfirmStep::Done(ConfirmOutcome::Waiting {
                confirmations: current.confirmation,
                required,
            }));
        }

        if snapshot.assignment != Assignment::Deposit {
            let outcome = self.finalize(hash, confirmations).await?;
            return Ok(ConfirmStep::Done(outcome));
        }
        Ok(ConfirmStep::Locked(snapshot.reserve_key()))
    }

    /// PENDING → CONFIRMED; deposits credit balance and reserve in the same transaction
    async fn finalize(&self, hash: &str, confirmations: i64) -> Result<ConfirmOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut transaction) = tx.transaction_for_update(hash).await? else {
            return Err(SettlementError::NotFound(format!("transaction {}", hash)));
        };
        if transaction.status != TxStatus::Pending {
            tx.rollback().await?;
            return Ok(ConfirmOutcome::AlreadyFinal(transaction.status));
        }

        transaction.status = TxStatus::Confirmed;
        transaction.confirmation = transaction.confirmation.max(confirmations);
        tx.update_transaction(&transaction).await?;

        if transaction.assignment == Assignment::Deposit {
            let (user_id, symbol) = (transaction.user_id, transaction.symbol.as_str());
            self.balances
                .ensure_asset_in(tx.as_mut(), user_id, symbol, EnsureMode::Lazy)
                .await?;
            self.balances
                .adjust_in(tx.as_mut(), user_id, symbol, &transaction.value, Direction::Credit)
                .await?;
            self.reserves
                .adjust_in(
                    tx.as_mut(),
                    &transaction.reserve_key(),
                    &transaction.to,
                    &transaction.value,
                    Direction::Credit,
                )
                .await?;
        }
        tx.commit().await?;
        if transaction.assignment == Assignment::Deposit {
            self.balances.committed(Direction::Credit, 1);
        }

        info!(
            hash,
            id = transaction.id,
            user_id = transaction.user_id,
            symbol = %transaction.symbol,
            value = %transaction.value,
            assignment = %transaction.assignment,
            "Chain transaction confirmed"
        );
        Ok(ConfirmOutcome::Confirmed(transaction))
    }
}
