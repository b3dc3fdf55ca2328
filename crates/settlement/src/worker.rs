//! Channel-driven ledger worker
//!
//! Matches and chain events arrive on an mpsc channel. Each command runs on
//! its own task, at most `workers` at a time, and answers on a oneshot.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::{debug, info, warn};

use observability::LedgerMetrics;

use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::reconciler::TransactionReconciler;
use crate::types::{ChainEvent, ConfirmOutcome, IngestOutcome, Match, SettlementReport};
use crate::Result;

pub enum LedgerCommand {
    Settle {
        request: Box<Match>,
        reply: oneshot::Sender<Result<SettlementReport>>,
    },
    Ingest {
        event: Box<ChainEvent>,
        reply: oneshot::Sender<Result<IngestOutcome>>,
    },
    Confirm {
        hash: String,
        confirmations: i64,
        reply: oneshot::Sender<Result<ConfirmOutcome>>,
    },
}

impl LedgerCommand {
    fn name(&self) -> &'static str {
        match self {
            LedgerCommand::Settle { .. } => "settle",
            LedgerCommand::Ingest { .. } => "ingest",
            LedgerCommand::Confirm { .. } => "confirm",
        }
    }
}

/// Client side of the worker
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    pub async fn settle(&self, request: Match) -> Result<SettlementReport> {
        self.call(|reply| LedgerCommand::Settle {
            request: Box::new(request),
            reply,
        })
        .await
    }

    pub async fn ingest(&self, event: ChainEvent) -> Result<IngestOutcome> {
        self.call(|reply| LedgerCommand::Ingest {
            event: Box::new(event),
            reply,
        })
        .await
    }

    pub async fn confirm(&self, hash: impl Into<String>, confirmations: i64) -> Result<ConfirmOutcome> {
        let hash = hash.into();
        self.call(|reply| LedgerCommand::Confirm {
            hash,
            confirmations,
            reply,
        })
        .await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| SettlementError::WorkerUnavailable("command channel closed".to_string()))?;
        response
            .await
            .map_err(|_| SettlementError::WorkerUnavailable("command dropped".to_string()))?
    }
}

pub struct LedgerWorker {
    engine: SettlementEngine,
    reconciler: TransactionReconciler,
    receiver: mpsc::Receiver<LedgerCommand>,
    permits: Arc<Semaphore>,
    workers: usize,
    metrics: LedgerMetrics,
}

impl LedgerWorker {
    /// Build a worker and its handle; `capacity` bounds queued commands
    pub fn new(
        engine: SettlementEngine,
        reconciler: TransactionReconciler,
        workers: usize,
        capacity: usize,
    ) -> (Self, LedgerHandle) {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = Self {
            engine,
            reconciler,
            receiver,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            metrics: LedgerMetrics::new(),
        };
        (worker, LedgerHandle { sender })
    }

    /// Serve commands until shutdown is signalled or every handle is gone,
    /// then wait for in-flight commands to finish
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.workers, "Ledger worker started");

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    let Some(command) = command else {
                        debug!("All ledger handles dropped");
                        break;
                    };
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        break;
                    };
                    let engine = self.engine.clone();
                    let reconciler = self.reconciler.clone();
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        metrics.command_started();
                        dispatch(&engine, &reconciler, command).await;
                        metrics.command_finished();
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Ledger worker shutting down");
                        break;
                    }
                }
            }
        }

        let in_flight = u32::try_from(self.workers).unwrap_or(u32::MAX);
        if self.permits.acquire_many(in_flight).await.is_err() {
            warn!("Ledger worker stopped without draining in-flight commands");
        }
        info!("Ledger worker stopped");
    }
}

async fn dispatch(
    engine: &SettlementEngine,
    reconciler: &TransactionReconciler,
    command: LedgerCommand,
) {
    let name = command.name();
    let delivered = match command {
        LedgerCommand::Settle { request, reply } => reply.send(engine.settle(&request).await).is_ok(),
        LedgerCommand::Ingest { event, reply } => reply.send(reconciler.ingest(*event).await).is_ok(),
        LedgerCommand::Confirm {
            hash,
            confirmations,
            reply,
        } => reply
            .send(reconciler.confirm(&hash, confirmations).await)
            .is_ok(),
    };
    if !delivered {
        debug!(command = name, "Caller went away before the reply");
    }
}
