mod support;

use assert_matches::assert_matches;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use common::{Allocation, Assignment, Platform, Protocol, ReserveKey, TxStatus};
use settlement::{ChainEvent, ConfirmOutcome, IngestOutcome, SettlementError};
use storage::LedgerStore;
use support::{dec, ledger, stalling_ledger, TRON};
use wallet::ReserveManager;

const ADDRESS: &str = "TXq8ZbZ5pWyYyGv1tNfLrV3hHq7bXyYkZQ";

fn usdt_deposit(hash: &str, value: &str) -> ChainEvent {
    ChainEvent::deposit(
        hash,
        7,
        "usdt",
        dec(value),
        ADDRESS,
        TRON,
        Platform::Tron,
        Protocol::Trc20,
    )
}

fn usdt_key() -> ReserveKey {
    ReserveKey::new(7, "usdt", Platform::Tron, Protocol::Trc20)
}

#[tokio::test]
async fn test_deposit_is_credited_exactly_once() {
    let ledger = ledger().await;
    let reserves = ReserveManager::new(ledger.store.clone());

    let created = ledger.reconciler.ingest(usdt_deposit("0xd1", "25")).await.unwrap();
    let stored = assert_matches!(created, IngestOutcome::Created(tx) => tx);
    assert_eq!(stored.status, TxStatus::Pending);
    assert_matches!(
        ledger.reconciler.ingest(usdt_deposit("0xd1", "25")).await.unwrap(),
        IngestOutcome::Duplicate { hash } if hash == "0xd1"
    );
    assert_eq!(ledger.store.transaction_count().await, 1);

    let confirmed = ledger.reconciler.confirm("0xd1", 3).await.unwrap();
    let tx = assert_matches!(confirmed, ConfirmOutcome::Confirmed(tx) => tx);
    assert_eq!(tx.status, TxStatus::Confirmed);
    assert_eq!(
        ledger.reconciler.confirm("0xd1", 4).await.unwrap(),
        ConfirmOutcome::AlreadyFinal(TxStatus::Confirmed)
    );

    assert_eq!(ledger.balance(7, "usdt").await, dec("25"));
    assert_eq!(
        reserves
            .get_reserve("usdt", Platform::Tron, Protocol::Trc20)
            .await
            .unwrap(),
        dec("25")
    );
    let rows = reserves.reserves(&usdt_key()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address, ADDRESS);
    assert!(!rows[0].lock);
}

#[tokio::test]
async fn test_confirmation_below_threshold_waits() {
    let ledger = ledger().await;
    ledger.reconciler.ingest(usdt_deposit("0xd2", "10")).await.unwrap();

    assert_eq!(
        ledger.reconciler.confirm("0xd2", 1).await.unwrap(),
        ConfirmOutcome::Waiting {
            confirmations: 1,
            required: 3
        }
    );

    let row = ledger.reconciler.transaction("0xd2").await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Pending);
    assert_eq!(row.confirmation, 1);
    assert_eq!(ledger.balance(7, "usdt").await, dec("0"));
}

#[tokio::test]
async fn test_internal_transfer_is_reflagged_once() {
    let ledger = ledger().await;
    let mut sweep = usdt_deposit("0xi1", "40").internal();
    sweep.assignment = Assignment::Withdraw;
    ledger.reconciler.ingest(sweep).await.unwrap();

    let reflagged = ledger.reconciler.ingest(usdt_deposit("0xi1", "40")).await.unwrap();
    let tx = assert_matches!(reflagged, IngestOutcome::Reflagged(tx) => tx);
    assert_eq!(tx.assignment, Assignment::Deposit);
    assert_eq!(tx.status, TxStatus::Pending);
    assert_eq!(tx.allocation, Allocation::Internal);

    assert_matches!(
        ledger.reconciler.ingest(usdt_deposit("0xi1", "40")).await.unwrap(),
        IngestOutcome::Duplicate { .. }
    );
    assert_eq!(ledger.store.transaction_count().await, 1);
}

#[tokio::test]
async fn test_snapshot_hides_chain_endpoint() {
    let ledger = ledger().await;
    let created = ledger.reconciler.ingest(usdt_deposit("0xd3", "1")).await.unwrap();
    let tx = assert_matches!(created, IngestOutcome::Created(tx) => tx);

    assert_eq!(tx.chain_id, TRON);
    let json = serde_json::to_value(&tx.chain).unwrap();
    assert_eq!(json["confirmation"], 3);
    assert!(json.get("rpc").is_none());
    assert!(json.get("id").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sightings_record_one_row() {
    let ledger = ledger().await;
    let reconciler = Arc::new(ledger.reconciler.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let reconciler = reconciler.clone();
        tasks.push(tokio::spawn(async move {
            reconciler.ingest(usdt_deposit("0xrace", "5")).await
        }));
    }

    let mut created = 0;
    for outcome in join_all(tasks).await {
        match outcome.unwrap().unwrap() {
            IngestOutcome::Created(_) => created += 1,
            outcome => assert_matches!(outcome, IngestOutcome::Duplicate { .. }),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(ledger.store.transaction_count().await, 1);
}

#[tokio::test]
async fn test_block_ingestion_advances_the_chain() {
    let ledger = ledger().await;
    ledger.reconciler.ingest(usdt_deposit("0xb1", "1")).await.unwrap();

    let events = vec![
        usdt_deposit("0xb1", "1"),
        usdt_deposit("0xb2", "2"),
        usdt_deposit("0xb3", "3"),
    ];
    let report = ledger.reconciler.ingest_block(TRON, 101, events).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.reflagged, 0);

    assert_eq!(ledger.store.chain(TRON).await.unwrap().unwrap().block, 101);
    assert!(ledger.reconciler.registry().snapshot().is_empty());
    assert!(!ledger.reconciler.registry().is_running(TRON));
}

#[tokio::test]
async fn test_block_rejects_events_of_another_chain() {
    let ledger = ledger().await;
    let mut stray = usdt_deposit("0xs1", "1");
    stray.chain_id = 1;

    assert_matches!(
        ledger.reconciler.ingest_block(TRON, 101, vec![stray]).await,
        Err(SettlementError::InvalidEvent(_))
    );
    assert_eq!(ledger.store.transaction_count().await, 0);
    assert_eq!(ledger.store.chain(TRON).await.unwrap().unwrap().block, 100);
}

#[tokio::test]
async fn test_locked_reserve_defers_confirmation() {
    let ledger = ledger().await;
    let reserves = ReserveManager::new(ledger.store.clone());

    ledger.reconciler.ingest(usdt_deposit("0xr1", "20")).await.unwrap();
    ledger.reconciler.confirm("0xr1", 3).await.unwrap();
    ledger.reconciler.ingest(usdt_deposit("0xr2", "30")).await.unwrap();

    reserves.lock(&usdt_key()).await.unwrap();
    let err = ledger.reconciler.confirm("0xr2", 3).await.unwrap_err();
    assert_eq!(err.code(), "reserve_busy");
    assert!(err.is_retryable());
    let row = ledger.reconciler.transaction("0xr2").await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Pending);
    assert_eq!(ledger.balance(7, "usdt").await, dec("20"));

    reserves.unlock(&usdt_key()).await.unwrap();
    assert_matches!(
        ledger.reconciler.confirm("0xr2", 3).await.unwrap(),
        ConfirmOutcome::Confirmed(_)
    );
    assert_eq!(ledger.balance(7, "usdt").await, dec("50"));
    assert_eq!(
        reserves
            .get_reserve("usdt", Platform::Tron, Protocol::Trc20)
            .await
            .unwrap(),
        dec("50")
    );
}

#[tokio::test]
async fn test_fee_collection_links_to_its_withdrawal() {
    let ledger = ledger().await;
    let mut withdraw = usdt_deposit("0xw1", "15");
    withdraw.assignment = Assignment::Withdraw;
    let parent = assert_matches!(
        ledger.reconciler.ingest(withdraw).await.unwrap(),
        IngestOutcome::Created(tx) => tx
    );

    let mut fee = usdt_deposit("", "1").internal();
    fee.hash = None;
    fee.assignment = Assignment::Withdraw;
    fee.parent = Some(parent.id);
    let child = assert_matches!(
        ledger.reconciler.ingest(fee).await.unwrap(),
        IngestOutcome::Created(tx) => tx
    );
    assert!(!child.hash.is_empty());

    let children = ledger.reconciler.children(parent.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, child.id);
    assert_eq!(children[0].parent, Some(parent.id));

    // Withdrawals settle by status only.
    assert_matches!(
        ledger.reconciler.confirm("0xw1", 3).await.unwrap(),
        ConfirmOutcome::Confirmed(_)
    );
    assert_eq!(ledger.balance(7, "usdt").await, dec("0"));
}

#[tokio::test]
async fn test_timed_out_confirmation_releases_the_reserve_lock() {
    let (ledger, store) = stalling_ledger(Duration::from_millis(100)).await;
    ledger.reconciler.ingest(usdt_deposit("0xt1", "20")).await.unwrap();
    ledger.reconciler.confirm("0xt1", 3).await.unwrap();
    ledger.reconciler.ingest(usdt_deposit("0xt2", "30")).await.unwrap();

    store.stall_commits(Some(Duration::from_millis(500)));
    let err = ledger.reconciler.confirm("0xt2", 3).await.unwrap_err();
    assert_matches!(err, SettlementError::Timeout(_));

    let rows = ledger.store.reserves(&usdt_key()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows.iter().all(|r| !r.lock));
    assert_eq!(rows[0].value, dec("20"));
    let row = ledger.reconciler.transaction("0xt2").await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Pending);
    assert_eq!(ledger.balance(7, "usdt").await, dec("20"));

    store.stall_commits(None);
    assert_matches!(
        ledger.reconciler.confirm("0xt2", 3).await.unwrap(),
        ConfirmOutcome::Confirmed(_)
    );
    assert_eq!(ledger.balance(7, "usdt").await, dec("50"));
    assert_eq!(
        ledger.store.reserves(&usdt_key()).await.unwrap()[0].value,
        dec("50")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_deposits_to_a_new_key_both_land() {
    let ledger = ledger().await;
    ledger.reconciler.ingest(usdt_deposit("0xn1", "10")).await.unwrap();
    ledger.reconciler.ingest(usdt_deposit("0xn2", "15")).await.unwrap();
    assert!(ledger.store.reserves(&usdt_key()).await.unwrap().is_empty());

    let mut tasks = Vec::new();
    for hash in ["0xn1", "0xn2"] {
        let reconciler = ledger.reconciler.clone();
        tasks.push(tokio::spawn(async move { reconciler.confirm(hash, 3).await }));
    }
    for outcome in join_all(tasks).await {
        assert_matches!(outcome.unwrap().unwrap(), ConfirmOutcome::Confirmed(_));
    }

    assert_eq!(ledger.balance(7, "usdt").await, dec("25"));
    let rows = ledger.store.reserves(&usdt_key()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, dec("25"));
    assert!(!rows[0].lock);
}
