use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use modelgate_core::QuotaLedger;
use modelgate_storage::{MemoryStorage, StorageSnapshot, UserRow};

fn snapshot(quota: i64) -> StorageSnapshot {
    StorageSnapshot {
        channels: Vec::new(),
        users: vec![UserRow {
            id: 1,
            username: "u".to_string(),
            group: "default".to_string(),
            quota,
            enabled: true,
            admin: false,
            updated_at: OffsetDateTime::now_utc(),
        }],
        tokens: Vec::new(),
    }
}

fn ledger(quota: i64, ttl: Duration) -> (Arc<QuotaLedger>, Arc<MemoryStorage>) {
    let snapshot = snapshot(quota);
    let storage = Arc::new(MemoryStorage::new(snapshot.clone()));
    let ledger = QuotaLedger::new(&snapshot, storage.clone(), ttl);
    (ledger, storage)
}

#[tokio::test]
async fn settle_refunds_the_excess() {
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 10).await.unwrap();
    assert_eq!(ledger.balance(1).await, 90);
    ledger.settle(&reservation, 8).await;
    assert_eq!(ledger.balance(1).await, 92);
}

#[tokio::test]
async fn settle_debits_the_shortfall() {
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 10).await.unwrap();
    ledger.settle(&reservation, 25).await;
    assert_eq!(ledger.balance(1).await, 75);
}

#[tokio::test]
async fn refund_returns_the_full_reservation() {
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 40).await.unwrap();
    assert_eq!(ledger.balance(1).await, 60);
    ledger.refund(&reservation).await;
    assert_eq!(ledger.balance(1).await, 100);
}

#[tokio::test]
async fn refund_and_settle_are_idempotent_per_handle() {
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 10).await.unwrap();
    ledger.settle(&reservation, 4).await;
    // Neither a second settle nor a late refund may move the balance again.
    ledger.settle(&reservation, 4).await;
    ledger.refund(&reservation).await;
    assert_eq!(ledger.balance(1).await, 96);

    let reservation = ledger.pre_consume(1, 1, 10).await.unwrap();
    ledger.refund(&reservation).await;
    ledger.refund(&reservation).await;
    ledger.settle(&reservation, 9).await;
    assert_eq!(ledger.balance(1).await, 96);
}

#[tokio::test]
async fn insufficient_balance_is_rejected() {
    let (ledger, _) = ledger(5, Duration::from_secs(600));
    let err = ledger.pre_consume(1, 1, 10).await.unwrap_err();
    assert_eq!(err.kind().code(), "insufficient_quota");
    assert!(err.options().skip_retry);
    assert_eq!(ledger.balance(1).await, 5);
}

#[tokio::test]
async fn per_user_mutations_serialise_without_loss() {
    let (ledger, _) = ledger(10_000, Duration::from_secs(600));
    let mut handles = Vec::new();
    for _ in 0..50 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let reservation = ledger.pre_consume(1, 1, 100).await.unwrap();
            ledger.settle(&reservation, 40).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    // 50 settlements of 40 each, no lost updates.
    assert_eq!(ledger.balance(1).await, 10_000 - 50 * 40);
}

#[tokio::test]
async fn free_models_reserve_nothing() {
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 0).await.unwrap();
    assert_eq!(ledger.balance(1).await, 100);
    ledger.settle(&reservation, 0).await;
    assert_eq!(ledger.balance(1).await, 100);
}

#[tokio::test]
async fn zero_reservations_still_settle_observed_cost() {
    // Realtime sessions reserve nothing up front; the shortfall must still
    // debit when usage arrives.
    let (ledger, _) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 0).await.unwrap();
    ledger.settle(&reservation, 33).await;
    assert_eq!(ledger.balance(1).await, 67);
    // Still idempotent: a replay or late refund moves nothing.
    ledger.settle(&reservation, 33).await;
    ledger.refund(&reservation).await;
    assert_eq!(ledger.balance(1).await, 67);
}

#[tokio::test]
async fn touched_reservations_survive_the_sweeper() {
    let (ledger, _) = ledger(100, Duration::from_millis(80));
    let reservation = ledger.pre_consume(1, 1, 30).await.unwrap();
    // A live connection keeps refreshing the handle well past the TTL.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        ledger.touch(&reservation).await;
    }
    assert_eq!(ledger.balance(1).await, 70);
    // The handle is still settleable after outliving the TTL.
    ledger.settle(&reservation, 30).await;
    assert_eq!(ledger.balance(1).await, 70);
}

#[tokio::test]
async fn abandoned_reservations_are_swept_back() {
    let (ledger, _) = ledger(100, Duration::from_millis(80));
    let _reservation = ledger.pre_consume(1, 1, 30).await.unwrap();
    assert_eq!(ledger.balance(1).await, 70);
    // Never settled nor refunded; the sweeper must return it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(ledger.balance(1).await, 100);
}

#[tokio::test]
async fn settled_cost_is_persisted_write_behind() {
    let (ledger, storage) = ledger(100, Duration::from_secs(600));
    let reservation = ledger.pre_consume(1, 1, 10).await.unwrap();
    ledger.settle(&reservation, 8).await;
    // The storage write is fire-and-forget; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(storage.user_quota(1), Some(92));
}
