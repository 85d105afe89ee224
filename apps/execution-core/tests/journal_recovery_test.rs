//! Journal Recovery Integration Tests
//!
//! Orders written through a file journal survive a restart, and a restarted
//! engine resolves unconfirmed submissions before it accepts new intents.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{
    RecordingStrategy, btc, build_engine, market, paper, settings, start_runtime, wait_for_status,
};
use execution_core::domain::order_execution::{OrderSide, OrderStatus};
use execution_core::domain::shared::{IdempotencyKey, Price, Quantity, Timestamp};
use execution_core::infrastructure::{FillMode, PlaceFault};
use execution_core::store::{FileOrderJournal, OrderStore};
use rust_decimal_macros::dec;
use tempfile::TempDir;

async fn open_store(path: &Path) -> OrderStore {
    let journal = FileOrderJournal::open(path, false).await.unwrap();
    OrderStore::load(Arc::new(journal)).await.unwrap()
}

#[tokio::test]
async fn orders_survive_restart_and_unknown_outcomes_are_resolved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.jsonl");
    let gateway = paper(FillMode::Resting);

    {
        let engine = build_engine(
            Arc::clone(&gateway),
            open_store(&path).await,
            Arc::new(RecordingStrategy::default()),
            settings(),
        );
        engine.open_intake();
        engine
            .submit_intent(market("acked", OrderSide::Buy, dec!(1.0)))
            .await
            .unwrap();
        gateway.push_fault(PlaceFault::ResponseLost);
        let order = engine
            .submit_intent(market("unknown", OrderSide::Buy, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(order.status(), OrderStatus::AwaitingReconciliation);
    }

    let store = open_store(&path).await;
    let acked = store.get(&IdempotencyKey::new("acked")).unwrap();
    assert_eq!(acked.status(), OrderStatus::Acknowledged);
    assert_eq!(
        store.get(&IdempotencyKey::new("unknown")).unwrap().status(),
        OrderStatus::AwaitingReconciliation
    );
    assert_eq!(
        store.get_by_exchange_id(acked.exchange_order_id().unwrap()).map(|o| o.status()),
        Some(OrderStatus::Acknowledged)
    );

    let engine = build_engine(
        Arc::clone(&gateway),
        store,
        Arc::new(RecordingStrategy::default()),
        settings(),
    );
    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;

    let resolved = engine.store().get(&IdempotencyKey::new("unknown")).unwrap();
    assert_eq!(resolved.status(), OrderStatus::Acknowledged);
    assert!(resolved.exchange_order_id().is_some());
    assert_eq!(gateway.place_calls(), 2);
    assert_eq!(gateway.order_count(), 2);

    // the same key is still refused after the restart
    let err = engine
        .submit_intent(market("acked", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_INTENT");

    runtime.shutdown().await;
}

#[tokio::test]
async fn fills_and_positions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.jsonl");
    let gateway = paper(FillMode::Resting);

    {
        let engine = build_engine(
            Arc::clone(&gateway),
            open_store(&path).await,
            Arc::new(RecordingStrategy::default()),
            settings(),
        );
        let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;
        let order = engine
            .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
            .await
            .unwrap();
        gateway.fill(
            order.exchange_order_id().unwrap(),
            Quantity::new(dec!(0.25)),
            Price::new(dec!(50000)),
        );
        wait_for_status(&engine, "k1", OrderStatus::PartiallyFilled).await;
        runtime.shutdown().await;
    }

    let store = open_store(&path).await;
    let order = store.get(&IdempotencyKey::new("k1")).unwrap();
    assert_eq!(order.status(), OrderStatus::PartiallyFilled);
    assert_eq!(order.filled_quantity(), Quantity::new(dec!(0.25)));
    assert_eq!(store.position(&btc()), dec!(0.25));
    assert_eq!(store.position(&btc()), store.recompute_position(&btc()));
}

#[tokio::test]
async fn eviction_keeps_positions_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.jsonl");
    let gateway = paper(FillMode::Resting);

    {
        let engine = build_engine(
            Arc::clone(&gateway),
            open_store(&path).await,
            Arc::new(RecordingStrategy::default()),
            settings(),
        );
        engine.open_intake();
        let order = engine
            .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
            .await
            .unwrap();
        let id = order.exchange_order_id().cloned().unwrap();
        let report = gateway
            .fill(&id, Quantity::new(dec!(1.0)), Price::new(dec!(50000)))
            .unwrap();
        engine
            .apply_report(&IdempotencyKey::new("k1"), &report)
            .await
            .unwrap();

        let later = Timestamp::now().plus(Duration::from_secs(10));
        let evicted = engine
            .store()
            .evict_terminal(Duration::from_secs(1), later)
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        engine.store().compact().await.unwrap();
    }

    let store = open_store(&path).await;
    assert!(store.is_empty());
    assert_eq!(store.position(&btc()), dec!(1.0));
}

#[tokio::test]
async fn corrupt_journal_line_fails_loudly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.jsonl");
    std::fs::write(&path, "{\"not\": \"a record\"}\n").unwrap();

    let journal = FileOrderJournal::open(&path, false).await.unwrap();
    let result = OrderStore::load(Arc::new(journal)).await;
    assert!(result.is_err());
}
