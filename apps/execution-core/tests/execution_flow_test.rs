//! Execution Flow Integration Tests
//!
//! Intents flowing through risk, submission and exchange events against the
//! paper exchange, with the full runtime running where events matter.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    RecordingStrategy, btc, build_engine, market, paper, settings, start_runtime,
    start_runtime_with, wait_for_status,
};
use execution_core::application::services::RuntimeSettings;
use execution_core::domain::order_execution::{OrderSide, OrderStatus};
use execution_core::domain::shared::{IdempotencyKey, Price, Quantity};
use execution_core::error::EngineError;
use execution_core::infrastructure::{FillMode, PlaceFault};
use execution_core::store::OrderStore;
use rust_decimal_macros::dec;

// ============================================
// Happy path
// ============================================

#[tokio::test]
async fn market_buy_fills_and_moves_position() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Immediate);
    let engine = build_engine(gateway, OrderStore::in_memory(), strategy.clone(), settings());
    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;

    engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap();
    let order = wait_for_status(&engine, "k1", OrderStatus::Filled).await;

    assert_eq!(order.filled_quantity(), Quantity::new(dec!(1.0)));
    assert_eq!(order.average_fill_price(), Some(Price::new(dec!(50000))));
    assert_eq!(engine.store().position(&btc()), dec!(1.0));

    let fills = strategy.fills();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].1, OrderSide::Buy);
    assert_eq!(fills[0].2, Quantity::new(dec!(1.0)));
    assert_eq!(fills[0].3, Price::new(dec!(50000)));
    assert_eq!(strategy.terminals().len(), 1);

    let summary = runtime.shutdown().await;
    assert!(summary.drained);
    assert_eq!(summary.open_orders, 0);
}

#[tokio::test]
async fn queued_intents_are_processed_by_workers() {
    let strategy = Arc::new(RecordingStrategy::default());
    let engine = build_engine(
        paper(FillMode::Immediate),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;

    let intents = runtime.intents();
    intents
        .send(market("q1", OrderSide::Buy, dec!(0.5)))
        .await
        .unwrap();
    intents
        .send(market("q2", OrderSide::Sell, dec!(0.2)))
        .await
        .unwrap();

    wait_for_status(&engine, "q1", OrderStatus::Filled).await;
    wait_for_status(&engine, "q2", OrderStatus::Filled).await;
    assert_eq!(engine.store().position(&btc()), dec!(0.3));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn intents_queued_at_shutdown_are_refused_not_dropped() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Resting);
    gateway.push_fault(PlaceFault::SlowResponse(Duration::from_millis(500)));
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    let runtime = start_runtime_with(
        Arc::clone(&engine),
        Duration::from_secs(60),
        RuntimeSettings {
            intent_workers: 1,
            shutdown_timeout: Duration::from_secs(5),
            ..RuntimeSettings::default()
        },
    )
    .await;

    let intents = runtime.intents();
    for key in ["q1", "q2", "q3"] {
        intents
            .send(market(key, OrderSide::Buy, dec!(0.5)))
            .await
            .unwrap();
    }
    // the only worker is now stuck on q1's slow placement
    while engine.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    let summary = runtime.shutdown().await;

    assert!(summary.drained);
    assert_eq!(summary.rejected_intents, 2);
    let q1 = engine.store().get(&IdempotencyKey::new("q1")).unwrap();
    assert_eq!(q1.status(), OrderStatus::Acknowledged);
    assert!(engine.store().get(&IdempotencyKey::new("q2")).is_none());
    assert!(engine.store().get(&IdempotencyKey::new("q3")).is_none());
    assert_eq!(strategy.rejection_codes(), vec!["NOT_ACCEPTING", "NOT_ACCEPTING"]);
    assert_eq!(gateway.place_calls(), 1);
    assert!(
        intents
            .send(market("q4", OrderSide::Buy, dec!(0.5)))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn partial_fills_accumulate_then_complete() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Resting);
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;

    let order = engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap();
    let id = order.exchange_order_id().cloned().unwrap();

    gateway.fill(&id, Quantity::new(dec!(0.4)), Price::new(dec!(50000)));
    let order = wait_for_status(&engine, "k1", OrderStatus::PartiallyFilled).await;
    assert_eq!(order.filled_quantity(), Quantity::new(dec!(0.4)));

    gateway.fill(&id, Quantity::new(dec!(0.6)), Price::new(dec!(50100)));
    let order = wait_for_status(&engine, "k1", OrderStatus::Filled).await;
    assert_eq!(order.filled_quantity(), Quantity::new(dec!(1.0)));

    let increments: Vec<_> = strategy.fills().into_iter().map(|f| f.2).collect();
    assert_eq!(
        increments,
        vec![Quantity::new(dec!(0.4)), Quantity::new(dec!(0.6))]
    );
    assert_eq!(engine.store().position(&btc()), dec!(1.0));

    runtime.shutdown().await;
}

// ============================================
// Refusals
// ============================================

#[tokio::test]
async fn oversized_intent_is_vetoed_without_an_order() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Immediate);
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    engine.open_intake();

    let err = engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(5.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(strategy.rejection_codes(), vec!["EXCEEDS_POSITION_LIMIT"]);
    assert!(engine.store().get(&IdempotencyKey::new("k1")).is_none());
    assert_eq!(engine.store().position(&btc()), dec!(0));
    assert_eq!(gateway.place_calls(), 0);
}

#[tokio::test]
async fn resting_sell_does_not_make_room_for_another_buy() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Resting);
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    engine.open_intake();

    engine
        .submit_intent(market("b1", OrderSide::Buy, dec!(2.0)))
        .await
        .unwrap();
    engine
        .submit_intent(market("s1", OrderSide::Sell, dec!(2.0)))
        .await
        .unwrap();
    // both buys could fill while the sell never does
    let err = engine
        .submit_intent(market("b2", OrderSide::Buy, dec!(2.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(strategy.rejection_codes(), vec!["EXCEEDS_POSITION_LIMIT"]);
    assert!(engine.store().get(&IdempotencyKey::new("b2")).is_none());
    assert_eq!(gateway.place_calls(), 2);

    // the short side is already at the limit too
    let err = engine
        .submit_intent(market("s2", OrderSide::Sell, dec!(0.5)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(gateway.place_calls(), 2);

    let projected = engine.store().projected_positions()[&btc()];
    assert_eq!(projected.long_extreme(), dec!(2.0));
    assert_eq!(projected.short_extreme(), dec!(-2.0));
}

#[tokio::test]
async fn untradable_instrument_is_vetoed() {
    let strategy = Arc::new(RecordingStrategy::default());
    let engine = build_engine(
        paper(FillMode::Immediate),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    engine.open_intake();

    let intent = execution_core::Intent::market(
        IdempotencyKey::new("k1"),
        execution_core::InstrumentId::new("DOGE-USD"),
        OrderSide::Buy,
        Quantity::new(dec!(1)),
    );
    let err = engine.submit_intent(intent).await.unwrap_err();

    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(strategy.rejection_codes(), vec!["INSTRUMENT_NOT_TRADABLE"]);
}

#[tokio::test]
async fn duplicate_key_reaches_the_exchange_once() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Resting);
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    engine.open_intake();

    let first = engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap();
    let err = engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateIntent { .. }));
    assert_eq!(gateway.place_calls(), 1);
    assert_eq!(gateway.order_count(), 1);
    let stored = engine.store().get(&IdempotencyKey::new("k1")).unwrap();
    assert_eq!(stored.exchange_order_id(), first.exchange_order_id());
}

#[tokio::test]
async fn intake_is_closed_until_runtime_recovers() {
    let engine = build_engine(
        paper(FillMode::Immediate),
        OrderStore::in_memory(),
        Arc::new(RecordingStrategy::default()),
        settings(),
    );

    let err = engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAccepting));
    assert!(err.is_retryable());

    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;
    assert!(engine.is_accepting());
    engine
        .submit_intent(market("k2", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap();
    runtime.shutdown().await;
    assert!(!engine.is_accepting());
}

// ============================================
// Cancellation
// ============================================

#[tokio::test]
async fn cancel_resting_order_notifies_terminal_once() {
    let strategy = Arc::new(RecordingStrategy::default());
    let gateway = paper(FillMode::Resting);
    let engine = build_engine(
        Arc::clone(&gateway),
        OrderStore::in_memory(),
        strategy.clone(),
        settings(),
    );
    let runtime = start_runtime(Arc::clone(&engine), Duration::from_secs(60)).await;

    engine
        .submit_intent(market("k1", OrderSide::Buy, dec!(1.0)))
        .await
        .unwrap();
    let order = engine.cancel(&IdempotencyKey::new("k1")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);

    // let the pushed cancel report drain through the event pump
    tokio::time::sleep(Duration::from_millis(50)).await;
    let terminals = strategy.terminals();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].status(), OrderStatus::Cancelled);

    runtime.shutdown().await;
}

#[tokio::test]
async fn cancel_unknown_key_is_not_found() {
    let engine = build_engine(
        paper(FillMode::Resting),
        OrderStore::in_memory(),
        Arc::new(RecordingStrategy::default()),
        settings(),
    );
    engine.open_intake();

    let err = engine.cancel(&IdempotencyKey::new("nope")).await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound { .. }));
}
