//! End-to-end coordination tests over the in-memory stores.

use std::sync::Arc;

use checkout::{
    CheckoutCoordinator, CheckoutError, PaymentConfirmation, PaymentOutcome, PaymentReconciler,
    ReconcileOutcome,
};
use common::{IdempotencyKey, Money, PaymentIntentId, UserId};
use eventlog::{
    EventLog, FlakyPublisher, MemoryOutbox, OrderEvent, Outbox, RetryPolicy, RetryingPublisher,
};
use idempotency::MemoryGuard;
use ledger::{LedgerStore, MemoryLedger, OrderStatus, Product};

struct Harness {
    coordinator: CheckoutCoordinator<MemoryLedger, MemoryGuard, EventLog>,
    reconciler: PaymentReconciler<MemoryLedger, MemoryGuard, EventLog>,
    ledger: MemoryLedger,
    log: EventLog,
}

async fn harness() -> Harness {
    let ledger = MemoryLedger::new();
    let guard = MemoryGuard::new();
    let log = EventLog::new();

    ledger
        .upsert_product(Product::new(
            "SKU-A",
            "Widget",
            Some("A widget".into()),
            Money::from_cents(1000),
        ))
        .await
        .unwrap();
    ledger
        .upsert_product(Product::new("SKU-B", "Gadget", None, Money::from_cents(500)))
        .await
        .unwrap();

    Harness {
        coordinator: CheckoutCoordinator::new(ledger.clone(), guard.clone(), log.clone()),
        reconciler: PaymentReconciler::new(ledger.clone(), guard.clone(), log.clone()),
        ledger,
        log,
    }
}

#[tokio::test]
async fn checkout_then_payment_lifecycle() {
    let h = harness().await;
    let user = UserId::new();

    // Cart {A: 2, B: 1} at $10.00 / $5.00 checks out for $25.00 pending.
    h.ledger.add_to_cart(user, "SKU-A".into(), 2).await.unwrap();
    h.ledger.add_to_cart(user, "SKU-B".into(), 1).await.unwrap();

    let receipt = h.coordinator.checkout(user, None).await.unwrap();
    assert_eq!(receipt.total, Money::from_cents(2500));
    assert_eq!(receipt.status, OrderStatus::Pending);

    // The payment confirmation transitions it to paid.
    let confirmation = PaymentConfirmation {
        intent_id: PaymentIntentId::new("pi_100"),
        order_id: receipt.order_id,
        amount: receipt.total,
        outcome: PaymentOutcome::Succeeded,
    };
    let outcome = h.reconciler.apply(confirmation.clone()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(OrderStatus::Paid));

    // Replaying the same event leaves state unchanged and adds no row.
    let replay = h.reconciler.apply(confirmation).await.unwrap();
    assert_eq!(replay, ReconcileOutcome::AlreadyApplied);
    assert_eq!(h.ledger.payment_count().await, 1);

    let order = h.ledger.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(
        order.total,
        Money::sum(order.lines.iter().map(|l| l.line_total()))
    );

    // The partition carries order_created then order_paid, in order.
    let events = h.log.events_for(receipt.order_id).await;
    let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(types, vec!["order_created", "order_paid"]);
}

#[tokio::test]
async fn many_concurrent_keyed_checkouts_agree_on_one_order() {
    let h = harness().await;
    let coordinator = Arc::new(h.coordinator);
    let user = UserId::new();
    h.ledger.add_to_cart(user, "SKU-A".into(), 2).await.unwrap();

    let key = IdempotencyKey::new("client-key");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let c = coordinator.clone();
        let k = key.clone();
        handles.push(tokio::spawn(async move { c.checkout(user, Some(k)).await }));
    }

    let mut receipts = Vec::new();
    for handle in handles {
        receipts.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(h.ledger.order_count().await, 1);
    for receipt in &receipts[1..] {
        assert_eq!(receipt.order_id, receipts[0].order_id);
        assert_eq!(receipt.total, receipts[0].total);
    }
}

#[tokio::test]
async fn unkeyed_simultaneous_checkouts_never_double_commit() {
    let h = harness().await;
    let coordinator = Arc::new(h.coordinator);
    let user = UserId::new();
    h.ledger.add_to_cart(user, "SKU-A".into(), 1).await.unwrap();

    let c1 = coordinator.clone();
    let c2 = coordinator.clone();
    let (r1, r2) = tokio::join!(c1.checkout(user, None), c2.checkout(user, None));

    assert_eq!(h.ledger.order_count().await, 1);
    for result in [r1, r2] {
        match result {
            Ok(receipt) => assert_eq!(receipt.total, Money::from_cents(1000)),
            Err(e) => assert!(matches!(e, CheckoutError::EmptyCart)),
        }
    }
}

#[tokio::test]
async fn out_of_order_confirmations_converge() {
    let h = harness().await;
    let user = UserId::new();
    h.ledger.add_to_cart(user, "SKU-A".into(), 1).await.unwrap();
    let receipt = h.coordinator.checkout(user, None).await.unwrap();

    // A stale failure for an earlier attempt arrives after the success.
    let success = PaymentConfirmation {
        intent_id: PaymentIntentId::new("pi_2"),
        order_id: receipt.order_id,
        amount: receipt.total,
        outcome: PaymentOutcome::Succeeded,
    };
    let stale_failure = PaymentConfirmation {
        intent_id: PaymentIntentId::new("pi_1"),
        order_id: receipt.order_id,
        amount: receipt.total,
        outcome: PaymentOutcome::Failed {
            reason: "timeout".into(),
        },
    };

    h.reconciler.apply(success).await.unwrap();
    let late = h.reconciler.apply(stale_failure).await.unwrap();

    // The late failure is acknowledged without touching the paid order.
    assert_eq!(late, ReconcileOutcome::AlreadyApplied);
    assert_eq!(h.ledger.payment_count().await, 1);
    let order = h.ledger.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn committed_order_survives_broker_outage_via_outbox() {
    let ledger = MemoryLedger::new();
    let guard = MemoryGuard::new();
    ledger
        .upsert_product(Product::new("SKU-A", "Widget", None, Money::from_cents(1000)))
        .await
        .unwrap();

    // Broker down for every direct attempt; events park in the outbox.
    let flaky = FlakyPublisher::failing(2);
    let outbox = MemoryOutbox::new();
    let policy = RetryPolicy {
        attempts: 2,
        base_delay: std::time::Duration::from_millis(1),
    };
    let publisher = RetryingPublisher::with_policy(flaky.clone(), outbox.clone(), policy);
    let coordinator = CheckoutCoordinator::new(ledger.clone(), guard, publisher);

    let user = UserId::new();
    ledger.add_to_cart(user, "SKU-A".into(), 1).await.unwrap();
    let receipt = coordinator.checkout(user, None).await.unwrap();

    // The order committed even though nothing reached the log yet.
    assert!(ledger.get_order(receipt.order_id).await.unwrap().is_some());
    assert_eq!(flaky.log().event_count().await, 0);
    assert_eq!(outbox.depth().await.unwrap(), 1);

    // Once the broker recovers, the reconciliation sweep re-emits the
    // parked order_created through a handle over the same outbox.
    let sweeper = RetryingPublisher::with_policy(flaky.clone(), outbox.clone(), policy);
    let drained = sweeper.sweep(10).await.unwrap();
    assert_eq!(drained, 1);
    assert_eq!(flaky.log().event_count().await, 1);
    assert_eq!(outbox.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn notification_consumer_sees_both_events() {
    let h = harness().await;
    let mut rx = h.log.subscribe().await;

    let user = UserId::new();
    h.ledger.add_to_cart(user, "SKU-B".into(), 2).await.unwrap();
    let receipt = h.coordinator.checkout(user, None).await.unwrap();

    h.reconciler
        .apply(PaymentConfirmation {
            intent_id: PaymentIntentId::new("pi_1"),
            order_id: receipt.order_id,
            amount: receipt.total,
            outcome: PaymentOutcome::Succeeded,
        })
        .await
        .unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(matches!(first, OrderEvent::OrderCreated { .. }));
    assert!(matches!(second, OrderEvent::OrderPaid { .. }));
}
