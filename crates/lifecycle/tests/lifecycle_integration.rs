//! End-to-end lifecycle scenarios through the engine.
//!
//! All tests run on a paused clock, so deadlines and retry backoff elapse
//! instantly and deterministically.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{AggregateId, UserId};
use domain::{
    Aggregate, CartService, CartState, ItemId, LifecycleOutcome, LifecycleSummary, LineItem,
    Money, ShipmentFailureKind, ShipmentReceipt,
};
use event_store::InMemoryEventStore;
use lifecycle::{CartEngine, CartSignal, InMemoryShipmentEndpoint, LifecycleConfig};
use tokio::time::Instant;

type Engine = CartEngine<InMemoryEventStore, InMemoryShipmentEndpoint>;

const LONG_WAIT: Duration = Duration::from_secs(60 * 60);

fn engine_over(store: InMemoryEventStore, endpoint: InMemoryShipmentEndpoint) -> Engine {
    CartEngine::new(store, endpoint, LifecycleConfig::default())
}

fn alice() -> UserId {
    UserId::from("alice")
}

fn mug(quantity: u32) -> LineItem {
    LineItem::new("mug", "Mug", Money::from_cents(850), quantity)
}

fn lamp(quantity: u32) -> LineItem {
    LineItem::new("lamp", "Desk Lamp", Money::from_cents(3999), quantity)
}

async fn check_out(engine: &Engine, user: &UserId, items: Vec<LineItem>) {
    for item in items {
        engine.signal(user, CartSignal::AddItem(item)).await.unwrap();
    }
    engine.signal(user, CartSignal::AcceptTerms).await.unwrap();
    engine
        .signal(user, CartSignal::MarkReadyToShip)
        .await
        .unwrap();
}

async fn wait_for_state(engine: &Engine, user: &UserId, state: CartState) {
    loop {
        if engine.snapshot(user).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn finished(engine: &Engine, user: &UserId) -> LifecycleSummary {
    engine
        .wait_for_summary(user, LONG_WAIT)
        .await
        .unwrap()
        .expect("cart should have finished")
}

mod scenarios {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_cart_is_abandoned() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine.open_cart(alice()).await.unwrap();

        let summary = finished(&engine, &alice()).await;
        assert_eq!(summary.state, CartState::Abandoned);
        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::AbandonedTimeout);
        assert!(summary.shipment_result.is_none());
        assert_eq!(summary.total, Money::zero());
        assert_eq!(engine.endpoint().call_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_does_not_fire_early() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine.open_cart(alice()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1790)).await;
        engine
            .signal(&alice(), CartSignal::AddItem(mug(1)))
            .await
            .unwrap();
        let snapshot = engine.snapshot(&alice()).await.unwrap();
        assert_eq!(snapshot.state, CartState::Open);
        assert_eq!(snapshot.total, Money::from_cents(850));
    }

    // Real clock: the runtime is blocked past the deadline before the
    // checkout arrives, so the timer and the command are ready together.
    #[tokio::test]
    async fn command_queued_after_deadline_loses_to_abandonment() {
        let config = LifecycleConfig {
            abandon_after: Duration::from_millis(50),
            ..LifecycleConfig::default()
        };
        let engine = CartEngine::new(
            InMemoryEventStore::new(),
            InMemoryShipmentEndpoint::new(),
            config,
        );
        engine.open_cart(alice()).await.unwrap();
        engine
            .signal(&alice(), CartSignal::AddItem(mug(1)))
            .await
            .unwrap();
        engine.signal(&alice(), CartSignal::AcceptTerms).await.unwrap();
        assert!(engine.snapshot(&alice()).await.unwrap().terms_accepted);

        std::thread::sleep(Duration::from_millis(80));
        engine
            .signal(&alice(), CartSignal::MarkReadyToShip)
            .await
            .unwrap();

        let summary = finished(&engine, &alice()).await;
        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::AbandonedTimeout);
        assert_eq!(summary.state, CartState::Abandoned);
        assert_eq!(engine.endpoint().call_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let endpoint = InMemoryShipmentEndpoint::new();
        endpoint.fail_with_status(503, 1).await;
        let engine = engine_over(InMemoryEventStore::new(), endpoint);

        check_out(&engine, &alice(), vec![mug(2)]).await;
        wait_for_state(&engine, &alice(), CartState::Shipped).await;
        assert_eq!(engine.endpoint().call_count().await, 2);

        engine
            .signal(&alice(), CartSignal::ConfirmDelivery)
            .await
            .unwrap();
        let summary = finished(&engine, &alice()).await;
        assert_eq!(
            summary.lifecycle_outcome,
            LifecycleOutcome::CompletedDelivered
        );

        let types: Vec<String> = engine
            .history(&alice())
            .await
            .unwrap()
            .into_iter()
            .map(|envelope| envelope.event_type)
            .collect();
        assert_eq!(
            types
                .iter()
                .filter(|kind| *kind == "ShipmentAttemptFailed")
                .count(),
            1
        );
        assert!(types.contains(&"ShipmentScheduled".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_shipment_is_not_retried() {
        let endpoint = InMemoryShipmentEndpoint::new();
        endpoint.fail_with_status(400, 1).await;
        let engine = engine_over(InMemoryEventStore::new(), endpoint);

        check_out(&engine, &alice(), vec![mug(1)]).await;
        let summary = finished(&engine, &alice()).await;

        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::ShipmentFailed);
        assert_eq!(summary.state, CartState::Paid);
        let result = summary.shipment_result.unwrap();
        assert_eq!(
            result.failure_kind(),
            Some(ShipmentFailureKind::PolicyRejected)
        );
        assert_eq!(engine.endpoint().call_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_after_backoff() {
        let endpoint = InMemoryShipmentEndpoint::new();
        endpoint.fail_with_status(503, 3).await;
        let engine = engine_over(InMemoryEventStore::new(), endpoint);

        let started = Instant::now();
        check_out(&engine, &alice(), vec![mug(1)]).await;
        let summary = finished(&engine, &alice()).await;
        let elapsed = started.elapsed();

        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::ShipmentFailed);
        let result = summary.shipment_result.unwrap();
        assert_eq!(
            result.failure_kind(),
            Some(ShipmentFailureKind::RetriesExhausted)
        );
        assert_eq!(engine.endpoint().call_count().await, 3);
        // Backoff of 2s then 4s between the three attempts.
        assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_ships_and_delivers() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());

        check_out(&engine, &alice(), vec![mug(2), lamp(1)]).await;
        wait_for_state(&engine, &alice(), CartState::Shipped).await;
        engine
            .signal(&alice(), CartSignal::ConfirmDelivery)
            .await
            .unwrap();

        let summary = finished(&engine, &alice()).await;
        assert_eq!(summary.state, CartState::Delivered);
        assert_eq!(summary.total, Money::from_cents(2 * 850 + 3999));
        assert!(summary.terms_accepted);
        assert_eq!(summary.items.len(), 2);
        let result = summary.shipment_result.unwrap();
        assert_eq!(result.tracking_id(), Some("TRK-alice-999"));

        let requests = engine.endpoint().requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].address, "Default address");
        assert_eq!(requests[0].items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_open_cart() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine
            .signal(&alice(), CartSignal::AddItem(mug(1)))
            .await
            .unwrap();
        engine
            .signal(
                &alice(),
                CartSignal::Cancel {
                    reason: "changed my mind".to_string(),
                },
            )
            .await
            .unwrap();

        let summary = finished(&engine, &alice()).await;
        assert_eq!(summary.state, CartState::Cancelled);
        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::CancelledByUser);
    }
}

mod gates {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mutations_after_checkout_change_nothing() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        check_out(&engine, &alice(), vec![mug(1)]).await;
        wait_for_state(&engine, &alice(), CartState::Shipped).await;

        let before = engine.snapshot(&alice()).await.unwrap();
        let events_before = engine.history(&alice()).await.unwrap().len();

        engine
            .signal(&alice(), CartSignal::AddItem(lamp(1)))
            .await
            .unwrap();
        engine
            .signal(&alice(), CartSignal::RemoveItem("mug".into()))
            .await
            .unwrap();
        engine
            .signal(
                &alice(),
                CartSignal::Cancel {
                    reason: "too late".to_string(),
                },
            )
            .await
            .unwrap();
        let refused = engine
            .add_item_validated(&alice(), lamp(1))
            .await
            .unwrap_err();
        assert_eq!(
            refused.rejection().map(|rejection| rejection.code()),
            Some("INVALID_STATE")
        );

        assert_eq!(engine.snapshot(&alice()).await.unwrap(), before);
        assert_eq!(engine.history(&alice()).await.unwrap().len(), events_before);
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_requires_terms() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine
            .signal(&alice(), CartSignal::AddItem(mug(1)))
            .await
            .unwrap();
        engine
            .signal(&alice(), CartSignal::MarkReadyToShip)
            .await
            .unwrap();

        let snapshot = engine.snapshot(&alice()).await.unwrap();
        assert_eq!(snapshot.state, CartState::Open);
        assert!(!snapshot.terms_accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_add_is_rejected_without_recording() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine.open_cart(alice()).await.unwrap();

        let accepted = engine.add_item_validated(&alice(), mug(5)).await.unwrap();
        assert_eq!(accepted.new_total, Money::from_cents(5 * 850));

        let events = engine.history(&alice()).await.unwrap().len();
        let refused = engine
            .add_item_validated(&alice(), mug(6))
            .await
            .unwrap_err();
        assert_eq!(
            refused.rejection().map(|rejection| rejection.code()),
            Some("STOCK_INSUFFICIENT")
        );
        assert_eq!(engine.history(&alice()).await.unwrap().len(), events);
    }

    #[tokio::test(start_paused = true)]
    async fn overflowing_signal_add_is_dropped() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine.open_cart(alice()).await.unwrap();

        engine
            .signal(&alice(), CartSignal::AddItem(mug(u32::MAX)))
            .await
            .unwrap();
        engine
            .signal(&alice(), CartSignal::AddItem(mug(2)))
            .await
            .unwrap();

        let snapshot = engine.snapshot(&alice()).await.unwrap();
        assert_eq!(snapshot.state, CartState::Open);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[&ItemId::from("mug")].quantity, u32::MAX);

        let replayed = engine
            .service()
            .load(engine.handle(&alice()).await.unwrap().instance_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.total(), snapshot.total);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_cart_is_answered_from_the_log() {
        let engine = engine_over(InMemoryEventStore::new(), InMemoryShipmentEndpoint::new());
        engine
            .signal(&alice(), CartSignal::AddItem(mug(1)))
            .await
            .unwrap();
        engine
            .signal(
                &alice(),
                CartSignal::Cancel {
                    reason: "bye".to_string(),
                },
            )
            .await
            .unwrap();
        finished(&engine, &alice()).await;

        let snapshot = engine.snapshot(&alice()).await.unwrap();
        assert_eq!(snapshot.state, CartState::Cancelled);
        assert_eq!(snapshot.total, Money::from_cents(850));

        let refused = engine
            .add_item_validated(&alice(), mug(1))
            .await
            .unwrap_err();
        assert_eq!(
            refused.rejection().map(|rejection| rejection.code()),
            Some("INVALID_STATE")
        );
    }
}

mod durability {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replay_reproduces_the_summary() {
        let store = InMemoryEventStore::new();
        let engine = engine_over(store.clone(), InMemoryShipmentEndpoint::new());
        check_out(&engine, &alice(), vec![mug(3), lamp(2)]).await;
        wait_for_state(&engine, &alice(), CartState::Shipped).await;
        engine
            .signal(&alice(), CartSignal::ConfirmDelivery)
            .await
            .unwrap();
        let live = finished(&engine, &alice()).await;

        let instance = engine.handle(&alice()).await.unwrap().instance_id();
        let service = CartService::new(store);
        let first = service.load(instance).await.unwrap().unwrap();
        let second = service.load(instance).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.summary(), Some(live));
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_cart_keeps_its_deadline() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let instance = AggregateId::new();
        let now = Utc::now();
        let abandon_at = now + TimeDelta::minutes(5);
        service
            .handler()
            .create(instance, |cart| {
                cart.open(instance, alice(), now, abandon_at)
            })
            .await
            .unwrap();

        let engine = engine_over(store, InMemoryShipmentEndpoint::new());
        assert_eq!(engine.recover().await.unwrap(), 1);

        // The recorded deadline is five minutes out, not a fresh window.
        let early = engine
            .wait_for_summary(&alice(), Duration::from_secs(4 * 60))
            .await
            .unwrap();
        assert!(early.is_none());

        let summary = engine
            .wait_for_summary(&alice(), Duration::from_secs(2 * 60))
            .await
            .unwrap()
            .expect("deadline should have fired");
        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::AbandonedTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_shipment_resumes_attempt_count() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let mut cart = service
            .open_cart(alice(), Duration::from_secs(1800))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.add_item(mug(1)))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.accept_terms())
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.mark_ready_to_ship())
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| {
                cart.record_shipment_attempt_failure(1, true, Some(503), "status 503")
            })
            .await
            .unwrap();

        let endpoint = InMemoryShipmentEndpoint::new();
        endpoint.fail_with_status(503, 5).await;
        let engine = engine_over(store, endpoint);
        assert_eq!(engine.recover().await.unwrap(), 1);

        let summary = finished(&engine, &alice()).await;
        assert_eq!(summary.lifecycle_outcome, LifecycleOutcome::ShipmentFailed);
        // Only the remaining two attempts of the budget are made.
        assert_eq!(engine.endpoint().call_count().await, 2);
        match summary.shipment_result.unwrap() {
            domain::ShipmentResult::Failed { kind, attempts, .. } => {
                assert_eq!(kind, ShipmentFailureKind::RetriesExhausted);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_restart_keeps_last_status() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let mut cart = service
            .open_cart(alice(), Duration::from_secs(1800))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.add_item(mug(1)))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.accept_terms())
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.mark_ready_to_ship())
            .await
            .unwrap();
        for attempt in 1..=3 {
            service
                .execute(&mut cart, |cart| {
                    cart.record_shipment_attempt_failure(attempt, true, Some(503), "status 503")
                })
                .await
                .unwrap();
        }

        let engine = engine_over(store, InMemoryShipmentEndpoint::new());
        assert_eq!(engine.recover().await.unwrap(), 1);

        let summary = finished(&engine, &alice()).await;
        assert_eq!(engine.endpoint().call_count().await, 0);
        match summary.shipment_result.unwrap() {
            domain::ShipmentResult::Failed { kind, status, .. } => {
                assert_eq!(kind, ShipmentFailureKind::RetriesExhausted);
                assert_eq!(status, Some(503));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_shipment_is_not_sent_again() {
        let store = InMemoryEventStore::new();
        let service = CartService::new(store.clone());
        let mut cart = service
            .open_cart(alice(), Duration::from_secs(1800))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.add_item(mug(1)))
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.accept_terms())
            .await
            .unwrap();
        service
            .execute(&mut cart, |cart| cart.mark_ready_to_ship())
            .await
            .unwrap();
        let receipt = ShipmentReceipt {
            status: "scheduled".to_string(),
            tracking_id: "TRK-alice-999".to_string(),
            item_count: 1,
        };
        service
            .execute(&mut cart, |cart| cart.record_shipment_scheduled(receipt, 1))
            .await
            .unwrap();

        let engine = engine_over(store, InMemoryShipmentEndpoint::new());
        assert_eq!(engine.recover().await.unwrap(), 1);
        assert_eq!(
            engine.snapshot(&alice()).await.unwrap().state,
            CartState::Shipped
        );

        engine
            .signal(&alice(), CartSignal::ConfirmDelivery)
            .await
            .unwrap();
        let summary = finished(&engine, &alice()).await;
        assert_eq!(
            summary.lifecycle_outcome,
            LifecycleOutcome::CompletedDelivered
        );
        assert_eq!(engine.endpoint().call_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_leaves_open_cart_resumable() {
        let store = InMemoryEventStore::new();
        let engine = engine_over(store.clone(), InMemoryShipmentEndpoint::new());
        engine
            .signal(&alice(), CartSignal::AddItem(mug(2)))
            .await
            .unwrap();
        engine
            .signal(&alice(), CartSignal::AcceptTerms)
            .await
            .unwrap();
        let before = engine.snapshot(&alice()).await.unwrap();

        engine.shutdown().await;
        assert_eq!(engine.active_carts().await, 0);
        assert!(engine.open_cart(alice()).await.is_err());

        let restarted = engine_over(store, InMemoryShipmentEndpoint::new());
        assert_eq!(restarted.recover().await.unwrap(), 1);
        assert_eq!(restarted.snapshot(&alice()).await.unwrap(), before);

        restarted
            .signal(&alice(), CartSignal::MarkReadyToShip)
            .await
            .unwrap();
        wait_for_state(&restarted, &alice(), CartState::Shipped).await;
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_skips_finished_carts() {
        let store = InMemoryEventStore::new();
        let engine = engine_over(store.clone(), InMemoryShipmentEndpoint::new());
        engine
            .signal(
                &UserId::from("bob"),
                CartSignal::Cancel {
                    reason: "bye".to_string(),
                },
            )
            .await
            .unwrap();
        finished(&engine, &UserId::from("bob")).await;
        engine.open_cart(alice()).await.unwrap();
        engine.shutdown().await;

        let restarted = engine_over(store, InMemoryShipmentEndpoint::new());
        assert_eq!(restarted.recover().await.unwrap(), 1);
        assert_eq!(restarted.active_carts().await, 1);

        let bob = restarted
            .summary(&UserId::from("bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob.lifecycle_outcome, LifecycleOutcome::CancelledByUser);
    }

    #[tokio::test(start_paused = true)]
    async fn new_cart_after_previous_one_finished() {
        let store = InMemoryEventStore::new();
        let engine = engine_over(store, InMemoryShipmentEndpoint::new());
        let first = engine.open_cart(alice()).await.unwrap();
        engine
            .signal(
                &alice(),
                CartSignal::Cancel {
                    reason: "bye".to_string(),
                },
            )
            .await
            .unwrap();
        finished(&engine, &alice()).await;

        let second = engine.open_cart(alice()).await.unwrap();
        assert_ne!(first.instance_id(), second.instance_id());
        assert_ne!(first.cart_id(), second.cart_id());
        assert_eq!(
            engine.snapshot(&alice()).await.unwrap().state,
            CartState::Open
        );

        let ids = engine.service().cart_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        let reloaded = engine.service().load(ids[0]).await.unwrap().unwrap();
        assert_eq!(reloaded.id(), Some(first.instance_id()));
    }
}
