//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::config::Config;
use api::{AppState, DynShipmentEndpoint};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use event_store::InMemoryEventStore;
use lifecycle::{HttpShipmentEndpoint, InMemoryShipmentEndpoint, ShipmentEndpoint, ShipmentRequest};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_endpoint(endpoint: DynShipmentEndpoint) -> (Router, Arc<AppState<InMemoryEventStore>>) {
    let state = api::create_state(InMemoryEventStore::new(), endpoint, &Config::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn setup() -> Router {
    setup_with_endpoint(Arc::new(InMemoryShipmentEndpoint::new())).0
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn mug(quantity: u32) -> Value {
    json!({
        "item_id": "mug",
        "name": "Mug",
        "unit_price_cents": 850,
        "quantity": quantity,
    })
}

async fn wait_for_state(app: &Router, user: &str, state: &str) -> Value {
    for _ in 0..500 {
        let (status, cart) = call(app, "GET", &format!("/carts/{user}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if cart["state"] == state {
            return cart;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("cart of {user} never reached {state}");
}

mod carts {
    use super::*;

    #[tokio::test]
    async fn test_open_cart_is_idempotent() {
        let app = setup();

        let (status, first) = call(&app, "POST", "/carts", Some(json!({ "user_id": "alice" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["state"], "OPEN");
        assert_eq!(first["user_id"], "alice");

        let (_, second) = call(&app, "POST", "/carts", Some(json!({ "user_id": "alice" }))).await;
        assert_eq!(first["cart_id"], second["cart_id"]);
    }

    #[tokio::test]
    async fn test_unknown_cart_is_404() {
        let app = setup();
        let (status, body) = call(&app, "GET", "/carts/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_blank_user_is_400() {
        let app = setup();
        let (status, _) = call(&app, "POST", "/carts", Some(json!({ "user_id": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_validated_add() {
        let app = setup();

        let (status, body) = call(&app, "POST", "/carts/alice/items", Some(mug(2))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_total"]["cents"], 1700);
        assert_eq!(body["item"]["item_id"], "mug");

        let (status, body) = call(&app, "POST", "/carts/alice/items", Some(mug(6))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["rejection"]["code"], "STOCK_INSUFFICIENT");
        assert_eq!(
            body["error"],
            "insufficient stock for Mug: at most 5 available"
        );

        let (status, body) = call(&app, "POST", "/carts/alice/items", Some(mug(0))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["rejection"]["code"], "INVALID_ITEM");

        let (_, cart) = call(&app, "GET", "/carts/alice", None).await;
        assert_eq!(cart["total"]["cents"], 1700);
        assert_eq!(cart["items"]["mug"]["quantity"], 2);
        assert_eq!(cart["running"], true);
    }

    #[tokio::test]
    async fn test_signals_are_accepted_and_applied() {
        let app = setup();

        let (status, body) = call(&app, "POST", "/carts/bob/items/signal", Some(mug(3))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["signal"], "add_item");

        // Over the validated limit, but signals skip validation.
        call(&app, "POST", "/carts/bob/items/signal", Some(mug(4))).await;
        let (_, cart) = call(&app, "GET", "/carts/bob", None).await;
        assert_eq!(cart["items"]["mug"]["quantity"], 7);

        let (status, _) = call(&app, "DELETE", "/carts/bob/items/mug", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (_, cart) = call(&app, "GET", "/carts/bob", None).await;
        assert_eq!(cart["total"]["cents"], 0);
    }

    #[tokio::test]
    async fn test_checkout_without_terms_stays_open() {
        let app = setup();
        call(&app, "POST", "/carts/carol/items/signal", Some(mug(1))).await;

        let (status, _) = call(&app, "POST", "/carts/carol/checkout", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (_, cart) = call(&app, "GET", "/carts/carol", None).await;
        assert_eq!(cart["state"], "OPEN");
        assert_eq!(cart["terms_accepted"], false);
    }

    #[tokio::test]
    async fn test_cancel_without_body() {
        let app = setup();
        call(&app, "POST", "/carts", Some(json!({ "user_id": "dave" }))).await;

        let (status, _) = call(&app, "POST", "/carts/dave/cancel", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let cart = wait_for_state(&app, "dave", "CANCELLED").await;
        assert_eq!(cart["running"], false);

        let (status, body) = call(&app, "POST", "/carts/dave/items", Some(mug(1))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["rejection"]["code"], "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let app = setup();

        call(&app, "POST", "/carts/erin/items", Some(mug(2))).await;
        call(&app, "POST", "/carts/erin/terms", None).await;
        call(&app, "POST", "/carts/erin/checkout", None).await;
        wait_for_state(&app, "erin", "SHIPPED").await;

        let (status, body) = call(&app, "POST", "/carts/erin/delivery", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        let summary = &body["summary"];
        assert_eq!(summary["lifecycle_outcome"], "COMPLETED_DELIVERED");
        assert_eq!(summary["state"], "DELIVERED");
        assert_eq!(summary["total"]["cents"], 1700);
        assert_eq!(summary["shipment_result"]["tracking_id"], "TRK-erin-999");

        let (status, events) = call(&app, "GET", "/carts/erin/events", None).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            [
                "CartOpened",
                "ItemAdded",
                "TermsAccepted",
                "CheckoutCompleted",
                "ShipmentScheduled",
                "DeliveryConfirmed",
            ]
        );
    }
}

mod simulator {
    use super::*;

    fn request(user: &str, quantity: u32) -> Value {
        json!({
            "user_id": user,
            "items": {
                "mug": { "name": "Mug", "unit_price": { "cents": 850 }, "quantity": quantity }
            },
            "address": "Default address",
        })
    }

    #[tokio::test]
    async fn test_first_dispatch_fails_then_succeeds() {
        let app = setup();

        let (status, body) = call(&app, "POST", "/shipments/dispatch", Some(request("alice", 1))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().is_some());

        let (status, body) = call(&app, "POST", "/shipments/dispatch", Some(request("alice", 1))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["tracking_id"], "TRK-alice-999");
        assert_eq!(body["item_count"], 1);
    }

    #[tokio::test]
    async fn test_oversized_dispatch_is_400() {
        let app = setup();
        let (status, body) = call(&app, "POST", "/shipments/dispatch", Some(request("bob", 11))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "quantity exceeds the per-shipment limit of 10 for mug"
        );
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/shipments/dispatch")
    }

    #[tokio::test]
    async fn test_http_endpoint_against_simulator() {
        let url = serve(setup()).await;
        let endpoint = HttpShipmentEndpoint::new(url, Duration::from_secs(5)).unwrap();

        let shipment: ShipmentRequest = serde_json::from_value(request("carol", 2)).unwrap();
        let err = endpoint.schedule(&shipment).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retryable());

        let receipt = endpoint.schedule(&shipment).await.unwrap();
        assert_eq!(receipt.tracking_id, "TRK-carol-999");

        let oversized: ShipmentRequest = serde_json::from_value(request("carol", 11)).unwrap();
        let err = endpoint.schedule(&oversized).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("limit of 10 for mug"));
    }

    #[tokio::test]
    async fn test_engine_ships_through_simulator() {
        // The simulator is served by one app; the engine under test calls it over HTTP.
        let url = serve(setup()).await;
        let endpoint: DynShipmentEndpoint =
            Arc::new(HttpShipmentEndpoint::new(url, Duration::from_secs(5)).unwrap());
        let (app, _state) = setup_with_endpoint(endpoint);

        call(&app, "POST", "/carts/frank/items", Some(mug(1))).await;
        call(&app, "POST", "/carts/frank/terms", None).await;
        call(&app, "POST", "/carts/frank/checkout", None).await;

        // First call gets 503, the retry after 2s is scheduled.
        wait_for_state(&app, "frank", "SHIPPED").await;
        let (_, events) = call(&app, "GET", "/carts/frank/events", None).await;
        let failed = events
            .as_array()
            .unwrap()
            .iter()
            .filter(|event| event["event_type"] == "ShipmentAttemptFailed")
            .count();
        assert_eq!(failed, 1);
    }
}

mod monitor {
    use super::*;

    #[tokio::test]
    async fn test_liveness_and_readiness() {
        let (app, state) = setup_with_endpoint(Arc::new(InMemoryShipmentEndpoint::new()));

        let (status, body) = call(&app, "GET", "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = call(&app, "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.monitor.collect(0, true, Utc::now()).await;
        let (status, _) = call(&app, "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_heartbeat_makes_health_ok() {
        let (app, state) = setup_with_endpoint(Arc::new(InMemoryShipmentEndpoint::new()));

        let (_, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(body["status"], "degraded");

        let (status, _) = call(
            &app,
            "POST",
            "/workers/heartbeat",
            Some(json!({ "worker_id": "w1", "task_queue": "cart-lifecycle" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        state.monitor.collect(2, true, Utc::now()).await;

        let (_, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["components"]["engine"]["message"], "2 active carts");

        let (_, snapshot) = call(&app, "GET", "/health/monitor", None).await;
        assert_eq!(snapshot["workers"]["cart-lifecycle:w1"]["stale"], false);

        let (_, history) = call(&app, "GET", "/alerts/history", None).await;
        assert_eq!(history["alerts"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = setup();
        call(&app, "POST", "/carts/alice/items", Some(mug(1))).await;

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
