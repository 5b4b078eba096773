//! End-to-end tests driving the HTTP surface against an in-memory
//! store and a mocked Wompi gateway.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use raffle_system::config::{
    AppConfig, CircuitBreakerConfig, Config, DatabaseConfig, WompiConfig,
};
use raffle_system::services::gateway::WompiClient;
use raffle_system::store::memory::MemoryStore;
use raffle_system::store::RaffleStore;
use raffle_system::{build_router, AppState};

const EVENTS_SECRET: &str = "test_events_secret";

struct TestApp {
    base_url: String,
    client: reqwest::Client,
    gateway: MockServer,
    /// Handle on the server's store, for asserting row state the HTTP
    /// surface does not expose.
    store: MemoryStore,
}

async fn spawn_app() -> TestApp {
    let gateway = MockServer::start().await;

    let config = Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "off".to_string(),
            base_url: "http://localhost:3000".to_string(),
        },
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            pool_size: 1,
        },
        wompi: WompiConfig {
            api_url: gateway.uri(),
            checkout_url: "https://checkout.test".to_string(),
            private_key: "prv_test_key".to_string(),
            events_secret: EVENTS_SECRET.to_string(),
            integrity_key: String::new(),
            currency: "COP".to_string(),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown_seconds: 60,
        },
    };

    let store = MemoryStore::new();
    let wompi = WompiClient::from_config(&config.wompi, &config.circuit_breaker);
    let state = AppState::new(Arc::new(store.clone()), wompi, config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state).into_make_service())
            .await
            .unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
        gateway,
        store,
    }
}

fn cart_request() -> Value {
    json!({
        "items": [
            { "id": 1, "title": "Rifa moto", "quantity": 2, "price": 100000 }
        ],
        "totalAmount": 2000.0,
        "customer": {
            "fullName": "Ana Gómez",
            "email": "ana@example.com",
            "phone": "3001234567",
            "cedula": "CC-123",
            "cedulaType": "CC",
            "city": "Bogotá"
        }
    })
}

fn transaction_event(reference: &str, status: &str) -> Value {
    json!({
        "event": "transaction.updated",
        "data": {
            "transaction": {
                "id": "tx-9001",
                "status": status,
                "reference": reference,
                "amount_in_cents": 200_000,
                "redirect_url": format!(
                    "http://localhost:3000/payment/verification?reference={}",
                    reference
                )
            }
        },
        "timestamp": 1_700_000_000
    })
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(EVENTS_SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Metadata minus the per-delivery update stamp, which is the one key
/// a redelivery is allowed to move.
fn without_updated_at(metadata: &Value) -> Value {
    let mut trimmed = metadata.clone();
    if let Some(map) = trimmed.as_object_mut() {
        map.remove("updated_at");
    }
    trimmed
}

impl TestApp {
    async fn mount_payment_link(&self, link_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/payment_links"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": link_id } })),
            )
            .mount(&self.gateway)
            .await;
    }

    async fn create_payment(&self) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/payments", self.base_url))
            .json(&cart_request())
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// The reference travels in the payment link request, so it can be
    /// recovered from what the mocked gateway received.
    async fn last_created_reference(&self) -> String {
        let requests = self.gateway.received_requests().await.unwrap();
        let request = requests
            .iter()
            .rev()
            .find(|r| r.url.path() == "/v1/payment_links")
            .expect("no payment link request recorded");
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        body["reference"].as_str().unwrap().to_string()
    }

    async fn post_webhook(&self, body: String, signature: &str) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/webhooks/payment-gateway", self.base_url))
            .header("content-type", "application/json")
            .header("x-wompi-signature", signature)
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn post_signed_webhook(&self, event: &Value) -> (u16, Value) {
        let body = event.to_string();
        let signature = sign(&body);
        self.post_webhook(body, &signature).await
    }

    async fn get_json(&self, path_and_query: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn root_and_health_respond() {
    let app = spawn_app().await;

    let root = reqwest::get(&app.base_url).await.unwrap();
    assert_eq!(root.status().as_u16(), 200);
    assert_eq!(root.text().await.unwrap(), "Sorteo API v1.0");

    let health = reqwest::get(format!("{}/health", app.base_url))
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn checkout_returns_payment_link() {
    let app = spawn_app().await;
    app.mount_payment_link("LNK42").await;

    let (status, body) = app.create_payment().await;

    assert_eq!(status, 200);
    assert_eq!(body["payment_link"], "https://checkout.test/l/LNK42");

    let reference = app.last_created_reference().await;
    assert!(reference.starts_with("order-"));
}

#[tokio::test]
async fn checkout_rejects_incomplete_request() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(format!("{}/payments", app.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "Missing required fields: items, totalAmount, customer, \
         customer.fullName, customer.email, customer.cedula"
    );
}

#[tokio::test]
async fn approved_webhook_issues_tickets() {
    let app = spawn_app().await;
    app.mount_payment_link("LNK42").await;
    app.create_payment().await;
    let reference = app.last_created_reference().await;

    let (status, ack) = app
        .post_signed_webhook(&transaction_event(&reference, "APPROVED"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(ack, json!({ "received": true }));

    let (status, body) = app
        .get_json(&format!("/tickets?reference={}", reference))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["transactionStatus"], "approved");
    let tickets = body["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 2);
    for ticket in tickets {
        let number = ticket["ticket_number"].as_str().unwrap();
        assert_eq!(number.len(), 6);
        assert!(number.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(ticket["award_title"], "Rifa moto");
    }

    let (status, body) = app
        .get_json(&format!("/payments/status?reference={}", reference))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["message"], "Pago approved");
    assert_eq!(body["transaction"]["reference"], reference.as_str());

    let (status, body) = app
        .get_json("/tickets/by-email?email=ana@example.com")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["found"], true);
    assert_eq!(body["total"], 2);
    assert_eq!(body["customer"]["name"], "Ana Gómez");
}

#[tokio::test]
async fn webhook_with_bad_signature_changes_nothing() {
    let app = spawn_app().await;
    app.mount_payment_link("LNK42").await;
    app.create_payment().await;
    let reference = app.last_created_reference().await;

    let body = transaction_event(&reference, "APPROVED").to_string();
    let (status, error) = app.post_webhook(body, "deadbeef").await;
    assert_eq!(status, 401);
    assert_eq!(error["error"], "invalid webhook signature");

    let (status, body) = app
        .get_json(&format!("/tickets?reference={}", reference))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["transactionStatus"], "pending");
    assert!(body["tickets"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn replayed_webhook_is_idempotent() {
    let app = spawn_app().await;
    app.mount_payment_link("LNK42").await;
    app.create_payment().await;
    let reference = app.last_created_reference().await;

    let event = transaction_event(&reference, "APPROVED");
    let (first, _) = app.post_signed_webhook(&event).await;
    assert_eq!(first, 200);
    let before = app
        .store
        .transaction_by_reference(&reference)
        .await
        .unwrap()
        .unwrap();

    let (second, _) = app.post_signed_webhook(&event).await;
    assert_eq!(second, 200);

    // Redelivery may touch timestamps, nothing else.
    let after = app
        .store
        .transaction_by_reference(&reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.reference, before.reference);
    assert_eq!(after.customer_id, before.customer_id);
    assert_eq!(after.gateway_transaction_id, before.gateway_transaction_id);
    assert_eq!(after.amount_in_cents, before.amount_in_cents);
    assert_eq!(after.items_data, before.items_data);
    assert_eq!(after.webhook_data, before.webhook_data);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(
        without_updated_at(&after.metadata),
        without_updated_at(&before.metadata)
    );

    let (_, body) = app
        .get_json(&format!("/tickets?reference={}", reference))
        .await;
    assert_eq!(body["tickets"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn stale_decline_keeps_approved_state() {
    let app = spawn_app().await;
    app.mount_payment_link("LNK42").await;
    app.create_payment().await;
    let reference = app.last_created_reference().await;

    app.post_signed_webhook(&transaction_event(&reference, "APPROVED"))
        .await;
    let (status, ack) = app
        .post_signed_webhook(&transaction_event(&reference, "DECLINED"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["note"], "Status transition ignored");

    let (_, body) = app
        .get_json(&format!("/payments/status?reference={}", reference))
        .await;
    assert_eq!(body["status"], "approved");
    let (_, body) = app
        .get_json(&format!("/tickets?reference={}", reference))
        .await;
    assert_eq!(body["tickets"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn webhook_for_unknown_reference_is_acknowledged() {
    let app = spawn_app().await;

    let (status, ack) = app
        .post_signed_webhook(&transaction_event("order-0-unknown", "APPROVED"))
        .await;

    assert_eq!(status, 200);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["note"], "Transaction not found; skipping update");
}

#[tokio::test]
async fn status_without_reference_is_rejected() {
    let app = spawn_app().await;

    let (status, body) = app.get_json("/payments/status").await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing reference");
}

#[tokio::test]
async fn status_for_unknown_reference_reports_pending() {
    let app = spawn_app().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&app.gateway)
        .await;

    let (status, body) = app.get_json("/payments/status?reference=order-1-na").await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["message"], "Payment not found yet");
}

#[tokio::test]
async fn tickets_by_email_reports_not_found() {
    let app = spawn_app().await;

    let (status, body) = app.get_json("/tickets/by-email?email=nobody@example.com").await;

    assert_eq!(status, 200);
    assert_eq!(body["found"], false);
    assert_eq!(
        body["message"],
        "No se encontraron boletas para este correo electrónico."
    );
}
