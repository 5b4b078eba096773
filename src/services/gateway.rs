//! Client for the Wompi payment gateway.
//!
//! Every outbound call passes through a circuit breaker, so a dead
//! gateway fails checkout fast instead of stacking up timeouts. The
//! client covers the two calls the storefront needs: creating a
//! payment link at checkout, and looking up a transaction by reference
//! when no webhook has arrived yet.
//!
//! Only transport-level failures count against the breaker. A reachable
//! gateway answering 4xx/5xx is rejecting us, not down.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, WompiConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Blocking requests after repeated failures.
    Open,
    /// Cooldown elapsed, one probe request allowed.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: std::sync::RwLock<CircuitState>,
    failure_count: AtomicU32,
    /// Unix seconds of the most recent failure.
    last_failure_time: AtomicU64,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_seconds: u64) -> Self {
        Self {
            state: std::sync::RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_time: AtomicU64::new(0),
            failure_threshold,
            cooldown: Duration::from_secs(cooldown_seconds),
        }
    }

    fn now_secs() -> u64 {
        Utc::now().timestamp().max(0) as u64
    }

    pub fn can_execute(&self) -> bool {
        let state = self.state.read().unwrap();

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed =
                    Self::now_secs().saturating_sub(self.last_failure_time.load(Ordering::Relaxed));
                if elapsed >= self.cooldown.as_secs() {
                    drop(state);
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("Circuit breaker cooldown elapsed, allowing a probe request");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("Circuit breaker closed after a successful probe");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_time
            .store(Self::now_secs(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::Closed => {
                if failure_count >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(
                        failures = failure_count,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Probe request failed, circuit breaker reopened");
            }
            _ => {}
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.state.read().unwrap().clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,

    #[error("payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected payment gateway response: {0}")]
    Malformed(String),
}

/// Body of `POST /v1/payment_links`.
#[derive(Debug, Serialize)]
pub struct PaymentLinkRequest {
    pub name: String,
    pub description: String,
    pub single_use: bool,
    pub collect_shipping: bool,
    pub currency: String,
    pub amount_in_cents: i64,
    pub reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkEnvelope {
    data: Option<PaymentLinkData>,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkData {
    id: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CreatedPaymentLink {
    pub id: String,
    /// Hosted checkout URL handed back to the storefront.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsEnvelope {
    #[serde(default)]
    data: Vec<GatewayTransaction>,
}

/// Transaction as reported by `GET /v1/transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayTransaction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount_in_cents: Option<i64>,
}

#[derive(Clone)]
pub struct WompiClient {
    api_url: String,
    checkout_url: String,
    private_key: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl WompiClient {
    pub fn from_config(wompi: &WompiConfig, breaker: &CircuitBreakerConfig) -> Self {
        Self {
            api_url: wompi.api_url.trim_end_matches('/').to_string(),
            checkout_url: wompi.checkout_url.trim_end_matches('/').to_string(),
            private_key: wompi.private_key.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                breaker.failure_threshold,
                breaker.cooldown_seconds,
            )),
        }
    }

    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Gateway call blocked while the circuit breaker is open");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!(error = ?e, "Gateway request did not complete");
                self.circuit_breaker.record_failure();
                Err(GatewayError::Request(e))
            }
        }
    }

    /// Creates a reusable payment link and returns its id together
    /// with the hosted checkout URL.
    pub async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<CreatedPaymentLink, GatewayError> {
        info!(
            "Creating payment link: reference={}, amount_in_cents={}",
            request.reference, request.amount_in_cents
        );

        let operation = async {
            self.http_client
                .post(format!("{}/v1/payment_links", self.api_url))
                .bearer_auth(&self.private_key)
                .json(request)
                .send()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!(
                "Payment link creation rejected: status={}, body={}",
                status, body
            );
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: PaymentLinkEnvelope = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("invalid payment link response: {e}")))?;

        let id = match envelope.data.and_then(|d| d.id) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(GatewayError::Malformed(
                    "payment link response missing id".into(),
                ))
            }
        };

        Ok(CreatedPaymentLink {
            url: format!("{}/l/{}", self.checkout_url, id),
            id,
        })
    }

    /// Looks up a transaction by merchant reference. `None` means the
    /// gateway has no transaction for it yet.
    pub async fn find_transaction(
        &self,
        reference: &str,
    ) -> Result<Option<GatewayTransaction>, GatewayError> {
        let operation = async {
            self.http_client
                .get(format!("{}/v1/transactions", self.api_url))
                .query(&[("reference", reference)])
                .bearer_auth(&self.private_key)
                .send()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: TransactionsEnvelope = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("invalid transactions response: {e}")))?;

        Ok(envelope.data.into_iter().next())
    }

    pub fn circuit_breaker_status(&self) -> (CircuitState, u32) {
        (
            self.circuit_breaker.get_state(),
            self.circuit_breaker.failure_count.load(Ordering::Relaxed),
        )
    }
}
