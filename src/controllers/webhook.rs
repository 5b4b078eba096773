use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::services::reconciliation::{ReconciliationService, WebhookOutcome};
use crate::services::signature::SignatureVerifier;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/payment-gateway", post(payment_webhook))
}

// POST /webhooks/payment-gateway
//
// The gateway retries on any non-2xx answer, so unknown references and
// stale statuses are acknowledged with 200 and a note instead of an error.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ApiError::Validation("Empty request body".to_string()));
    }

    let events_secret = &state.config.wompi.events_secret;
    if events_secret.is_empty() {
        return Err(ApiError::Misconfigured(
            "WOMPI_EVENTS_SECRET is not configured".to_string(),
        ));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid webhook JSON: {}", e)))?;

    let verifier = SignatureVerifier::new(
        events_secret.clone(),
        state.config.wompi.integrity_key.clone(),
    );
    if !verifier.verify(&body, &headers, &event) {
        warn!("Rejected webhook with invalid signature");
        return Err(ApiError::SignatureRejected);
    }

    let service = ReconciliationService::new(state.store.clone());
    let outcome = service.process_event(&event).await?;

    let response = match outcome {
        WebhookOutcome::Applied { reference, status } => {
            info!(%reference, %status, "Webhook applied");
            json!({ "received": true })
        }
        WebhookOutcome::Ignored {
            reference,
            current,
            reported,
        } => {
            info!(%reference, %current, %reported, "Webhook ignored stale transition");
            json!({ "received": true, "note": "Status transition ignored" })
        }
        WebhookOutcome::UnknownStatus(raw) => {
            warn!(status = %raw, "Webhook reported unknown status");
            json!({ "received": true, "note": "Unknown transaction status; skipping update" })
        }
        WebhookOutcome::UnknownTransaction => {
            warn!("Webhook did not match any stored transaction");
            json!({ "received": true, "note": "Transaction not found; skipping update" })
        }
    };

    Ok(Json(response))
}
