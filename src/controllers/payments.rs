use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::services::checkout::{CheckoutService, CreatePaymentRequest};
use crate::services::status::StatusService;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/status", get(payment_status))
}

// POST /payments
async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = CheckoutService::new(
        state.store.clone(),
        state.gateway.clone(),
        state.config.app.base_url.clone(),
        state.config.wompi.currency.clone(),
    );
    let checkout = service.create_payment(request).await?;

    Ok(Json(json!({ "payment_link": checkout.payment_link })))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    reference: Option<String>,
}

// GET /payments/status?reference=order-...
async fn payment_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reference = query
        .reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing reference".into()))?;

    let service = StatusService::new(state.store.clone(), state.gateway.clone());
    let response = service.payment_status(&reference).await?;

    Ok(Json(response))
}
