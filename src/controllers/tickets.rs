use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::models::{Ticket, TicketStatus, TransactionStatus};
use crate::services::status::{EmailTickets, StatusService};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets", get(tickets_by_reference))
        .route("/tickets/by-email", get(tickets_by_email))
}

#[derive(Debug, Deserialize)]
struct ReferenceQuery {
    reference: Option<String>,
}

#[derive(Debug, Serialize)]
struct TicketsResponse {
    tickets: Vec<Ticket>,
    #[serde(rename = "transactionStatus")]
    transaction_status: TransactionStatus,
}

// GET /tickets?reference=order-...
async fn tickets_by_reference(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReferenceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reference = query
        .reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing reference".to_string()))?;

    let service = StatusService::new(state.store.clone(), state.gateway.clone());
    let found = service.tickets_for_reference(&reference).await?;

    Ok(Json(TicketsResponse {
        tickets: found.tickets,
        transaction_status: found.transaction_status,
    }))
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct CustomerTicketResponse {
    id: i64,
    ticket_number: String,
    status: TicketStatus,
    award_title: String,
    award_image: Option<String>,
    created_at: DateTime<Utc>,
    transaction_reference: String,
    purchase_date: DateTime<Utc>,
}

impl From<crate::store::CustomerTicket> for CustomerTicketResponse {
    fn from(entry: crate::store::CustomerTicket) -> Self {
        let Ticket {
            id,
            ticket_number,
            status,
            award_title,
            award_image,
            created_at,
            ..
        } = entry.ticket;
        Self {
            id,
            ticket_number,
            status,
            award_title,
            award_image,
            created_at,
            transaction_reference: entry.transaction_reference,
            purchase_date: entry.purchase_date,
        }
    }
}

// GET /tickets/by-email?email=ana@example.com
async fn tickets_by_email(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let email = query
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing email".to_string()))?;

    let service = StatusService::new(state.store.clone(), state.gateway.clone());
    let response = match service.tickets_for_email(&email).await? {
        EmailTickets::UnknownEmail => json!({
            "found": false,
            "message": "No se encontraron boletas para este correo electrónico.",
        }),
        EmailTickets::NoActiveTickets => json!({
            "found": false,
            "message": "No tienes boletas activas en este momento.",
        }),
        EmailTickets::Found { customer, tickets } => {
            let tickets: Vec<CustomerTicketResponse> =
                tickets.into_iter().map(CustomerTicketResponse::from).collect();
            json!({
                "found": true,
                "customer": { "name": customer.full_name, "email": customer.email },
                "total": tickets.len(),
                "tickets": tickets,
            })
        }
    };

    Ok(Json(response))
}
