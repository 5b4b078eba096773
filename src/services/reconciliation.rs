//! Reconciliation of gateway webhook events against stored
//! transactions.
//!
//! An event is matched to a transaction through three lookups, in
//! order: the `reference` query parameter of the event's
//! `redirect_url`, the stored payment-link id, and finally the
//! gateway's own `reference` field. The matched transaction moves
//! through the status transition table; an approved landing triggers
//! ticket issuance.
//!
//! Events that reference nothing we know are acknowledged and dropped,
//! so the gateway stops redelivering them.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::models::TransactionStatus;
use crate::services::issuer::TicketIssuer;
use crate::store::{RaffleStore, StatusUpdate};

#[derive(Debug)]
pub enum WebhookOutcome {
    /// The transition applied (including a terminal status
    /// re-confirming itself).
    Applied {
        reference: String,
        status: TransactionStatus,
    },
    /// The stored status rejects the reported one; nothing changed.
    Ignored {
        reference: String,
        current: TransactionStatus,
        reported: TransactionStatus,
    },
    /// The gateway reported a status outside the known set.
    UnknownStatus(String),
    /// No stored transaction matches the event.
    UnknownTransaction,
}

pub struct ReconciliationService {
    store: Arc<dyn RaffleStore>,
    issuer: TicketIssuer,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn RaffleStore>) -> Self {
        Self {
            issuer: TicketIssuer::new(store.clone()),
            store,
        }
    }

    /// Processes one verified webhook event. Storage failures bubble
    /// up so the handler can answer 5xx and the gateway redelivers.
    pub async fn process_event(&self, event: &Value) -> Result<WebhookOutcome, ApiError> {
        let transaction_data = event
            .pointer("/data/transaction")
            .filter(|v| v.is_object())
            .ok_or_else(|| {
                ApiError::Validation("Invalid webhook payload: missing data.transaction".into())
            })?;

        let status_raw = string_field(transaction_data, "status").ok_or_else(|| {
            ApiError::Validation("Invalid webhook payload: missing transaction status".into())
        })?;
        let gateway_id = string_field(transaction_data, "id").ok_or_else(|| {
            ApiError::Validation("Invalid webhook payload: missing transaction id".into())
        })?;

        let Some(transaction) = self.find_transaction(transaction_data).await? else {
            warn!(
                "Webhook for unknown transaction (gateway id {}); acknowledging without update",
                gateway_id
            );
            return Ok(WebhookOutcome::UnknownTransaction);
        };

        let Some(next_status) = TransactionStatus::parse(&status_raw) else {
            warn!(
                "Webhook reported unknown status '{}' for {}; ignoring",
                status_raw, transaction.reference
            );
            return Ok(WebhookOutcome::UnknownStatus(status_raw));
        };

        if let Some(reported) = transaction_data.get("amount_in_cents").and_then(Value::as_i64)
        {
            if reported != transaction.amount_in_cents {
                warn!(
                    "Webhook amount {} differs from stored amount {} for {}",
                    reported, transaction.amount_in_cents, transaction.reference
                );
            }
        }

        let update = StatusUpdate {
            status: next_status,
            gateway_transaction_id: gateway_id,
            webhook_data: event.get("data").cloned().unwrap_or(Value::Null),
            metadata_patch: json!({
                "gateway_status": status_raw,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        };

        let Some(updated) = self
            .store
            .apply_status_update(transaction.id, update)
            .await?
        else {
            info!(
                "Ignoring webhook for {}: status {} does not accept {}",
                transaction.reference, transaction.status, next_status
            );
            return Ok(WebhookOutcome::Ignored {
                reference: transaction.reference,
                current: transaction.status,
                reported: next_status,
            });
        };

        info!(
            "Transaction {} moved to {} by webhook",
            updated.reference, updated.status
        );

        if updated.status == TransactionStatus::Approved {
            self.issuer.issue_for_transaction(&updated).await?;
        }

        Ok(WebhookOutcome::Applied {
            reference: updated.reference,
            status: updated.status,
        })
    }

    async fn find_transaction(
        &self,
        transaction_data: &Value,
    ) -> Result<Option<crate::models::Transaction>, ApiError> {
        if let Some(reference) = transaction_data
            .get("redirect_url")
            .and_then(Value::as_str)
            .and_then(reference_from_redirect_url)
        {
            if let Some(found) = self.store.transaction_by_reference(&reference).await? {
                return Ok(Some(found));
            }
        }

        if let Some(link_id) = string_field(transaction_data, "payment_link_id") {
            if let Some(found) = self.store.transaction_by_gateway_id(&link_id).await? {
                return Ok(Some(found));
            }
        }

        if let Some(reference) = string_field(transaction_data, "reference") {
            if let Some(found) = self.store.transaction_by_reference(&reference).await? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls the `reference` query parameter out of the redirect URL the
/// payment link was created with.
fn reference_from_redirect_url(url: &str) -> Option<String> {
    // Anything after '#' is fragment, not query.
    let url = url.split_once('#').map_or(url, |(head, _)| head);
    let (_, query) = url.split_once('?')?;
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs
        .into_iter()
        .find(|(key, _)| key == "reference")
        .map(|(_, value)| value)
}
