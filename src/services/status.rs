//! Read paths: payment status by reference and ticket lookups for the
//! storefront's verification and "my tickets" pages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::errors::ApiError;
use crate::models::{Customer, Ticket, TransactionStatus};
use crate::services::gateway::WompiClient;
use crate::store::{CustomerTicket, RaffleStore};

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionSummary>,
}

/// Either our stored row or, before the first webhook lands, whatever
/// the gateway reports for the reference.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TransactionSummary {
    Stored {
        id: i64,
        reference: String,
        status: TransactionStatus,
        amount_in_cents: i64,
        created_at: DateTime<Utc>,
        webhook_received_at: Option<DateTime<Utc>>,
    },
    Gateway {
        id: String,
        reference: Option<String>,
        status: String,
        amount_in_cents: Option<i64>,
    },
}

#[derive(Debug)]
pub struct TicketsByReference {
    pub tickets: Vec<Ticket>,
    pub transaction_status: TransactionStatus,
}

#[derive(Debug)]
pub enum EmailTickets {
    /// No customer is registered under the email.
    UnknownEmail,
    /// The customer exists but none of their purchases is approved.
    NoActiveTickets,
    Found {
        customer: Customer,
        tickets: Vec<CustomerTicket>,
    },
}

pub struct StatusService {
    store: Arc<dyn RaffleStore>,
    gateway: WompiClient,
}

impl StatusService {
    pub fn new(store: Arc<dyn RaffleStore>, gateway: WompiClient) -> Self {
        Self { store, gateway }
    }

    /// Storage is authoritative once a webhook has landed; before
    /// that the gateway is consulted directly. Nothing the gateway
    /// reports here is persisted, webhooks stay the only writer.
    pub async fn payment_status(
        &self,
        reference: &str,
    ) -> Result<PaymentStatusResponse, ApiError> {
        if let Some(transaction) = self.store.transaction_by_reference(reference).await? {
            let status = transaction.status.to_string();
            return Ok(PaymentStatusResponse {
                message: format!("Pago {}", status),
                status,
                transaction: Some(TransactionSummary::Stored {
                    id: transaction.id,
                    reference: transaction.reference,
                    status: transaction.status,
                    amount_in_cents: transaction.amount_in_cents,
                    created_at: transaction.created_at,
                    webhook_received_at: transaction.webhook_received_at,
                }),
            });
        }

        info!(
            "Reference {} not stored; querying the gateway directly",
            reference
        );
        match self.gateway.find_transaction(reference).await? {
            Some(remote) => {
                let status = remote.status.to_lowercase();
                Ok(PaymentStatusResponse {
                    message: format!("Pago {}", status),
                    status: status.clone(),
                    transaction: Some(TransactionSummary::Gateway {
                        id: remote.id,
                        reference: remote.reference,
                        status,
                        amount_in_cents: remote.amount_in_cents,
                    }),
                })
            }
            None => Ok(PaymentStatusResponse {
                status: "pending".into(),
                message: "Payment not found yet".into(),
                transaction: None,
            }),
        }
    }

    pub async fn tickets_for_reference(
        &self,
        reference: &str,
    ) -> Result<TicketsByReference, ApiError> {
        let Some(transaction) = self.store.transaction_by_reference(reference).await? else {
            return Err(ApiError::NotFound("Transaction not found".into()));
        };
        let tickets = self.store.tickets_by_transaction(transaction.id).await?;
        Ok(TicketsByReference {
            tickets,
            transaction_status: transaction.status,
        })
    }

    /// Email lookups are normalized to lowercase before matching.
    pub async fn tickets_for_email(&self, email: &str) -> Result<EmailTickets, ApiError> {
        let normalized = email.trim().to_lowercase();
        let Some(customer) = self.store.customer_by_email(&normalized).await? else {
            return Ok(EmailTickets::UnknownEmail);
        };
        let tickets = self
            .store
            .approved_tickets_by_customer(customer.id)
            .await?;
        if tickets.is_empty() {
            return Ok(EmailTickets::NoActiveTickets);
        }
        Ok(EmailTickets::Found { customer, tickets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, WompiConfig};
    use crate::store::{CustomerDetails, MemoryStore, NewTransaction, StatusUpdate};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(api_url: &str) -> WompiClient {
        WompiClient::from_config(
            &WompiConfig {
                api_url: api_url.to_string(),
                checkout_url: "https://checkout.wompi.co".to_string(),
                private_key: "prv_test_secret".to_string(),
                events_secret: "events".to_string(),
                integrity_key: String::new(),
                currency: "COP".to_string(),
            },
            &CircuitBreakerConfig {
                failure_threshold: 5,
                cooldown_seconds: 60,
            },
        )
    }

    async fn seed(store: &MemoryStore, reference: &str, email: &str) -> (i64, i64) {
        let customer = store
            .upsert_customer(&CustomerDetails {
                full_name: "Ana Pérez".into(),
                email: email.into(),
                phone: None,
                cedula: format!("ced-{email}"),
                cedula_type: Some("CC".into()),
                city: None,
                address: None,
            })
            .await
            .unwrap();
        let transaction = store
            .insert_transaction(NewTransaction {
                reference: reference.into(),
                customer_id: customer.id,
                gateway_transaction_id: "LNK1".into(),
                amount_in_cents: 100_000,
                currency: "COP".into(),
                items_data: json!([{"title": "Rifa", "quantity": 1}]),
                description: "Rifa x1".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        (customer.id, transaction.id)
    }

    async fn approve(store: &MemoryStore, transaction_id: i64) {
        store
            .apply_status_update(
                transaction_id,
                StatusUpdate {
                    status: TransactionStatus::Approved,
                    gateway_transaction_id: "tx-1".into(),
                    webhook_data: json!({}),
                    metadata_patch: json!({}),
                },
            )
            .await
            .unwrap()
            .expect("must approve");
    }

    #[tokio::test]
    async fn stored_transaction_answers_without_gateway_call() {
        let server = MockServer::start().await;
        // No mock mounted: a gateway call would get a 404 and fail
        // the test.
        let store = MemoryStore::new();
        let (_, transaction_id) = seed(&store, "order-20-a", "ana@example.com").await;
        approve(&store, transaction_id).await;

        let service = StatusService::new(Arc::new(store), gateway_for(&server.uri()));
        let response = service.payment_status("order-20-a").await.unwrap();

        assert_eq!(response.status, "approved");
        assert_eq!(response.message, "Pago approved");
        assert!(matches!(
            response.transaction,
            Some(TransactionSummary::Stored {
                status: TransactionStatus::Approved,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unknown_reference_falls_back_to_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions"))
            .and(query_param("reference", "order-21-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "tx-7", "status": "DECLINED", "reference": "order-21-b"}]
            })))
            .mount(&server)
            .await;

        let service =
            StatusService::new(Arc::new(MemoryStore::new()), gateway_for(&server.uri()));
        let response = service.payment_status("order-21-b").await.unwrap();

        assert_eq!(response.status, "declined");
        assert!(matches!(
            response.transaction,
            Some(TransactionSummary::Gateway { ref id, .. }) if id == "tx-7"
        ));
    }

    #[tokio::test]
    async fn missing_everywhere_reads_as_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let service =
            StatusService::new(Arc::new(MemoryStore::new()), gateway_for(&server.uri()));
        let response = service.payment_status("order-22-c").await.unwrap();

        assert_eq!(response.status, "pending");
        assert_eq!(response.message, "Payment not found yet");
        assert!(response.transaction.is_none());
    }

    #[tokio::test]
    async fn tickets_by_reference_requires_a_transaction() {
        let server = MockServer::start().await;
        let service =
            StatusService::new(Arc::new(MemoryStore::new()), gateway_for(&server.uri()));

        let err = service.tickets_for_reference("order-23-d").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn email_lookup_only_returns_approved_purchases() {
        let server = MockServer::start().await;
        let store = MemoryStore::new();

        let (customer_id, approved_tx) = seed(&store, "order-24-e", "ana@example.com").await;
        approve(&store, approved_tx).await;
        store
            .insert_tickets(vec![crate::store::NewTicket {
                ticket_number: "000042".into(),
                transaction_id: approved_tx,
                customer_id,
                seq: 0,
                award_title: "Rifa".into(),
                award_image: None,
            }])
            .await
            .unwrap();

        // Second, still-pending purchase by the same buyer.
        let pending_tx = store
            .insert_transaction(NewTransaction {
                reference: "order-25-f".into(),
                customer_id,
                gateway_transaction_id: "LNK2".into(),
                amount_in_cents: 50_000,
                currency: "COP".into(),
                items_data: json!([{"title": "Rifa", "quantity": 1}]),
                description: "Rifa x1".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .insert_tickets(vec![crate::store::NewTicket {
                ticket_number: "000043".into(),
                transaction_id: pending_tx.id,
                customer_id,
                seq: 0,
                award_title: "Rifa".into(),
                award_image: None,
            }])
            .await
            .unwrap();

        let service = StatusService::new(Arc::new(store), gateway_for(&server.uri()));
        let result = service.tickets_for_email("  ANA@example.com ").await;

        // Lookup normalizes case and whitespace; storage holds the
        // email as submitted at checkout.
        let EmailTickets::Found { customer, tickets } = result.unwrap() else {
            panic!("expected a match");
        };
        assert_eq!(customer.id, customer_id);
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].ticket.ticket_number, "000042");
        assert_eq!(tickets[0].transaction_reference, "order-24-e");
    }

    #[tokio::test]
    async fn email_lookup_without_customer_reports_unknown() {
        let server = MockServer::start().await;
        let service =
            StatusService::new(Arc::new(MemoryStore::new()), gateway_for(&server.uri()));

        let result = service.tickets_for_email("nobody@example.com").await.unwrap();
        assert!(matches!(result, EmailTickets::UnknownEmail));
    }

    #[tokio::test]
    async fn email_lookup_with_only_pending_purchases_reports_no_active_tickets() {
        let server = MockServer::start().await;
        let store = MemoryStore::new();
        seed(&store, "order-26-g", "ana@example.com").await;

        let service = StatusService::new(Arc::new(store), gateway_for(&server.uri()));
        let result = service.tickets_for_email("ana@example.com").await.unwrap();

        assert!(matches!(result, EmailTickets::NoActiveTickets));
    }
}
