//! In-memory [`RaffleStore`] used by the test suites. Mirrors the
//! Postgres schema's unique constraints so concurrency paths behave
//! the same against both stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{Customer, Ticket, TicketStatus, Transaction, TransactionStatus};

use super::{
    CustomerDetails, CustomerTicket, NewTicket, NewTransaction, RaffleStore, StatusUpdate,
    StoreError, TICKETS_NUMBER_UNIQUE, TICKETS_TRANSACTION_SEQ_UNIQUE,
    TRANSACTIONS_REFERENCE_UNIQUE,
};

#[derive(Default)]
struct Inner {
    customers: Vec<Customer>,
    transactions: Vec<Transaction>,
    tickets: Vec<Ticket>,
    next_customer_id: i64,
    next_transaction_id: i64,
    next_ticket_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn merge_metadata(existing: &mut Value, patch: &Value) {
    match (existing.as_object_mut(), patch.as_object()) {
        (Some(base), Some(keys)) => {
            for (key, value) in keys {
                base.insert(key.clone(), value.clone());
            }
        }
        _ => *existing = patch.clone(),
    }
}

#[async_trait]
impl RaffleStore for MemoryStore {
    async fn upsert_customer(&self, details: &CustomerDetails) -> Result<Customer, StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(found) = inner
            .customers
            .iter_mut()
            .find(|c| c.email == details.email || c.cedula == details.cedula)
        {
            found.full_name = details.full_name.clone();
            found.email = details.email.clone();
            found.phone = details.phone.clone();
            found.cedula_type = details.cedula_type.clone();
            found.city = details.city.clone();
            found.address = details.address.clone();
            return Ok(found.clone());
        }

        inner.next_customer_id += 1;
        let customer = Customer {
            id: inner.next_customer_id,
            full_name: details.full_name.clone(),
            email: details.email.clone(),
            phone: details.phone.clone(),
            cedula: details.cedula.clone(),
            cedula_type: details.cedula_type.clone(),
            city: details.city.clone(),
            address: details.address.clone(),
            created_at: Utc::now(),
        };
        inner.customers.push(customer.clone());
        Ok(customer)
    }

    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.customers.iter().find(|c| c.email == email).cloned())
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.transactions.iter().any(|t| t.reference == new.reference) {
            return Err(StoreError::Duplicate(TRANSACTIONS_REFERENCE_UNIQUE.into()));
        }

        inner.next_transaction_id += 1;
        let transaction = Transaction {
            id: inner.next_transaction_id,
            reference: new.reference,
            customer_id: new.customer_id,
            gateway_transaction_id: Some(new.gateway_transaction_id),
            status: TransactionStatus::Pending,
            amount_in_cents: new.amount_in_cents,
            currency: new.currency,
            items_data: new.items_data,
            description: Some(new.description),
            metadata: new.metadata,
            created_at: Utc::now(),
            webhook_received_at: None,
            webhook_data: None,
        };
        inner.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .iter()
            .find(|t| t.reference == reference)
            .cloned())
    }

    async fn transaction_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .iter()
            .rev()
            .find(|t| t.gateway_transaction_id.as_deref() == Some(gateway_id))
            .cloned())
    }

    async fn apply_status_update(
        &self,
        transaction_id: i64,
        update: StatusUpdate,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut inner = self.inner.write().await;

        let Some(transaction) = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
        else {
            return Ok(None);
        };

        if !transaction.status.can_transition_to(update.status) {
            return Ok(None);
        }

        transaction.status = update.status;
        transaction.gateway_transaction_id = Some(update.gateway_transaction_id);
        transaction.webhook_received_at = Some(Utc::now());
        transaction.webhook_data = Some(update.webhook_data);
        merge_metadata(&mut transaction.metadata, &update.metadata_patch);
        Ok(Some(transaction.clone()))
    }

    async fn tickets_exist(&self, transaction_id: i64) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tickets
            .iter()
            .any(|t| t.transaction_id == transaction_id))
    }

    async fn ticket_number_taken(&self, ticket_number: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tickets
            .iter()
            .any(|t| t.ticket_number == ticket_number))
    }

    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> Result<Vec<Ticket>, StoreError> {
        let mut inner = self.inner.write().await;

        // Whole batch checked before anything lands, matching the
        // all-or-nothing transaction in the Postgres store.
        for (idx, new) in tickets.iter().enumerate() {
            let number_clash = inner
                .tickets
                .iter()
                .any(|t| t.ticket_number == new.ticket_number)
                || tickets[..idx]
                    .iter()
                    .any(|t| t.ticket_number == new.ticket_number);
            if number_clash {
                return Err(StoreError::Duplicate(TICKETS_NUMBER_UNIQUE.into()));
            }

            let seq_clash = inner
                .tickets
                .iter()
                .any(|t| t.transaction_id == new.transaction_id && t.seq == new.seq)
                || tickets[..idx]
                    .iter()
                    .any(|t| t.transaction_id == new.transaction_id && t.seq == new.seq);
            if seq_clash {
                return Err(StoreError::Duplicate(TICKETS_TRANSACTION_SEQ_UNIQUE.into()));
            }
        }

        let mut inserted = Vec::with_capacity(tickets.len());
        for new in tickets {
            inner.next_ticket_id += 1;
            let ticket = Ticket {
                id: inner.next_ticket_id,
                ticket_number: new.ticket_number,
                transaction_id: new.transaction_id,
                customer_id: new.customer_id,
                seq: new.seq,
                status: TicketStatus::Active,
                award_title: new.award_title,
                award_image: new.award_image,
                created_at: Utc::now(),
            };
            inner.tickets.push(ticket.clone());
            inserted.push(ticket);
        }
        Ok(inserted)
    }

    async fn tickets_by_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.read().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .iter()
            .filter(|t| t.transaction_id == transaction_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.seq);
        Ok(tickets)
    }

    async fn approved_tickets_by_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<CustomerTicket>, StoreError> {
        let inner = self.inner.read().await;

        let mut found: Vec<CustomerTicket> = inner
            .tickets
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .filter_map(|ticket| {
                let transaction = inner
                    .transactions
                    .iter()
                    .find(|tr| tr.id == ticket.transaction_id)?;
                if transaction.status != TransactionStatus::Approved {
                    return None;
                }
                Some(CustomerTicket {
                    ticket: ticket.clone(),
                    transaction_reference: transaction.reference.clone(),
                    purchase_date: transaction.created_at,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            b.ticket
                .created_at
                .cmp(&a.ticket.created_at)
                .then(b.ticket.id.cmp(&a.ticket.id))
        });
        Ok(found)
    }
}
