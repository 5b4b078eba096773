//! Raffle ticket issuance for approved transactions.
//!
//! Issuance is idempotent per transaction: a check-then-insert guarded
//! by the per-transaction ordinal constraint, so two concurrent
//! webhooks can both try and exactly one batch lands.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::models::{Ticket, Transaction};
use crate::store::{NewTicket, RaffleStore, StoreError, TICKETS_TRANSACTION_SEQ_UNIQUE};

/// Draws from the full six-digit space before giving up on randomness.
const MAX_RANDOM_ATTEMPTS: usize = 10;

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(Vec<Ticket>),
    /// Tickets already exist, either from an earlier webhook or from a
    /// concurrent issuance that won the insert race.
    AlreadyIssued,
}

pub struct TicketIssuer {
    store: Arc<dyn RaffleStore>,
}

impl TicketIssuer {
    pub fn new(store: Arc<dyn RaffleStore>) -> Self {
        Self { store }
    }

    /// Issues one ticket per unit of quantity in the transaction's
    /// cart snapshot. Returns [`IssueOutcome::AlreadyIssued`] without
    /// touching storage when tickets for the transaction exist.
    pub async fn issue_for_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<IssueOutcome, StoreError> {
        if self.store.tickets_exist(transaction.id).await? {
            info!(
                "Tickets already issued for transaction {}; skipping",
                transaction.reference
            );
            return Ok(IssueOutcome::AlreadyIssued);
        }

        let items = transaction.cart_items();
        if items.is_empty() {
            warn!(
                "Transaction {} has no cart items; nothing to issue",
                transaction.reference
            );
            return Ok(IssueOutcome::Issued(Vec::new()));
        }

        let mut batch = Vec::new();
        let mut drawn = HashSet::new();
        let mut seq = 0i32;
        for item in &items {
            let award_title = item.display_title().to_string();
            for _ in 0..item.quantity {
                let ticket_number = self.next_ticket_number(&mut drawn).await?;
                batch.push(NewTicket {
                    ticket_number,
                    transaction_id: transaction.id,
                    customer_id: transaction.customer_id,
                    seq,
                    award_title: award_title.clone(),
                    award_image: item.image.clone(),
                });
                seq += 1;
            }
        }

        match self.store.insert_tickets(batch).await {
            Ok(tickets) => {
                info!(
                    "Issued {} tickets for transaction {}",
                    tickets.len(),
                    transaction.reference
                );
                Ok(IssueOutcome::Issued(tickets))
            }
            Err(e) if e.is_duplicate_of(TICKETS_TRANSACTION_SEQ_UNIQUE) => {
                info!(
                    "Concurrent issuance won for transaction {}; keeping existing tickets",
                    transaction.reference
                );
                Ok(IssueOutcome::AlreadyIssued)
            }
            // Ticket-number collisions and storage failures propagate;
            // the webhook answers 5xx and the gateway redelivers.
            Err(e) => Err(e),
        }
    }

    /// Draws a random six-digit number not yet present in storage or
    /// in the batch being built. After [`MAX_RANDOM_ATTEMPTS`] misses
    /// it degrades to a timestamp-derived number, which is logged
    /// because that number is not collision-proof.
    async fn next_ticket_number(
        &self,
        drawn: &mut HashSet<String>,
    ) -> Result<String, StoreError> {
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let candidate = format!("{:06}", rand::thread_rng().gen_range(0..=999_999u32));
            if drawn.contains(&candidate) {
                continue;
            }
            if self.store.ticket_number_taken(&candidate).await? {
                continue;
            }
            drawn.insert(candidate.clone());
            return Ok(candidate);
        }

        let fallback = timestamp_ticket_number(Utc::now().timestamp_millis());
        warn!(
            "Random ticket numbers exhausted after {} attempts; using timestamp-derived number {}",
            MAX_RANDOM_ATTEMPTS, fallback
        );
        drawn.insert(fallback.clone());
        Ok(fallback)
    }
}

/// Last six digits of a unix-millis timestamp, zero-padded.
fn timestamp_ticket_number(millis: i64) -> String {
    let digits = millis.to_string();
    let tail = &digits[digits.len().saturating_sub(6)..];
    format!("{:0>6}", tail)
}
