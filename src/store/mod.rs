pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Customer, Ticket, Transaction, TransactionStatus};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// Constraint names shared by the Postgres schema and the in-memory
// store, so callers can classify duplicate-key failures uniformly.
pub const TRANSACTIONS_REFERENCE_UNIQUE: &str = "transactions_reference_unique";
pub const TICKETS_NUMBER_UNIQUE: &str = "tickets_number_unique";
pub const TICKETS_TRANSACTION_SEQ_UNIQUE: &str = "tickets_transaction_seq_unique";
pub const CUSTOMERS_EMAIL_UNIQUE: &str = "customers_email_unique";
pub const CUSTOMERS_CEDULA_UNIQUE: &str = "customers_cedula_unique";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Unique-constraint violation, carrying the constraint name.
    #[error("duplicate key on constraint {0}")]
    Duplicate(String),
}

impl StoreError {
    pub fn is_duplicate_of(&self, constraint: &str) -> bool {
        matches!(self, StoreError::Duplicate(name) if name == constraint)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::Duplicate(constraint);
            }
        }
        StoreError::Database(err)
    }
}

/// Contact details captured at checkout, keyed by email or cedula.
#[derive(Debug, Clone)]
pub struct CustomerDetails {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cedula: String,
    pub cedula_type: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub customer_id: i64,
    pub gateway_transaction_id: String,
    pub amount_in_cents: i64,
    pub currency: String,
    pub items_data: Value,
    pub description: String,
    pub metadata: Value,
}

/// Webhook-driven status change. Applied atomically: the update only
/// lands if the stored status still permits the transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub gateway_transaction_id: String,
    pub webhook_data: Value,
    /// Shallow-merged into the existing metadata object; unrelated
    /// keys survive.
    pub metadata_patch: Value,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_number: String,
    pub transaction_id: i64,
    pub customer_id: i64,
    pub seq: i32,
    pub award_title: String,
    pub award_image: Option<String>,
}

/// Ticket joined with its purchase, for lookups by buyer email.
#[derive(Debug, Clone)]
pub struct CustomerTicket {
    pub ticket: Ticket,
    pub transaction_reference: String,
    pub purchase_date: DateTime<Utc>,
}

/// Persistence boundary of the service. Production wires [`PgStore`];
/// tests wire [`MemoryStore`]. Both enforce the same unique
/// constraints, which the issuance and checkout paths rely on for
/// concurrency control.
#[async_trait]
pub trait RaffleStore: Send + Sync {
    /// Finds a customer by email or cedula and refreshes their contact
    /// details, or inserts a new row.
    async fn upsert_customer(&self, details: &CustomerDetails) -> Result<Customer, StoreError>;

    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError>;

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, StoreError>;

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Looks up by the stored gateway id, which at creation time holds
    /// the payment-link id.
    async fn transaction_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Compare-and-set status update. Returns the updated row, or
    /// `None` when the stored status rejects the transition (or the id
    /// is unknown).
    async fn apply_status_update(
        &self,
        transaction_id: i64,
        update: StatusUpdate,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn tickets_exist(&self, transaction_id: i64) -> Result<bool, StoreError>;

    async fn ticket_number_taken(&self, ticket_number: &str) -> Result<bool, StoreError>;

    /// Inserts the whole batch atomically. Any unique violation aborts
    /// the batch and surfaces as [`StoreError::Duplicate`].
    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> Result<Vec<Ticket>, StoreError>;

    async fn tickets_by_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// Tickets belonging to approved transactions of one customer,
    /// newest first.
    async fn approved_tickets_by_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<CustomerTicket>, StoreError>;
}
