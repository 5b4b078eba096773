use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use crate::database::Database;
use crate::models::{Customer, Ticket, TicketStatus, Transaction, TransactionStatus};

use super::{
    CustomerDetails, CustomerTicket, NewTicket, NewTransaction, RaffleStore, StatusUpdate,
    StoreError, CUSTOMERS_CEDULA_UNIQUE, CUSTOMERS_EMAIL_UNIQUE,
};

/// Postgres-backed store. Uniqueness of references, ticket numbers and
/// per-transaction ordinals is enforced by the schema, so concurrent
/// writers race on constraints instead of application locks.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        PgStore { db }
    }

    async fn find_customer(
        &self,
        email: &str,
        cedula: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT id, full_name, email, phone, cedula, cedula_type, city, address, created_at
            FROM customers
            WHERE email = $1 OR cedula = $2
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(cedula)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(Customer::from))
    }

    async fn refresh_customer(
        &self,
        id: i64,
        details: &CustomerDetails,
    ) -> Result<Customer, StoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            UPDATE customers
            SET full_name = $2, email = $3, phone = $4, cedula_type = $5, city = $6, address = $7
            WHERE id = $1
            RETURNING id, full_name, email, phone, cedula, cedula_type, city, address, created_at
            "#,
        )
        .bind(id)
        .bind(&details.full_name)
        .bind(&details.email)
        .bind(&details.phone)
        .bind(&details.cedula_type)
        .bind(&details.city)
        .bind(&details.address)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl RaffleStore for PgStore {
    async fn upsert_customer(&self, details: &CustomerDetails) -> Result<Customer, StoreError> {
        if let Some(existing) = self.find_customer(&details.email, &details.cedula).await? {
            return self.refresh_customer(existing.id, details).await;
        }

        let inserted = sqlx::query_as::<_, CustomerRow>(
            r#"
            INSERT INTO customers (full_name, email, phone, cedula, cedula_type, city, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, full_name, email, phone, cedula, cedula_type, city, address, created_at
            "#,
        )
        .bind(&details.full_name)
        .bind(&details.email)
        .bind(&details.phone)
        .bind(&details.cedula)
        .bind(&details.cedula_type)
        .bind(&details.city)
        .bind(&details.address)
        .fetch_one(&self.db.pool)
        .await
        .map_err(StoreError::from);

        match inserted {
            Ok(row) => Ok(row.into()),
            // Lost an insert race: the row exists now, reuse it.
            Err(StoreError::Duplicate(constraint))
                if constraint == CUSTOMERS_EMAIL_UNIQUE
                    || constraint == CUSTOMERS_CEDULA_UNIQUE =>
            {
                match self.find_customer(&details.email, &details.cedula).await? {
                    Some(existing) => self.refresh_customer(existing.id, details).await,
                    None => Err(StoreError::Duplicate(constraint)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT id, full_name, email, phone, cedula, cedula_type, city, address, created_at
            FROM customers
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(Customer::from))
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions
                (reference, customer_id, gateway_transaction_id, status,
                 amount_in_cents, currency, items_data, description, metadata)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8)
            RETURNING id, reference, customer_id, gateway_transaction_id, status,
                      amount_in_cents, currency, items_data, description, metadata,
                      created_at, webhook_received_at, webhook_data
            "#,
        )
        .bind(new.reference)
        .bind(new.customer_id)
        .bind(new.gateway_transaction_id)
        .bind(new.amount_in_cents)
        .bind(new.currency)
        .bind(new.items_data)
        .bind(new.description)
        .bind(new.metadata)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(row.into())
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, reference, customer_id, gateway_transaction_id, status,
                   amount_in_cents, currency, items_data, description, metadata,
                   created_at, webhook_received_at, webhook_data
            FROM transactions
            WHERE reference = $1
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(Transaction::from))
    }

    async fn transaction_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, reference, customer_id, gateway_transaction_id, status,
                   amount_in_cents, currency, items_data, description, metadata,
                   created_at, webhook_received_at, webhook_data
            FROM transactions
            WHERE gateway_transaction_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(gateway_id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(Transaction::from))
    }

    async fn apply_status_update(
        &self,
        transaction_id: i64,
        update: StatusUpdate,
    ) -> Result<Option<Transaction>, StoreError> {
        // The WHERE clause carries the transition rule: pending may
        // move anywhere, a terminal status only onto itself. Zero rows
        // means the webhook arrived out of order or is a replay of a
        // conflicting status.
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = $2,
                gateway_transaction_id = $3,
                webhook_received_at = NOW(),
                webhook_data = $4,
                metadata = metadata || $5
            WHERE id = $1 AND status IN ('pending', $2)
            RETURNING id, reference, customer_id, gateway_transaction_id, status,
                      amount_in_cents, currency, items_data, description, metadata,
                      created_at, webhook_received_at, webhook_data
            "#,
        )
        .bind(transaction_id)
        .bind(update.status.as_str())
        .bind(update.gateway_transaction_id)
        .bind(update.webhook_data)
        .bind(update.metadata_patch)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(Transaction::from))
    }

    async fn tickets_exist(&self, transaction_id: i64) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE transaction_id = $1)",
        )
        .bind(transaction_id)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(exists)
    }

    async fn ticket_number_taken(&self, ticket_number: &str) -> Result<bool, StoreError> {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE ticket_number = $1)",
        )
        .bind(ticket_number)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(taken)
    }

    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> Result<Vec<Ticket>, StoreError> {
        let mut tx = self.db.pool.begin().await.map_err(StoreError::from)?;
        let mut inserted = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            let row = sqlx::query_as::<_, TicketRow>(
                r#"
                INSERT INTO tickets
                    (ticket_number, transaction_id, customer_id, seq, status, award_title, award_image)
                VALUES ($1, $2, $3, $4, 'active', $5, $6)
                RETURNING id, ticket_number, transaction_id, customer_id, seq, status,
                          award_title, award_image, created_at
                "#,
            )
            .bind(ticket.ticket_number)
            .bind(ticket.transaction_id)
            .bind(ticket.customer_id)
            .bind(ticket.seq)
            .bind(ticket.award_title)
            .bind(ticket.award_image)
            .fetch_one(&mut *tx)
            .await;

            match row {
                Ok(row) => inserted.push(Ticket::from(row)),
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(e.into());
                }
            }
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(inserted)
    }

    async fn tickets_by_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT id, ticket_number, transaction_id, customer_id, seq, status,
                   award_title, award_image, created_at
            FROM tickets
            WHERE transaction_id = $1
            ORDER BY seq
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(Ticket::from).collect())
    }

    async fn approved_tickets_by_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<CustomerTicket>, StoreError> {
        let rows = sqlx::query_as::<_, CustomerTicketRow>(
            r#"
            SELECT t.id, t.ticket_number, t.transaction_id, t.customer_id, t.seq, t.status,
                   t.award_title, t.award_image, t.created_at,
                   tr.reference AS transaction_reference, tr.created_at AS purchase_date
            FROM tickets t
            JOIN transactions tr ON tr.id = t.transaction_id
            WHERE t.customer_id = $1 AND tr.status = 'approved'
            ORDER BY t.created_at DESC, t.id DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(CustomerTicket::from).collect())
    }
}

/* ---------- row types ---------- */

#[derive(Debug, FromRow)]
struct CustomerRow {
    id: i64,
    full_name: String,
    email: String,
    phone: Option<String>,
    cedula: String,
    cedula_type: Option<String>,
    city: Option<String>,
    address: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            cedula: row.cedula,
            cedula_type: row.cedula_type,
            city: row.city,
            address: row.address,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    reference: String,
    customer_id: i64,
    gateway_transaction_id: Option<String>,
    status: String,
    amount_in_cents: i64,
    currency: String,
    items_data: Value,
    description: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    webhook_received_at: Option<DateTime<Utc>>,
    webhook_data: Option<Value>,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Transaction {
            id: row.id,
            reference: row.reference,
            customer_id: row.customer_id,
            gateway_transaction_id: row.gateway_transaction_id,
            status: TransactionStatus::parse(&row.status).unwrap_or(TransactionStatus::Error),
            amount_in_cents: row.amount_in_cents,
            currency: row.currency,
            items_data: row.items_data,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            webhook_received_at: row.webhook_received_at,
            webhook_data: row.webhook_data,
        }
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: i64,
    ticket_number: String,
    transaction_id: i64,
    customer_id: i64,
    seq: i32,
    status: String,
    award_title: String,
    award_image: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Ticket {
            id: row.id,
            ticket_number: row.ticket_number,
            transaction_id: row.transaction_id,
            customer_id: row.customer_id,
            seq: row.seq,
            status: TicketStatus::parse(&row.status).unwrap_or(TicketStatus::Active),
            award_title: row.award_title,
            award_image: row.award_image,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CustomerTicketRow {
    id: i64,
    ticket_number: String,
    transaction_id: i64,
    customer_id: i64,
    seq: i32,
    status: String,
    award_title: String,
    award_image: Option<String>,
    created_at: DateTime<Utc>,
    transaction_reference: String,
    purchase_date: DateTime<Utc>,
}

impl From<CustomerTicketRow> for CustomerTicket {
    fn from(row: CustomerTicketRow) -> Self {
        CustomerTicket {
            ticket: Ticket {
                id: row.id,
                ticket_number: row.ticket_number,
                transaction_id: row.transaction_id,
                customer_id: row.customer_id,
                seq: row.seq,
                status: TicketStatus::parse(&row.status).unwrap_or(TicketStatus::Active),
                award_title: row.award_title,
                award_image: row.award_image,
                created_at: row.created_at,
            },
            transaction_reference: row.transaction_reference,
            purchase_date: row.purchase_date,
        }
    }
}
