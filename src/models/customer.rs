use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    /// National id number; together with email it identifies a
    /// returning buyer at checkout.
    pub cedula: String,
    pub cedula_type: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}
