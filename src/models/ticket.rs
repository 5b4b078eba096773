use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Void,
}

impl TicketStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    /// Six-digit zero-padded raffle number, unique across the system.
    pub ticket_number: String,
    pub transaction_id: i64,
    pub customer_id: i64,
    /// Ordinal of the ticket within its transaction, starting at 0.
    pub seq: i32,
    pub status: TicketStatus,
    pub award_title: String,
    pub award_image: Option<String>,
    pub created_at: DateTime<Utc>,
}
