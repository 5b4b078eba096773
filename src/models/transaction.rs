use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a payment transaction as reported by the gateway.
///
/// `Pending` is the only non-terminal state. Terminal states never
/// change once reached; a replayed webhook carrying the same terminal
/// state is still a valid (idempotent) transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    Voided,
    Error,
}

impl TransactionStatus {
    /// Parses a gateway-reported status, case-insensitively.
    /// Returns `None` for statuses outside the known set.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            "voided" => Some(Self::Voided),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Voided => "voided",
            Self::Error => "error",
        }
    }

    /// Whether a transaction currently in `self` may move to `next`.
    ///
    /// Pending accepts any status. A terminal status accepts only
    /// itself, which makes duplicate webhook deliveries no-ops instead
    /// of errors. Everything else is ignored by the caller.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == Self::Pending || *self == next
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the cart snapshot stored on the transaction.
///
/// The snapshot is what ticket issuance reads later, so orders keep
/// issuing correctly even if the catalog changes after checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl CartItem {
    /// Item title with the storefront's catch-all award name as the
    /// fallback for snapshots missing one.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Premio")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub reference: String,
    pub customer_id: i64,
    /// Payment-link id at creation time, replaced by the gateway's
    /// transaction id once a webhook arrives.
    pub gateway_transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub amount_in_cents: i64,
    pub currency: String,
    pub items_data: Value,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub webhook_received_at: Option<DateTime<Utc>>,
    pub webhook_data: Option<Value>,
}

impl Transaction {
    /// Deserializes the cart snapshot. Rows written by this service
    /// always hold an array; anything else yields an empty cart.
    pub fn cart_items(&self) -> Vec<CartItem> {
        serde_json::from_value(self.items_data.clone()).unwrap_or_default()
    }
}
