//! Checkout: turns a validated cart into a pending transaction and a
//! hosted payment link.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ApiError;
use crate::models::CartItem;
use crate::services::gateway::{PaymentLinkRequest, WompiClient};
use crate::store::{CustomerDetails, NewTransaction, RaffleStore};

/// Gateway caps payment-link descriptions at this many bytes.
const MAX_DESCRIPTION_LEN: usize = 255;

const PAYMENT_LINK_NAME: &str = "Orden de compra";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomerInput {
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub cedula: Option<String>,
    #[serde(rename = "cedulaType", default)]
    pub cedula_type: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(rename = "totalAmount")]
    pub total_amount: Option<f64>,
    pub customer: Option<CustomerInput>,
}

#[derive(Debug, Clone)]
pub struct CreatedCheckout {
    pub payment_link: String,
    pub reference: String,
}

pub struct CheckoutService {
    store: Arc<dyn RaffleStore>,
    gateway: WompiClient,
    base_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn RaffleStore>,
        gateway: WompiClient,
        base_url: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            base_url: base_url.into(),
            currency: currency.into(),
        }
    }

    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CreatedCheckout, ApiError> {
        let (items, total_amount, customer_input) = validate(&request)?;

        let customer = self
            .store
            .upsert_customer(&CustomerDetails {
                full_name: field(&customer_input.full_name),
                email: field(&customer_input.email),
                phone: customer_input.phone.clone(),
                cedula: field(&customer_input.cedula),
                cedula_type: customer_input.cedula_type.clone(),
                city: customer_input.city.clone(),
                address: customer_input.address.clone(),
            })
            .await?;

        let reference = format!("order-{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4());
        let description = build_description(items);
        let amount_in_cents = (total_amount * 100.0).round() as i64;

        let link = self
            .gateway
            .create_payment_link(&PaymentLinkRequest {
                name: PAYMENT_LINK_NAME.to_string(),
                description: description.clone(),
                single_use: false,
                collect_shipping: false,
                currency: self.currency.clone(),
                amount_in_cents,
                reference: reference.clone(),
                redirect_url: format!(
                    "{}/payment/verification?reference={}",
                    self.base_url, reference
                ),
            })
            .await?;

        let metadata = json!({
            "payment_link": link.url,
            "created_at": Utc::now().to_rfc3339(),
        });

        let inserted = self
            .store
            .insert_transaction(NewTransaction {
                reference: reference.clone(),
                customer_id: customer.id,
                gateway_transaction_id: link.id.clone(),
                amount_in_cents,
                currency: self.currency.clone(),
                items_data: serde_json::to_value(items).unwrap_or_else(|_| json!([])),
                description,
                metadata,
            })
            .await;

        match inserted {
            Ok(transaction) => {
                info!(
                    "Created pending transaction {} for payment link {}",
                    transaction.reference, link.id
                );
            }
            // The customer already has a working payment link; losing
            // the row only degrades later reconciliation, so hand the
            // link back anyway.
            Err(e) => {
                error!(
                    "Failed to record transaction {} after creating payment link {}: {}",
                    reference, link.id, e
                );
            }
        }

        Ok(CreatedCheckout {
            payment_link: link.url,
            reference,
        })
    }
}

fn field(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn validate(
    request: &CreatePaymentRequest,
) -> Result<(&[CartItem], f64, &CustomerInput), ApiError> {
    let mut missing = Vec::new();
    if request.items.is_empty() {
        missing.push("items");
    }
    if request.total_amount.map_or(true, |v| v <= 0.0) {
        missing.push("totalAmount");
    }
    match &request.customer {
        None => missing.push("customer"),
        Some(customer) => {
            if is_blank(&customer.full_name) {
                missing.push("customer.fullName");
            }
            if is_blank(&customer.email) {
                missing.push("customer.email");
            }
            if is_blank(&customer.cedula) {
                missing.push("customer.cedula");
            }
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let (Some(customer), Some(total_amount)) = (&request.customer, request.total_amount) else {
        return Err(ApiError::Validation(
            "Missing required fields: customer, totalAmount".into(),
        ));
    };
    customer.validate().map_err(|_| {
        ApiError::Validation("customer.email is not a valid email address".into())
    })?;

    Ok((&request.items, total_amount, customer))
}

/// Joins `{title} x{quantity}` lines and truncates to the gateway's
/// limit without splitting a multi-byte character.
fn build_description(items: &[CartItem]) -> String {
    let description = items
        .iter()
        .map(|item| format!("{} x{}", item.display_title(), item.quantity))
        .collect::<Vec<_>>()
        .join(", ");
    truncate_on_char_boundary(description, MAX_DESCRIPTION_LEN)
}

fn truncate_on_char_boundary(mut text: String, max_len: usize) -> String {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
