//! Webhook signature verification.
//!
//! Wompi deployments differ in how they sign events, so verification
//! runs an ordered list of strategies and accepts on the first match:
//!
//! 1. HMAC-SHA256 of the raw body against a signature header.
//! 2. `x-event-checksum` header equal to the body's `signature.checksum`.
//! 3. Recomputing `signature.checksum` from `signature.properties` and
//!    the integrity key.
//!
//! A strategy whose inputs are absent is skipped rather than rejected;
//! the event is unauthorized only when no strategy accepts.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Headers checked for the raw-body HMAC, in order.
const SIGNATURE_HEADERS: [&str; 3] = ["x-wompi-signature", "x-event-signature", "x-signature"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    /// The strategy's inputs are missing from this event.
    NotApplicable,
}

pub struct SignatureVerifier {
    events_secret: String,
    integrity_key: String,
}

impl SignatureVerifier {
    pub fn new(events_secret: impl Into<String>, integrity_key: impl Into<String>) -> Self {
        Self {
            events_secret: events_secret.into(),
            integrity_key: integrity_key.into(),
        }
    }

    pub fn verify(&self, raw_body: &[u8], headers: &HeaderMap, event: &Value) -> bool {
        let strategies = [
            ("header-hmac", self.header_hmac(raw_body, headers)),
            ("checksum-header", self.checksum_header(headers, event)),
            ("embedded-checksum", self.embedded_checksum(event)),
        ];

        for (name, verdict) in strategies {
            match verdict {
                Verdict::Accept => {
                    debug!("Webhook signature accepted by strategy '{}'", name);
                    return true;
                }
                Verdict::Reject => {
                    warn!("Webhook signature strategy '{}' rejected the event", name);
                }
                Verdict::NotApplicable => {}
            }
        }
        false
    }

    fn header_hmac(&self, raw_body: &[u8], headers: &HeaderMap) -> Verdict {
        let provided = SIGNATURE_HEADERS
            .iter()
            .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));
        let Some(provided) = provided else {
            return Verdict::NotApplicable;
        };

        let mut mac = HmacSha256::new_from_slice(self.events_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        if expected == provided {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    fn checksum_header(&self, headers: &HeaderMap, event: &Value) -> Verdict {
        let Some(provided) = headers.get("x-event-checksum").and_then(|v| v.to_str().ok())
        else {
            return Verdict::NotApplicable;
        };
        let Some(embedded) = event.pointer("/signature/checksum").and_then(Value::as_str)
        else {
            return Verdict::NotApplicable;
        };

        if provided == embedded {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    fn embedded_checksum(&self, event: &Value) -> Verdict {
        if self.integrity_key.is_empty() {
            return Verdict::NotApplicable;
        }
        let Some(checksum) = event.pointer("/signature/checksum").and_then(Value::as_str)
        else {
            return Verdict::NotApplicable;
        };
        let Some(properties) = event.pointer("/signature/properties").and_then(Value::as_array)
        else {
            return Verdict::NotApplicable;
        };

        let data = event.get("data").unwrap_or(&Value::Null);
        let mut concatenated = String::new();
        for property in properties {
            let Some(path) = property.as_str() else {
                continue;
            };
            concatenated.push_str(&resolve_property(data, path));
        }
        concatenated.push_str(&self.integrity_key);

        let mut hasher = Sha256::new();
        hasher.update(concatenated.as_bytes());
        let computed = format!("{:x}", hasher.finalize());

        if computed == checksum {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}

/// Resolves a dot path like `transaction.amount_in_cents` inside the
/// event's `data` object. Missing or null values become the empty
/// string so they drop out of the checksum input.
fn resolve_property(data: &Value, path: &str) -> String {
    let mut current = data;
    for key in path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
