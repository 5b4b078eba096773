pub mod checkout;
pub mod gateway;
pub mod issuer;
pub mod reconciliation;
pub mod signature;
pub mod status;
