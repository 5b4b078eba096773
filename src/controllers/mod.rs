pub mod payments;
pub mod tickets;
pub mod webhook;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(payments::routes())
        .merge(tickets::routes())
        .merge(webhook::routes())
}
