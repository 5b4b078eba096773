pub mod config;
pub mod controllers;
pub mod database;
pub mod errors;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::gateway::WompiClient;
use crate::store::RaffleStore;

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RaffleStore>,
    pub gateway: WompiClient,
    pub config: config::Config,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RaffleStore>,
        gateway: WompiClient,
        config: config::Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateway,
            config,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Sorteo API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .merge(controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
