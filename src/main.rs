use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raffle_system::{
    build_router,
    config::Config,
    database::Database,
    services::gateway::WompiClient,
    store::postgres::PgStore,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sorteo API");

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    // Wire the payment gateway client and the shared application state
    let gateway = WompiClient::from_config(&config.wompi, &config.circuit_breaker);
    let app_state = AppState::new(Arc::new(PgStore::new(db)), gateway, config.clone());

    let app = build_router(app_state);

    let host: std::net::IpAddr = config
        .app
        .host
        .parse()
        .expect("HOST must be a valid IP address");
    let addr = SocketAddr::from((host, config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}
