use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Shared Postgres pool. Schema migrations ship embedded in the binary
/// and are applied at startup, before the server accepts traffic.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;
        info!(pool_size = config.pool_size, "Connected to Postgres");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Applying embedded migrations");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("Schema is up to date");
        Ok(())
    }
}
