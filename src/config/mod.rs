use serde::Deserialize;
use std::env;

// Top-level configuration, assembled once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub wompi: WompiConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    // Public origin used to build payment redirect URLs
    pub base_url: String,
}

// Database settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Wompi payment gateway settings
#[derive(Debug, Clone, Deserialize)]
pub struct WompiConfig {
    pub api_url: String,
    pub checkout_url: String,
    pub private_key: String,
    pub events_secret: String,
    pub integrity_key: String,
    pub currency: String,
}

// Circuit breaker settings for outbound gateway calls
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "raffle_system=debug,tower_http=debug".to_string()),
                base_url: env::var("BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            wompi: WompiConfig {
                api_url: env::var("WOMPI_API_URL")
                    .unwrap_or_else(|_| "https://sandbox.wompi.co".to_string()),
                checkout_url: env::var("WOMPI_CHECKOUT_URL")
                    .unwrap_or_else(|_| "https://checkout.wompi.co".to_string()),
                private_key: env::var("WOMPI_PRIVATE_KEY").expect("WOMPI_PRIVATE_KEY must be set"),
                events_secret: env::var("WOMPI_EVENTS_SECRET").unwrap_or_default(),
                integrity_key: env::var("WOMPI_INTEGRITY_KEY").unwrap_or_default(),
                currency: env::var("CURRENCY").unwrap_or_else(|_| "COP".to_string()),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                cooldown_seconds: env::var("CIRCUIT_BREAKER_COOLDOWN_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_COOLDOWN_SECONDS must be a valid number"),
            },
        }
    }
}
