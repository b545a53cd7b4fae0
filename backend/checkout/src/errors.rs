//! Infrastructure-level error types.
//!
//! Domain failures (selection, wallet, builder, ledger, orchestrator) carry
//! their own enums next to the code that raises them. This type covers the
//! plumbing: configuration, storage, HTTP and (de)serialisation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
