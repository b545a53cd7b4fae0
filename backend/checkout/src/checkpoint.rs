//! Checkpoint store: persists the latest [`PaymentState`] so an interrupted
//! attempt can be resumed after a restart.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::errors::Result;
use crate::types::PaymentState;

/// Open (creating if needed) the SQLite database and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Checkpoint row
// ─────────────────────────────────────────────────────────

/// Overwrite the checkpoint with `state`.
pub async fn save_checkpoint(pool: &SqlitePool, state: &PaymentState) -> Result<()> {
    let json = serde_json::to_string(state)?;
    sqlx::query(
        r#"
        INSERT INTO payment_checkpoint (id, status, state, updated_at)
        VALUES (1, ?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET
            status     = excluded.status,
            state      = excluded.state,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(state.status.as_str())
    .bind(json)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// The last saved state, or `None` on a fresh database.
pub async fn load_checkpoint(pool: &SqlitePool) -> Result<Option<PaymentState>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT state FROM payment_checkpoint WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    match row {
        Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Durable store the orchestrator writes through on every transition.
///
/// `save` must not return before the state is on disk: the orchestrator only
/// hands an envelope to the ledger after the `submitting` state was saved.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, state: &PaymentState) -> Result<()>;
}

#[async_trait]
impl Checkpointer for SqlitePool {
    async fn save(&self, state: &PaymentState) -> Result<()> {
        save_checkpoint(self, state).await
    }
}
