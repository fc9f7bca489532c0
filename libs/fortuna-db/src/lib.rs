pub mod error;
pub mod models;
pub mod store;

pub use error::LedgerError;
pub use store::{LedgerLimits, LedgerStore, MemoryLedgerStore, PgLedgerStore, StoreConfig};

pub use sqlx;
use anyhow::{Context, Result};

pub async fn connect(url: &str) -> Result<sqlx::PgPool> {
    let pool = sqlx::PgPool::connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run DB migrations")?;

    Ok(pool)
}
