//! Persistence layer over Postgres.
//!
//! One module per logical collection. Bulk writes are idempotent upserts
//! keyed on the natural document identity; duplicate-key collisions fold
//! into the upsert. Connection errors propagate to the caller, which
//! logs and continues its cycle on a later call.

pub mod accounts;
pub mod comments;
pub mod errors;
pub mod posts;
pub mod scrapers;
pub mod subreddits;
pub mod suggestions;
pub mod usage;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::config::DatabaseConfig;

pub type PgPool = Pool<Postgres>;

/// Connect the shared pool and run pending migrations.
pub async fn initialize_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Session-level guards against runaway queries and idle transactions
                sqlx::query("SET statement_timeout = '30s'")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("SET idle_in_transaction_session_timeout = '60s'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    sqlx::migrate!("src/storage/migrations").run(&pool).await?;

    Ok(pool)
}
