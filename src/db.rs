// src/db.rs
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::workflow::checkpoint::PgStoreBackend;

pub async fn create_pool(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(db_url)
        .await
}

/// Connect and make sure the conversation table exists
pub async fn connect_store_backend(db_url: &str) -> Result<PgStoreBackend, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL conversation store...");
    let pool = create_pool(db_url).await?;
    let backend = PgStoreBackend::new(pool);
    backend.setup().await?;
    tracing::info!("✅ PostgreSQL conversation store ready");
    Ok(backend)
}
