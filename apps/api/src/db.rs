use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::chat::threads::{InMemoryThreadStore, PgThreadStore, ThreadStore};
use crate::config::Config;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to DATABASE_URL")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Chooses where chat threads live for this process.
pub async fn connect_thread_store(config: &Config) -> Result<Arc<dyn ThreadStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgThreadStore::new(create_pool(url).await?))),
        None => {
            warn!("DATABASE_URL not set; chat threads are kept in memory and lost on restart");
            Ok(Arc::new(InMemoryThreadStore::new()))
        }
    }
}
