//! Database connection pool management
//!
//! Provides SQLite connection pooling using sqlx.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;

/// Create a SQLite connection pool
///
/// ```rust,no_run
/// # async fn run() -> hookrelay_common::Result<()> {
/// let pool = hookrelay_common::create_pool("sqlite://hookrelay.db", 20).await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    info!(
        "Creating database pool with max_connections={}",
        max_connections
    );

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(options)
        .await?;

    info!("Database pool created successfully");

    // Test the connection
    health_check(&pool).await?;

    Ok(pool)
}

/// Check if database is healthy
pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;

    if row.0 == 1 {
        info!("Database health check passed");
        Ok(())
    } else {
        warn!("Database health check failed");
        Err(crate::error::Error::Database(sqlx::Error::Protocol(
            "Health check failed".into(),
        )))
    }
}
