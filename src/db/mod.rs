//! Postgres-backed stores

pub mod conversation_repo;
pub mod message_repo;

use deadpool_postgres::{Manager, Pool};
use tokio_postgres::NoTls;

use crate::config::Config;
use crate::error::AppError;

pub use conversation_repo::PgConversationStore;
pub use message_repo::PgMessageStore;

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init_pool(config: &Config) -> Result<Pool, AppError> {
    let pg_config = config
        .database_url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| AppError::Config(format!("invalid DATABASE_URL: {e}")))?;

    let manager = Manager::new(pg_config, NoTls);
    let pool = Pool::builder(manager)
        .max_size(config.db_max_connections)
        .build()
        .map_err(|e| AppError::Config(format!("failed to create database pool: {e}")))?;

    migrate(&pool).await?;
    tracing::info!(max_connections = config.db_max_connections, "database pool ready");
    Ok(pool)
}

/// Apply the embedded schema. Safe to run on every start.
pub async fn migrate(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    Ok(())
}
