pub mod entities;
pub mod memory_store;
pub mod pg_store;
pub mod store;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::info;

pub use memory_store::{MemoryCatalogStore, StoreCalls};
pub use pg_store::PgCatalogStore;
pub use store::{ImageStore, TagStore};

use crate::server::config::CatalogConfig;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// Opens the bounded connection pool. Callers beyond `database_max_connections` wait up to
/// the acquire timeout instead of growing the pool.
pub async fn connect(config: &CatalogConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.database_url.to_owned());
    opt.max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_millis(config.database_acquire_timeout_ms))
        .sqlx_logging(false);
    Database::connect(opt).await
}

/// Creates the catalog tables if they do not exist yet.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute_unprepared(INIT_MIGRATION).await?;
    info!("Database schema is up to date.");
    Ok(())
}
