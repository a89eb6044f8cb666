//! Embedded shadow store.
//!
//! Each sub-module provides typed query functions over a `SqlitePool`.
//! The store is process-local; SQLite serializes writers and committed
//! state is visible to readers once a writer commits.

pub mod documents;
pub mod sync;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shadow document already exists")]
    AlreadyExists,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Open (creating if missing) the shadow database and run migrations.
pub async fn connect(path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests. Capped at one connection so every
/// query sees the same database.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    tracing::info!("running shadow store migrations");
    sqlx::raw_sql(include_str!("../migrations/001_shadow_documents.sql"))
        .execute(pool)
        .await?;
    sqlx::raw_sql(include_str!("../migrations/002_sync_information.sql"))
        .execute(pool)
        .await?;
    tracing::info!("migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadows.db");
        let path = path.to_str().unwrap();

        let pool = connect(path).await.unwrap();
        documents::update(&pool, "gw-01", "config", b"{\"version\":1}", 1)
            .await
            .unwrap();
        pool.close().await;

        // Reopening runs migrations again and sees the committed row.
        let pool = connect(path).await.unwrap();
        let stored = documents::get(&pool, "gw-01", "config").await.unwrap();
        assert_eq!(stored, Some(b"{\"version\":1}".to_vec()));
    }
}
