//! Shadow document queries.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{StoreError, StoreResult};

/// Stored shadow document row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub thing_name: String,
    pub shadow_name: String,
    pub document: Vec<u8>,
    pub version: i64,
    pub updated_at: i64,
}

/// Insert a new shadow document. Fails when the (thing, shadow) pair is
/// already present.
pub async fn create(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
    document: &[u8],
    version: u64,
) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO shadow_documents (thing_name, shadow_name, document, version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(thing_name)
    .bind(shadow_name)
    .bind(document)
    .bind(version as i64)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch the stored document bytes for a shadow.
pub async fn get(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
) -> StoreResult<Option<Vec<u8>>> {
    let document = sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT document FROM shadow_documents WHERE thing_name = ?1 AND shadow_name = ?2",
    )
    .bind(thing_name)
    .bind(shadow_name)
    .fetch_optional(pool)
    .await?;
    Ok(document)
}

/// Upsert a shadow document at the given version.
pub async fn update(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
    document: &[u8],
    version: u64,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO shadow_documents (thing_name, shadow_name, document, version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (thing_name, shadow_name)
         DO UPDATE SET document = ?3, version = ?4, updated_at = ?5",
    )
    .bind(thing_name)
    .bind(shadow_name)
    .bind(document)
    .bind(version as i64)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove a shadow document, returning the removed bytes when present.
pub async fn delete(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
) -> StoreResult<Option<Vec<u8>>> {
    let mut tx = pool.begin().await?;

    let document = sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT document FROM shadow_documents WHERE thing_name = ?1 AND shadow_name = ?2",
    )
    .bind(thing_name)
    .bind(shadow_name)
    .fetch_optional(&mut *tx)
    .await?;

    if document.is_some() {
        sqlx::query("DELETE FROM shadow_documents WHERE thing_name = ?1 AND shadow_name = ?2")
            .bind(thing_name)
            .bind(shadow_name)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(document)
}

/// List named shadows for one thing, lexicographic ascending, excluding
/// the classic (empty-name) shadow.
pub async fn list_named_shadows(
    pool: &SqlitePool,
    thing_name: &str,
    offset: u32,
    limit: u32,
) -> StoreResult<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT shadow_name FROM shadow_documents
         WHERE thing_name = ?1 AND shadow_name != ''
         ORDER BY shadow_name ASC
         LIMIT ?2 OFFSET ?3",
    )
    .bind(thing_name)
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;
    Ok(names)
}
