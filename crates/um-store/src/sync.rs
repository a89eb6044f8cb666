//! Sync bookkeeping queries.
//!
//! One row per synchronized (thing, shadow) records what this device last
//! reconciled with the cloud.

use sqlx::SqlitePool;

use crate::StoreResult;

/// Per-shadow sync bookkeeping row.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct SyncRow {
    pub thing_name: String,
    pub shadow_name: String,
    pub cloud_version: i64,
    pub local_version: i64,
    pub cloud_deleted: bool,
    pub last_synced_document: Option<Vec<u8>>,
    pub last_sync_time: i64,
    pub cloud_update_time: i64,
}

impl SyncRow {
    pub fn new(thing_name: impl Into<String>, shadow_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
            ..Default::default()
        }
    }
}

/// Insert a fresh row unless one already exists. Returns whether a row
/// was inserted.
pub async fn insert_if_absent(pool: &SqlitePool, row: &SyncRow) -> StoreResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO sync_information
         (thing_name, shadow_name, cloud_version, local_version, cloud_deleted,
          last_synced_document, last_sync_time, cloud_update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&row.thing_name)
    .bind(&row.shadow_name)
    .bind(row.cloud_version)
    .bind(row.local_version)
    .bind(row.cloud_deleted)
    .bind(&row.last_synced_document)
    .bind(row.last_sync_time)
    .bind(row.cloud_update_time)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Upsert the full row.
pub async fn update_row(pool: &SqlitePool, row: &SyncRow) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO sync_information
         (thing_name, shadow_name, cloud_version, local_version, cloud_deleted,
          last_synced_document, last_sync_time, cloud_update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (thing_name, shadow_name)
         DO UPDATE SET cloud_version = ?3, local_version = ?4, cloud_deleted = ?5,
                       last_synced_document = ?6, last_sync_time = ?7, cloud_update_time = ?8",
    )
    .bind(&row.thing_name)
    .bind(&row.shadow_name)
    .bind(row.cloud_version)
    .bind(row.local_version)
    .bind(row.cloud_deleted)
    .bind(&row.last_synced_document)
    .bind(row.last_sync_time)
    .bind(row.cloud_update_time)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_row(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
) -> StoreResult<Option<SyncRow>> {
    let row = sqlx::query_as::<_, SyncRow>(
        "SELECT * FROM sync_information WHERE thing_name = ?1 AND shadow_name = ?2",
    )
    .bind(thing_name)
    .bind(shadow_name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// All rows, in stable (thing, shadow) order.
pub async fn list_rows(pool: &SqlitePool) -> StoreResult<Vec<SyncRow>> {
    let rows = sqlx::query_as::<_, SyncRow>(
        "SELECT * FROM sync_information ORDER BY thing_name, shadow_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove a row. Returns whether a row was removed.
pub async fn delete_row(
    pool: &SqlitePool,
    thing_name: &str,
    shadow_name: &str,
) -> StoreResult<bool> {
    let result =
        sqlx::query("DELETE FROM sync_information WHERE thing_name = ?1 AND shadow_name = ?2")
            .bind(thing_name)
            .bind(shadow_name)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}
