use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, Transaction};
use sqlx::sqlite::Sqlite;

use crate::error::StoreError;
use crate::models::{Flip, FlipReason, Status};

const COLUMNS: &str = "id, owner_id, created_at, processed_at, old_status, new_status, reason";

pub async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    owner_id: &str,
    old_status: Status,
    new_status: Status,
    reason: FlipReason,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO flips (id, owner_id, created_at, old_status, new_status, reason)
         VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), ?, ?, ?)",
    )
    .bind(id)
    .bind(owner_id)
    .bind(old_status.to_string())
    .bind(new_status.to_string())
    .bind(reason.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Unprocessed flips for the dispatcher, oldest first.
pub async fn unprocessed(pool: &SqlitePool, limit: i64) -> Result<Vec<Flip>, StoreError> {
    let flips = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM flips WHERE processed_at IS NULL ORDER BY created_at LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(flips)
}

pub async fn mark_processed(pool: &SqlitePool, flip_id: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE flips SET processed_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?")
        .bind(flip_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn history_for_check(pool: &SqlitePool, owner_id: &str, limit: i64) -> Result<Vec<Flip>, StoreError> {
    let flips = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM flips WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(owner_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(flips)
}

/// The event that started the current down spell, or the last nag sent
/// for it — whichever is more recent. Consulting
/// anything keyed on the *notification* table here would be
/// self-referential (a nag is itself a down notification) and would
/// permanently block further nags; this query must stay flip-only.
pub async fn latest_nag_or_down_transition(pool: &SqlitePool, owner_id: &str) -> Result<Option<Flip>, StoreError> {
    let flip = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM flips
         WHERE owner_id = ? AND (reason = 'nag' OR (old_status != 'down' AND new_status = 'down'))
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;
    Ok(flip)
}

/// Hard system-wide retention.
pub async fn prune_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM flips WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
