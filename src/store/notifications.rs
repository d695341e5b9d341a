use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::Status;

/// Create the audit-trail row before the transport call. The
/// `UNIQUE(flip_id, channel_id)`
/// constraint on the table is what actually enforces at-most-once;
/// a unique-violation here means a peer dispatcher already claimed
/// this (flip, channel) pair.
pub async fn insert_pending(
    pool: &SqlitePool,
    id: &str,
    check_id: &str,
    channel_id: &str,
    flip_id: &str,
    check_status: Status,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO notifications (id, check_id, channel_id, flip_id, check_status, created_at)
         VALUES (?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
    )
    .bind(id)
    .bind(check_id)
    .bind(channel_id)
    .bind(flip_id)
    .bind(check_status.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn record_error(pool: &SqlitePool, id: &str, error: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE notifications SET error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
