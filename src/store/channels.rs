use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::Channel;

const COLUMNS: &str = "id, project_id, name, kind, value,
    last_notify, last_notify_duration_ms, last_error, disabled, email_verified, created_at";

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Channel>, StoreError> {
    let channel = sqlx::query_as(&format!("SELECT {COLUMNS} FROM channels WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(channel)
}

pub async fn insert(
    pool: &SqlitePool,
    id: &str,
    project_id: Option<&str>,
    name: &str,
    kind: &str,
    value: &str,
) -> Result<Channel, StoreError> {
    sqlx::query("INSERT INTO channels (id, project_id, name, kind, value) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(project_id)
        .bind(name)
        .bind(kind)
        .bind(value)
        .execute(pool)
        .await?;
    find_by_id(pool, id).await?.ok_or_else(|| StoreError::CheckNotFound(id.to_string()))
}

pub async fn attach(pool: &SqlitePool, check_id: &str, channel_id: &str) -> Result<(), StoreError> {
    sqlx::query("INSERT OR IGNORE INTO check_channels (check_id, channel_id) VALUES (?, ?)")
        .bind(check_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn detach(pool: &SqlitePool, check_id: &str, channel_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM check_channels WHERE check_id = ? AND channel_id = ?")
        .bind(check_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Channels attached to a check that are not disabled — the input to
/// the dispatcher's selection step before `is_noop` filtering.
pub async fn for_check(pool: &SqlitePool, check_id: &str) -> Result<Vec<Channel>, StoreError> {
    let channels = sqlx::query_as(&format!(
        "SELECT c.id, c.project_id, c.name, c.kind, c.value,
            c.last_notify, c.last_notify_duration_ms, c.last_error, c.disabled, c.email_verified, c.created_at
         FROM channels c
         JOIN check_channels cc ON cc.channel_id = c.id
         WHERE cc.check_id = ? AND c.disabled = 0
         ORDER BY c.last_notify_duration_ms ASC"
    ))
    .bind(check_id)
    .fetch_all(pool)
    .await?;
    Ok(channels)
}

pub async fn record_success(
    pool: &SqlitePool,
    channel_id: &str,
    at: DateTime<Utc>,
    duration_ms: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE channels SET last_notify = ?, last_notify_duration_ms = ?, last_error = '' WHERE id = ?",
    )
    .bind(at)
    .bind(duration_ms)
    .bind(channel_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_transient_error(pool: &SqlitePool, channel_id: &str, error: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE channels SET last_error = ? WHERE id = ?")
        .bind(error)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn disable(pool: &SqlitePool, channel_id: &str, error: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE channels SET disabled = 1, last_error = ? WHERE id = ?")
        .bind(error)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}
