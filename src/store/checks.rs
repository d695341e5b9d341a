use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, Transaction};
use sqlx::sqlite::Sqlite;

use crate::error::StoreError;
use crate::models::{Check, ScheduleKind, Status};

const COLUMNS: &str = "id, fingerprint, name, slug, project_id,
    schedule_kind, timeout_secs, schedule_expr, timezone, grace_secs,
    status, last_ping, last_start, alert_after,
    n_pings, last_duration_secs, manual_resume,
    filter_methods, filter_subject, filter_body, success_kw, start_kw, failure_kw,
    locked_by, locked_at, created_at, updated_at";

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Check>, StoreError> {
    let check = sqlx::query_as(&format!("SELECT {COLUMNS} FROM checks WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(check)
}

pub async fn find_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<Check>, StoreError> {
    let check = sqlx::query_as(&format!("SELECT {COLUMNS} FROM checks WHERE fingerprint = ?"))
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;
    Ok(check)
}

pub struct NewCheck<'a> {
    pub id: &'a str,
    pub fingerprint: &'a str,
    pub name: &'a str,
    pub slug: &'a str,
    pub project_id: Option<&'a str>,
    pub schedule_kind: ScheduleKind,
    pub timeout_secs: Option<i64>,
    pub schedule_expr: Option<&'a str>,
    pub timezone: &'a str,
    pub grace_secs: i64,
}

pub async fn insert(pool: &SqlitePool, new: NewCheck<'_>) -> Result<Check, StoreError> {
    sqlx::query(
        "INSERT INTO checks (id, fingerprint, name, slug, project_id,
            schedule_kind, timeout_secs, schedule_expr, timezone, grace_secs)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.id)
    .bind(new.fingerprint)
    .bind(new.name)
    .bind(new.slug)
    .bind(new.project_id)
    .bind(new.schedule_kind.to_string())
    .bind(new.timeout_secs)
    .bind(new.schedule_expr)
    .bind(new.timezone)
    .bind(new.grace_secs)
    .execute(pool)
    .await?;

    find_by_id(pool, new.id)
        .await?
        .ok_or_else(|| StoreError::CheckNotFound(new.id.to_string()))
}

/// Checks due for re-evaluation by the alerting scan: `alert_after <= now`,
/// excluding `paused`/`new`.
pub async fn due_for_alerting(pool: &SqlitePool, now: DateTime<Utc>, batch_size: u32) -> Result<Vec<Check>, StoreError> {
    let checks = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM checks
         WHERE alert_after IS NOT NULL AND alert_after <= ?
           AND status NOT IN ('paused', 'new')
         ORDER BY alert_after
         LIMIT ?"
    ))
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(checks)
}

/// Every check, for `sendreports`'s summary pass.
pub async fn all(pool: &SqlitePool) -> Result<Vec<Check>, StoreError> {
    let checks = sqlx::query_as(&format!("SELECT {COLUMNS} FROM checks ORDER BY name")).fetch_all(pool).await?;
    Ok(checks)
}

/// Currently-down checks, for the nag sub-loop.
pub async fn down_checks(pool: &SqlitePool) -> Result<Vec<Check>, StoreError> {
    let checks = sqlx::query_as(&format!("SELECT {COLUMNS} FROM checks WHERE status = 'down'"))
        .fetch_all(pool)
        .await?;
    Ok(checks)
}

/// Best-effort, non-blocking row lock. Returns `true` if
/// this worker now holds the lock, `false` if a peer holds a fresh one.
pub async fn try_acquire_lock(
    pool: &SqlitePool,
    check_id: &str,
    worker_token: &str,
    now: DateTime<Utc>,
    stale_cutoff: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE checks SET locked_by = ?, locked_at = ?
         WHERE id = ? AND (locked_by IS NULL OR locked_at < ?)",
    )
    .bind(worker_token)
    .bind(now)
    .bind(check_id)
    .bind(stale_cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Release a lock held by `worker_token`. No-op if a peer already stole
/// it via the stale-cutoff path.
pub async fn release_lock(pool: &SqlitePool, check_id: &str, worker_token: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE checks SET locked_by = NULL, locked_at = NULL WHERE id = ? AND locked_by = ?")
        .bind(check_id)
        .bind(worker_token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply an alerting-scan resolution and release the lock, within an
/// existing transaction (the caller also inserts the flip row, if any,
/// in the same transaction).
pub async fn apply_resolution(
    tx: &mut Transaction<'_, Sqlite>,
    check_id: &str,
    worker_token: &str,
    new_status: Status,
    next_alert_after: Option<DateTime<Utc>>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE checks SET status = ?, alert_after = ?, locked_by = NULL, locked_at = NULL,
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND locked_by = ?",
    )
    .bind(new_status.to_string())
    .bind(next_alert_after)
    .bind(check_id)
    .bind(worker_token)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Fields the ping intake writer mutates (`record_ping`).
pub struct PingEffects {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
    pub n_pings_delta: i64,
    pub status: Option<Status>,
    pub alert_after: Option<DateTime<Utc>>,
    /// Wall-clock duration of the just-completed run, when this ping
    /// closes out a `last_start`. `None` leaves the stored value alone.
    pub last_duration_secs: Option<i64>,
}

pub async fn apply_ping_effects(
    tx: &mut Transaction<'_, Sqlite>,
    check_id: &str,
    effects: &PingEffects,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE checks SET
            last_ping = COALESCE(?, last_ping),
            last_start = ?,
            n_pings = n_pings + ?,
            status = COALESCE(?, status),
            alert_after = ?,
            last_duration_secs = COALESCE(?, last_duration_secs),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(effects.last_ping)
    .bind(effects.last_start)
    .bind(effects.n_pings_delta)
    .bind(effects.status.map(|s| s.to_string()))
    .bind(effects.alert_after)
    .bind(effects.last_duration_secs)
    .bind(check_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Pause a check whose schedule expression failed to parse, releasing
/// whatever lock this worker holds on it. A paused check is excluded
/// from `due_for_alerting` until an operator fixes the expression and
/// un-pauses it.
pub async fn pause_for_schedule_error(pool: &SqlitePool, check_id: &str, worker_token: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE checks SET status = 'paused', alert_after = NULL, locked_by = NULL, locked_at = NULL,
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ? AND locked_by = ?",
    )
    .bind(check_id)
    .bind(worker_token)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_manual_resume(pool: &SqlitePool, check_id: &str, manual_resume: bool) -> Result<(), StoreError> {
    sqlx::query("UPDATE checks SET manual_resume = ? WHERE id = ?")
        .bind(manual_resume)
        .bind(check_id)
        .execute(pool)
        .await?;
    Ok(())
}
