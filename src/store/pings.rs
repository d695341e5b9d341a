use sqlx::{SqlitePool, Transaction};
use sqlx::sqlite::Sqlite;

use crate::error::StoreError;
use crate::models::{Ping, PingKind, PingMetadata};

/// Pings beyond this many per check are pruned opportunistically on
/// write — oldest pings beyond the per-check retention are dropped.
const PINGS_PER_CHECK: i64 = 100;

pub struct NewPing<'a> {
    pub id: &'a str,
    pub check_id: &'a str,
    pub n: i64,
    pub kind: PingKind,
    pub metadata: &'a PingMetadata,
    pub body: Option<&'a str>,
}

pub async fn insert(tx: &mut Transaction<'_, Sqlite>, new: NewPing<'_>) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO pings (id, check_id, n, kind, created_at,
            scheme, remote_addr, user_agent, method, exit_status, run_id, body)
         VALUES (?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.id)
    .bind(new.check_id)
    .bind(new.n)
    .bind(new.kind.to_string())
    .bind(&new.metadata.scheme)
    .bind(&new.metadata.remote_addr)
    .bind(&new.metadata.user_agent)
    .bind(&new.metadata.method)
    .bind(new.metadata.exit_status)
    .bind(&new.metadata.run_id)
    .bind(new.body)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Drop pings past the per-check retention window, oldest first.
pub async fn prune_for_check(tx: &mut Transaction<'_, Sqlite>, check_id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM pings WHERE check_id = ? AND n <= (
            SELECT n FROM pings WHERE check_id = ? ORDER BY n DESC LIMIT 1 OFFSET ?
         )",
    )
    .bind(check_id)
    .bind(check_id)
    .bind(PINGS_PER_CHECK)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn history_for_check(pool: &SqlitePool, check_id: &str, limit: i64) -> Result<Vec<Ping>, StoreError> {
    let pings = sqlx::query_as(
        "SELECT id, check_id, n, kind, created_at,
            scheme, remote_addr, user_agent, method, exit_status, run_id, body, object_key, object_size
         FROM pings WHERE check_id = ? ORDER BY n DESC LIMIT ?",
    )
    .bind(check_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(pings)
}

pub async fn last_for_check(pool: &SqlitePool, check_id: &str) -> Result<Option<Ping>, StoreError> {
    let ping = sqlx::query_as(
        "SELECT id, check_id, n, kind, created_at,
            scheme, remote_addr, user_agent, method, exit_status, run_id, body, object_key, object_size
         FROM pings WHERE check_id = ? ORDER BY n DESC LIMIT 1",
    )
    .bind(check_id)
    .fetch_optional(pool)
    .await?;
    Ok(ping)
}
