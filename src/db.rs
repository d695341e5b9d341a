use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Row, SqlitePool};
use tracing::info;

/// Ordered list of migrations. Each entry is (version, name, sql).
/// Versions must be monotonically increasing.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial_schema",
    include_str!("../migrations/20260301_000001_initial_schema.sql"),
)];

pub async fn create_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| format!("creating data directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to database: {}", db_path.display()))?;

    info!(path = %db_path.display(), "database connected (WAL mode, foreign keys enabled)");

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
    )
    .await
    .context("creating schema_version table")?;

    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) as v FROM schema_version")
        .fetch_one(pool)
        .await
        .context("querying schema version")?;
    let current_version: i64 = row.get("v");

    let mut applied = 0;
    for &(version, name, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        pool.execute(sql)
            .await
            .with_context(|| format!("applying migration v{version} ({name})"))?;
        sqlx::query("INSERT INTO schema_version (version, name) VALUES (?, ?)")
            .bind(version)
            .bind(name)
            .execute(pool)
            .await
            .with_context(|| format!("recording migration v{version}"))?;
        applied += 1;
        info!(version, name, "applied migration");
    }

    if applied == 0 {
        info!(current_version, "database schema up to date");
    } else {
        info!(applied, "database migrations applied");
    }

    Ok(())
}

/// In-memory pool for integration tests, migrated the same way a real
/// deployment's database is. `max_connections(1)` keeps every test query
/// on the same SQLite connection — `sqlite::memory:` otherwise hands out
/// a fresh, empty database per connection.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connecting to in-memory database");
    run_migrations(&pool).await.expect("running migrations against in-memory database");
    pool
}
