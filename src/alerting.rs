//! Alerting loop: scans checks past their deadline and flips their
//! cached status.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::resolver::resolve;
use crate::schedule;
use crate::store::{checks, flips};

/// One alerting cycle: evaluate every check past its `alert_after` and commit
/// flips for the ones whose label changed.
pub async fn run_cycle(pool: &SqlitePool, config: &Config, worker_token: &str) -> anyhow::Result<usize> {
    let now = chrono::Utc::now();
    let due = checks::due_for_alerting(pool, now, config.alerting.batch_size).await?;
    let mut flipped = 0;

    for check in due {
        let stale_cutoff = now - config.lock_stale_after()?;
        if !checks::try_acquire_lock(pool, &check.id, worker_token, now, stale_cutoff).await? {
            debug!(check = %check.id, "check already locked by a peer, skipping");
            continue;
        }

        let result = process_one(pool, &check, now, worker_token).await;
        if let Err(e) = &result {
            error!(check = %check.id, error = %e, "alerting cycle failed for check");
            // Best-effort: release the lock so the check isn't stuck until it goes stale.
            let _ = checks::release_lock(pool, &check.id, worker_token).await;
        } else if result? {
            flipped += 1;
        }
    }

    Ok(flipped)
}

async fn process_one(
    pool: &SqlitePool,
    check: &crate::models::Check,
    now: chrono::DateTime<chrono::Utc>,
    worker_token: &str,
) -> anyhow::Result<bool> {
    let (schedule, tz) = match schedule::for_check(check) {
        Ok(v) => v,
        Err(e) => {
            warn!(check = %check.id, error = %e, "schedule failed to parse, pausing check");
            checks::pause_for_schedule_error(pool, &check.id, worker_token).await?;
            return Ok(false);
        }
    };
    let resolution = resolve(check, &schedule, tz, now)?;
    let new_status = resolution.label.stored();
    let old_status = check.status();

    let mut tx = pool.begin().await?;

    let did_flip = new_status != old_status;
    if did_flip {
        // The timeout-driven scan's flips always carry reason=timeout.
        flips::insert(
            &mut tx,
            &Uuid::new_v4().to_string(),
            &check.id,
            old_status,
            new_status,
            crate::models::FlipReason::Timeout,
        )
        .await?;
    }
    checks::apply_resolution(&mut tx, &check.id, worker_token, new_status, resolution.next_alert_after).await?;

    tx.commit().await?;
    Ok(did_flip)
}

/// `tokio::spawn`ed background loop: sleep, cancel-aware, runs forever
/// until shutdown.
pub async fn alerting_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    let worker_token = Uuid::new_v4().to_string();
    tracing::info!(worker = %worker_token, "alerting loop started");

    let interval = match config.tick_interval() {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "invalid tick_interval, defaulting to 2s");
            std::time::Duration::from_secs(2)
        }
    };

    let mut backoff = Backoff::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("alerting loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match run_cycle(&pool, &config, &worker_token).await {
            Ok(flipped) => {
                backoff.reset();
                if flipped > 0 {
                    debug!(flipped, "alerting cycle flipped checks");
                }
            }
            Err(e) => {
                warn!(error = %e, "alerting cycle failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff.next_delay()) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleKind;
    use crate::store::{checks, flips};

    #[tokio::test]
    async fn overdue_check_flips_to_down_and_notifies() {
        let pool = crate::db::test_pool().await;

        let check = checks::insert(
            &pool,
            checks::NewCheck {
                id: "c1",
                fingerprint: "fp1",
                name: "nightly-backup",
                slug: "nightly-backup",
                project_id: None,
                schedule_kind: ScheduleKind::Simple,
                timeout_secs: Some(60),
                schedule_expr: None,
                timezone: "UTC",
                grace_secs: 30,
            },
        )
        .await
        .unwrap();

        // Simulate a check that pinged once, long enough ago that its
        // deadline has already passed (simple fixed-timeout schedule).
        let long_ago = chrono::Utc::now() - chrono::Duration::seconds(1_000);
        sqlx::query("UPDATE checks SET status = 'up', n_pings = 1, last_ping = ?, alert_after = ? WHERE id = ?")
            .bind(long_ago)
            .bind(long_ago)
            .bind(&check.id)
            .execute(&pool)
            .await
            .unwrap();

        let config = Config::default();
        let worker_token = "worker-1";
        let flipped = run_cycle(&pool, &config, worker_token).await.unwrap();
        assert_eq!(flipped, 1);

        let updated = checks::find_by_id(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(updated.status(), crate::models::Status::Down);
        assert!(updated.locked_by.is_none(), "lock must be released after resolution");

        let pending = flips::unprocessed(&pool, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason(), crate::models::FlipReason::Timeout);
    }

    #[tokio::test]
    async fn check_on_time_is_left_alone() {
        let pool = crate::db::test_pool().await;
        checks::insert(
            &pool,
            checks::NewCheck {
                id: "c2",
                fingerprint: "fp2",
                name: "hourly-sync",
                slug: "hourly-sync",
                project_id: None,
                schedule_kind: ScheduleKind::Simple,
                timeout_secs: Some(3_600),
                schedule_expr: None,
                timezone: "UTC",
                grace_secs: 60,
            },
        )
        .await
        .unwrap();

        let now = chrono::Utc::now();
        sqlx::query("UPDATE checks SET status = 'up', n_pings = 1, last_ping = ?, alert_after = ? WHERE id = ?")
            .bind(now)
            .bind(now + chrono::Duration::seconds(3_660))
            .bind("c2")
            .execute(&pool)
            .await
            .unwrap();

        let config = Config::default();
        let flipped = run_cycle(&pool, &config, "worker-1").await.unwrap();
        assert_eq!(flipped, 0);

        let pending = flips::unprocessed(&pool, 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unparseable_schedule_pauses_check_instead_of_erroring() {
        let pool = crate::db::test_pool().await;
        let check = checks::insert(
            &pool,
            checks::NewCheck {
                id: "c3",
                fingerprint: "fp3",
                name: "broken-cron",
                slug: "broken-cron",
                project_id: None,
                schedule_kind: ScheduleKind::Cron,
                timeout_secs: None,
                schedule_expr: Some("not a cron expression"),
                timezone: "UTC",
                grace_secs: 0,
            },
        )
        .await
        .unwrap();

        let long_ago = chrono::Utc::now() - chrono::Duration::seconds(1_000);
        sqlx::query("UPDATE checks SET status = 'up', n_pings = 1, last_ping = ?, alert_after = ? WHERE id = ?")
            .bind(long_ago)
            .bind(long_ago)
            .bind(&check.id)
            .execute(&pool)
            .await
            .unwrap();

        let config = Config::default();
        let flipped = run_cycle(&pool, &config, "worker-1").await.unwrap();
        assert_eq!(flipped, 0, "a schedule-parse failure is not a flip");

        let paused = checks::find_by_id(&pool, "c3").await.unwrap().unwrap();
        assert_eq!(paused.status(), crate::models::Status::Paused);
        assert_eq!(paused.alert_after, None);
        assert!(paused.locked_by.is_none(), "lock must be released when pausing");

        // The check must not re-enter the next cycle's due set and error again.
        let second_pass = run_cycle(&pool, &config, "worker-1").await.unwrap();
        assert_eq!(second_pass, 0);
    }
}
