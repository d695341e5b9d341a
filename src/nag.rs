//! Nag sub-loop: periodically re-alerts on checks that have been down
//! for a while, without ever getting stuck.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::models::{FlipReason, Status};
use crate::store::{checks, flips};

/// One nag cycle. Returns the number of nag flips inserted.
pub async fn run_cycle(pool: &SqlitePool, nag_period: chrono::Duration) -> anyhow::Result<usize> {
    let now = Utc::now();
    let down = checks::down_checks(pool).await?;
    let mut nagged = 0;

    for check in down {
        // This must stay flip-only: a nag is itself a down notification, so
        // consulting the notification table here would be self-referential
        // and would permanently suppress all future nags.
        let anchor = flips::latest_nag_or_down_transition(pool, &check.id).await?;
        let Some(anchor) = anchor else {
            // A check can be `down` with no qualifying flip only if its
            // history was pruned out from under it; nothing to anchor on.
            continue;
        };

        if now - anchor.created_at < nag_period {
            continue;
        }

        let mut tx = pool.begin().await?;
        flips::insert(
            &mut tx,
            &Uuid::new_v4().to_string(),
            &check.id,
            Status::Down,
            Status::Down,
            FlipReason::Nag,
        )
        .await?;
        tx.commit().await?;
        nagged += 1;
    }

    Ok(nagged)
}

pub async fn nag_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    tracing::info!("nag loop started");

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
                tracing::info!("nag loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let nag_period = match config.nag_period() {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "invalid nag_period, defaulting to 1h");
                chrono::Duration::hours(1)
            }
        };

        match run_cycle(&pool, nag_period).await {
            Ok(n) => {
                backoff.reset();
                if n > 0 {
                    debug!(nagged = n, "nag cycle sent nags");
                }
            }
            Err(e) => {
                warn!(error = %e, "nag cycle failed, backing off");
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
    use crate::store::checks;

    async fn down_check(pool: &SqlitePool, id: &str) -> crate::models::Check {
        checks::insert(
            pool,
            checks::NewCheck {
                id,
                fingerprint: id,
                name: id,
                slug: id,
                project_id: None,
                schedule_kind: ScheduleKind::Simple,
                timeout_secs: Some(60),
                schedule_expr: None,
                timezone: "UTC",
                grace_secs: 0,
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE checks SET status = 'down' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
        checks::find_by_id(pool, id).await.unwrap().unwrap()
    }

    /// A second nag only fires once `nag_period` has elapsed since the
    /// *last nag flip*, not since some notification log — the
    /// self-reference trap the query is written to avoid.
    #[tokio::test]
    async fn nags_accumulate_without_suppressing_each_other() {
        let pool = crate::db::test_pool().await;
        let check = down_check(&pool, "c1").await;

        let mut tx = pool.begin().await.unwrap();
        flips::insert(
            &mut tx,
            &uuid::Uuid::new_v4().to_string(),
            &check.id,
            Status::Up,
            Status::Down,
            FlipReason::Fail,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        // The initiating flip is already old enough to nag on.
        sqlx::query("UPDATE flips SET created_at = ? WHERE owner_id = ?")
            .bind(chrono::Utc::now() - chrono::Duration::hours(2))
            .bind(&check.id)
            .execute(&pool)
            .await
            .unwrap();

        let nagged = run_cycle(&pool, chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(nagged, 1, "first nag should fire off the initiating down flip");

        // Immediately re-running must not nag again (nag itself is fresh).
        let nagged_again = run_cycle(&pool, chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(nagged_again, 0);

        // Age out the nag we just sent and confirm a third one fires.
        sqlx::query("UPDATE flips SET created_at = ? WHERE owner_id = ? AND reason = 'nag'")
            .bind(chrono::Utc::now() - chrono::Duration::hours(2))
            .bind(&check.id)
            .execute(&pool)
            .await
            .unwrap();
        let nagged_third = run_cycle(&pool, chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(nagged_third, 1, "nag cadence must not be suppressed by prior nags");
    }

    #[tokio::test]
    async fn freshly_down_check_does_not_nag_before_period_elapses() {
        let pool = crate::db::test_pool().await;
        let check = down_check(&pool, "c2").await;

        let mut tx = pool.begin().await.unwrap();
        flips::insert(
            &mut tx,
            &uuid::Uuid::new_v4().to_string(),
            &check.id,
            Status::Up,
            Status::Down,
            FlipReason::Timeout,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let nagged = run_cycle(&pool, chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(nagged, 0);
    }
}
