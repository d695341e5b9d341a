//! Ping intake writer (`record_ping`): the one function every external
//! collector (HTTP, email, future SMTP) funnels through.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::models::{Check, FilterPolicy, FlipReason, Ping, PingKind, PingMetadata, Status};
use crate::resolver::resolve;
use crate::schedule;
use crate::store::{checks, flips, pings};

/// Apply the check's filter policy to an inbound ping, possibly
/// downgrading it to `ign`.
fn apply_filter_policy(policy: &FilterPolicy, kind: PingKind, metadata: &PingMetadata, body: Option<&str>) -> PingKind {
    if kind == PingKind::Ign {
        return kind;
    }

    if !policy.methods.is_empty()
        && let Some(method) = &metadata.method
        && !policy.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    {
        return PingKind::Ign;
    }

    if let Some(pattern) = &policy.subject_regex
        && let Some(subject) = &metadata.subject
        && let Ok(re) = Regex::new(pattern)
        && !re.is_match(subject)
    {
        return PingKind::Ign;
    }

    let Some(body) = body else {
        return kind;
    };

    if let Some(pattern) = &policy.body_regex
        && let Ok(re) = Regex::new(pattern)
        && !re.is_match(body)
    {
        return PingKind::Ign;
    }

    if policy.failure_kw.iter().any(|kw| body.contains(kw.as_str())) {
        return PingKind::Fail;
    }
    if policy.start_kw.iter().any(|kw| body.contains(kw.as_str())) {
        return PingKind::Start;
    }
    if policy.success_kw.iter().any(|kw| body.contains(kw.as_str())) {
        return PingKind::Success;
    }
    kind
}

pub async fn record_ping(
    pool: &SqlitePool,
    check: &Check,
    kind: PingKind,
    metadata: PingMetadata,
    body: Option<&str>,
) -> Result<Ping> {
    let now = Utc::now();
    let policy = check.filter_policy();
    let effective_kind = apply_filter_policy(&policy, kind, &metadata, body);

    let n = check.n_pings + 1;
    let ping_id = Uuid::new_v4().to_string();

    let prior_status = check.status();
    let mut working = check.clone();

    let mut tx = pool.begin().await.context("beginning ping transaction")?;

    pings::insert(
        &mut tx,
        pings::NewPing {
            id: &ping_id,
            check_id: &check.id,
            n,
            kind: effective_kind,
            metadata: &metadata,
            body,
        },
    )
    .await
    .context("inserting ping")?;
    pings::prune_for_check(&mut tx, &check.id).await.context("pruning pings")?;

    let mut new_status = None;
    let mut last_duration_secs = None;
    match effective_kind {
        PingKind::Success => {
            if let Some(started_at) = check.last_start {
                last_duration_secs = Some((now - started_at).num_seconds());
            }
            working.last_start = None;
            working.last_ping = Some(now);
            if !(check.manual_resume && prior_status == Status::Down) {
                new_status = Some(Status::Up);
                working.status = Status::Up.to_string();
                if prior_status == Status::Down {
                    // Recovery: no dedicated reason exists for this in the flip
                    // taxonomy (only timeout/fail/nag), so it's recorded under
                    // the same catch-all reason the alerting scan uses for non-fail transitions.
                    flips::insert(
                        &mut tx,
                        &Uuid::new_v4().to_string(),
                        &check.id,
                        prior_status,
                        Status::Up,
                        FlipReason::Timeout,
                    )
                    .await
                    .context("inserting recovery flip")?;
                }
            }
        }
        PingKind::Start => {
            working.last_start = Some(now);
        }
        PingKind::Fail => {
            working.last_start = None;
            new_status = Some(Status::Down);
            working.status = Status::Down.to_string();
            if prior_status != Status::Down {
                flips::insert(
                    &mut tx,
                    &Uuid::new_v4().to_string(),
                    &check.id,
                    prior_status,
                    Status::Down,
                    FlipReason::Fail,
                )
                .await
                .context("inserting fail flip")?;
            }
        }
        PingKind::Log | PingKind::Ign => {}
    }
    working.n_pings = n;

    // A malformed schedule expression pauses the check rather than surfacing
    // as a ping-intake failure: the ping itself is still accepted and recorded.
    let (status, alert_after) = match schedule::for_check(&working) {
        Ok((schedule, tz)) => {
            let resolution = resolve(&working, &schedule, tz, now).context("resolving status after ping")?;
            (new_status, resolution.next_alert_after)
        }
        Err(e) => {
            warn!(check = %check.id, error = %e, "schedule failed to parse, pausing check");
            (Some(Status::Paused), None)
        }
    };

    checks::apply_ping_effects(
        &mut tx,
        &check.id,
        &checks::PingEffects {
            last_ping: working.last_ping,
            last_start: working.last_start,
            n_pings_delta: n - check.n_pings,
            status,
            alert_after,
            last_duration_secs,
        },
    )
    .await
    .context("applying ping effects")?;

    tx.commit().await.context("committing ping transaction")?;

    Ok(Ping {
        id: ping_id,
        check_id: check.id.clone(),
        n,
        kind: effective_kind.to_string(),
        created_at: now,
        scheme: metadata.scheme,
        remote_addr: metadata.remote_addr,
        user_agent: metadata.user_agent,
        method: metadata.method,
        exit_status: metadata.exit_status,
        run_id: metadata.run_id,
        body: body.map(str::to_string),
        object_key: None,
        object_size: None,
    })
}

/// Operator-initiated resume: clears a `down` status stuck behind
/// `manual_resume=true` and records the recovery
/// flip. A no-op (returns `false`) if the check isn't currently down —
/// callers (the out-of-scope dashboard, or an admin script) shouldn't
/// need to check status first.
pub async fn resume_check(pool: &SqlitePool, check: &Check) -> Result<bool> {
    if check.status() != Status::Down {
        return Ok(false);
    }

    let mut working = check.clone();
    working.status = Status::Up.to_string();
    let (schedule, tz) = schedule::for_check(&working).context("building schedule for resolver")?;
    let resolution = resolve(&working, &schedule, tz, Utc::now()).context("resolving status after resume")?;

    let mut tx = pool.begin().await.context("beginning resume transaction")?;

    flips::insert(
        &mut tx,
        &Uuid::new_v4().to_string(),
        &check.id,
        Status::Down,
        Status::Up,
        FlipReason::Timeout,
    )
    .await
    .context("inserting resume flip")?;

    checks::apply_ping_effects(
        &mut tx,
        &check.id,
        &checks::PingEffects {
            last_ping: check.last_ping,
            last_start: check.last_start,
            n_pings_delta: 0,
            status: Some(Status::Up),
            alert_after: resolution.next_alert_after,
            last_duration_secs: None,
        },
    )
    .await
    .context("applying resume effects")?;

    tx.commit().await.context("committing resume transaction")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleKind;
    use crate::store::checks;

    fn policy_with_methods(methods: &[&str]) -> FilterPolicy {
        FilterPolicy {
            methods: methods.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn disallowed_method_is_filtered_to_ign() {
        let policy = policy_with_methods(&["POST"]);
        let metadata = PingMetadata {
            method: Some("GET".to_string()),
            ..Default::default()
        };
        let result = apply_filter_policy(&policy, PingKind::Success, &metadata, None);
        assert_eq!(result, PingKind::Ign);
    }

    #[test]
    fn allowed_method_passes_through() {
        let policy = policy_with_methods(&["POST", "GET"]);
        let metadata = PingMetadata {
            method: Some("GET".to_string()),
            ..Default::default()
        };
        let result = apply_filter_policy(&policy, PingKind::Success, &metadata, None);
        assert_eq!(result, PingKind::Success);
    }

    #[test]
    fn failure_keyword_overrides_kind() {
        let policy = FilterPolicy {
            failure_kw: vec!["ERROR".to_string()],
            ..Default::default()
        };
        let metadata = PingMetadata::default();
        let result = apply_filter_policy(&policy, PingKind::Log, &metadata, Some("job exited: ERROR"));
        assert_eq!(result, PingKind::Fail);
    }

    #[test]
    fn body_regex_mismatch_filters_to_ign() {
        let policy = FilterPolicy {
            body_regex: Some(r"^OK\b".to_string()),
            ..Default::default()
        };
        let metadata = PingMetadata::default();
        let result = apply_filter_policy(&policy, PingKind::Log, &metadata, Some("unexpected output"));
        assert_eq!(result, PingKind::Ign);
    }

    #[tokio::test]
    async fn fail_ping_then_resume_roundtrip() {
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

        record_ping(&pool, &check, PingKind::Success, PingMetadata::default(), None)
            .await
            .unwrap();
        let after_success = checks::find_by_id(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(after_success.status(), Status::Up);
        assert_eq!(after_success.n_pings, 1);

        record_ping(&pool, &after_success, PingKind::Fail, PingMetadata::default(), None)
            .await
            .unwrap();
        let after_fail = checks::find_by_id(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(after_fail.status(), Status::Down);

        let flips_for_check = flips::history_for_check(&pool, "c1", 10).await.unwrap();
        assert_eq!(flips_for_check.len(), 1);
        assert_eq!(flips_for_check[0].reason(), FlipReason::Fail);

        // Manual resume picks up from the failed state.
        let resumed = resume_check(&pool, &after_fail).await.unwrap();
        assert!(resumed);
        let after_resume = checks::find_by_id(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(after_resume.status(), Status::Up);

        let flips_after_resume = flips::history_for_check(&pool, "c1", 10).await.unwrap();
        assert_eq!(flips_after_resume.len(), 2);

        // Resuming an already-up check is a no-op.
        assert!(!resume_check(&pool, &after_resume).await.unwrap());
    }

    #[tokio::test]
    async fn manual_resume_blocks_auto_recovery_until_resumed() {
        let pool = crate::db::test_pool().await;
        let check = checks::insert(
            &pool,
            checks::NewCheck {
                id: "c2",
                fingerprint: "fp2",
                name: "strict-job",
                slug: "strict-job",
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
        checks::set_manual_resume(&pool, "c2", true).await.unwrap();
        let check = checks::find_by_id(&pool, "c2").await.unwrap().unwrap();

        record_ping(&pool, &check, PingKind::Fail, PingMetadata::default(), None)
            .await
            .unwrap();
        let down = checks::find_by_id(&pool, "c2").await.unwrap().unwrap();
        assert_eq!(down.status(), Status::Down);

        record_ping(&pool, &down, PingKind::Success, PingMetadata::default(), None)
            .await
            .unwrap();
        let still_down = checks::find_by_id(&pool, "c2").await.unwrap().unwrap();
        assert_eq!(still_down.status(), Status::Down, "manual_resume must block auto-recovery");

        resume_check(&pool, &still_down).await.unwrap();
        let resumed = checks::find_by_id(&pool, "c2").await.unwrap().unwrap();
        assert_eq!(resumed.status(), Status::Up);
    }

    #[tokio::test]
    async fn success_after_start_records_last_duration() {
        let pool = crate::db::test_pool().await;
        let check = checks::insert(
            &pool,
            checks::NewCheck {
                id: "c3",
                fingerprint: "fp3",
                name: "timed-job",
                slug: "timed-job",
                project_id: None,
                schedule_kind: ScheduleKind::Simple,
                timeout_secs: Some(3_600),
                schedule_expr: None,
                timezone: "UTC",
                grace_secs: 0,
            },
        )
        .await
        .unwrap();

        record_ping(&pool, &check, PingKind::Start, PingMetadata::default(), None)
            .await
            .unwrap();
        let started = checks::find_by_id(&pool, "c3").await.unwrap().unwrap();
        assert!(started.last_start.is_some());

        let backdated_start = chrono::Utc::now() - chrono::Duration::seconds(45);
        sqlx::query("UPDATE checks SET last_start = ? WHERE id = ?")
            .bind(backdated_start)
            .bind("c3")
            .execute(&pool)
            .await
            .unwrap();
        let backdated = checks::find_by_id(&pool, "c3").await.unwrap().unwrap();

        record_ping(&pool, &backdated, PingKind::Success, PingMetadata::default(), None)
            .await
            .unwrap();
        let finished = checks::find_by_id(&pool, "c3").await.unwrap().unwrap();
        assert_eq!(finished.status(), Status::Up);
        assert!(finished.last_start.is_none());
        let duration = finished.last_duration_secs.expect("last_duration_secs must be recorded");
        assert!((44..=46).contains(&duration), "expected ~45s, got {duration}");
    }

    #[tokio::test]
    async fn unparseable_schedule_pauses_check_but_still_accepts_the_ping() {
        let pool = crate::db::test_pool().await;
        let check = checks::insert(
            &pool,
            checks::NewCheck {
                id: "c4",
                fingerprint: "fp4",
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

        let ping = record_ping(&pool, &check, PingKind::Success, PingMetadata::default(), None)
            .await
            .unwrap();
        assert_eq!(ping.n, 1, "the ping is still accepted and recorded");

        let paused = checks::find_by_id(&pool, "c4").await.unwrap().unwrap();
        assert_eq!(paused.status(), Status::Paused);
        assert_eq!(paused.alert_after, None);
    }
}
