//! Status resolver: the pure function that defines the product's
//! central semantics. No I/O — callers persist what it returns.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::ScheduleError;
use crate::models::{Check, ReportedStatus, Status};
use crate::schedule::Schedule;

/// Resolver output: the label to report/cache and the next instant at
/// which the alerting scan should re-evaluate this check (`None` means "not scheduled").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub label: ReportedStatus,
    pub next_alert_after: Option<DateTime<Utc>>,
}

/// Resolve a check's status as of `now`. Pure: same inputs, same output.
pub fn resolve(check: &Check, schedule: &Schedule, tz: Tz, now: DateTime<Utc>) -> Result<Resolution, ScheduleError> {
    if check.status() == Status::Paused {
        return Ok(Resolution {
            label: ReportedStatus::Paused,
            next_alert_after: None,
        });
    }
    if check.n_pings == 0 {
        return Ok(Resolution {
            label: ReportedStatus::New,
            next_alert_after: None,
        });
    }

    let grace = chrono::Duration::seconds(check.grace_secs);
    let running = check.last_start.is_some();

    let anchor = if running {
        check.last_start.expect("running implies last_start is set")
    } else {
        check
            .last_ping
            .expect("n_pings > 0 implies last_ping is set")
    };

    let expected = schedule.next_expected(tz, anchor)?;
    let deadline = expected + grace;

    if now < expected {
        return Ok(Resolution {
            label: if running { ReportedStatus::Started } else { ReportedStatus::Up },
            next_alert_after: Some(deadline),
        });
    }
    if now < deadline {
        return Ok(Resolution {
            label: if running { ReportedStatus::Started } else { ReportedStatus::Up },
            next_alert_after: Some(deadline),
        });
    }
    Ok(Resolution {
        label: ReportedStatus::Down,
        next_alert_after: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn base_check() -> Check {
        Check {
            id: "c1".into(),
            fingerprint: "fp".into(),
            name: "job".into(),
            slug: "job".into(),
            project_id: None,
            schedule_kind: "simple".into(),
            timeout_secs: Some(60),
            schedule_expr: None,
            timezone: "UTC".into(),
            grace_secs: 30,
            status: "new".into(),
            last_ping: None,
            last_start: None,
            alert_after: None,
            n_pings: 0,
            last_duration_secs: None,
            manual_resume: false,
            filter_methods: None,
            filter_subject: None,
            filter_body: None,
            success_kw: None,
            start_kw: None,
            failure_kw: None,
            locked_by: None,
            locked_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn simple_schedule() -> Schedule {
        Schedule::Simple {
            timeout: chrono::Duration::seconds(60),
        }
    }

    #[test]
    fn never_pinged_is_new() {
        let check = base_check();
        let res = resolve(&check, &simple_schedule(), Tz::UTC, Utc::now()).unwrap();
        assert_eq!(res.label, ReportedStatus::New);
        assert_eq!(res.next_alert_after, None);
    }

    #[test]
    fn paused_overrides_everything() {
        let mut check = base_check();
        check.status = "paused".into();
        check.n_pings = 5;
        check.last_ping = Some(Utc::now());
        let res = resolve(&check, &simple_schedule(), Tz::UTC, Utc::now()).unwrap();
        assert_eq!(res.label, ReportedStatus::Paused);
        assert_eq!(res.next_alert_after, None);
    }

    #[test]
    fn on_time_is_up() {
        let mut check = base_check();
        check.n_pings = 1;
        check.status = "up".into();
        let pinged_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        check.last_ping = Some(pinged_at);
        let now = pinged_at + chrono::Duration::seconds(10);
        let res = resolve(&check, &simple_schedule(), Tz::UTC, now).unwrap();
        assert_eq!(res.label, ReportedStatus::Up);
        assert_eq!(res.next_alert_after, Some(pinged_at + chrono::Duration::seconds(90)));
    }

    #[test]
    fn within_grace_is_still_up() {
        let mut check = base_check();
        check.n_pings = 1;
        check.status = "up".into();
        let pinged_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        check.last_ping = Some(pinged_at);
        // timeout(60) + grace(30) = deadline at +90s; +70s is past expected but within grace.
        let now = pinged_at + chrono::Duration::seconds(70);
        let res = resolve(&check, &simple_schedule(), Tz::UTC, now).unwrap();
        assert_eq!(res.label, ReportedStatus::Up);
    }

    #[test]
    fn past_deadline_is_down() {
        let mut check = base_check();
        check.n_pings = 1;
        check.status = "up".into();
        let pinged_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        check.last_ping = Some(pinged_at);
        let now = pinged_at + chrono::Duration::seconds(91);
        let res = resolve(&check, &simple_schedule(), Tz::UTC, now).unwrap();
        assert_eq!(res.label, ReportedStatus::Down);
        assert_eq!(res.next_alert_after, None);
    }

    #[test]
    fn running_invocation_reports_started_but_is_cached_as_up() {
        let mut check = base_check();
        check.n_pings = 2;
        check.status = "up".into();
        let started_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        check.last_start = Some(started_at);
        check.last_ping = Some(started_at - chrono::Duration::seconds(120));
        let now = started_at + chrono::Duration::seconds(1);
        let res = resolve(&check, &simple_schedule(), Tz::UTC, now).unwrap();
        assert_eq!(res.label, ReportedStatus::Started);
        assert_eq!(res.label.stored(), Status::Up);
    }
}
