//! Schedule evaluator: a pure function from a schedule descriptor and
//! a reference instant to the next expected ping instant.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::ScheduleError;

/// One field of a calendar expression ("minute", "hour", "day", ...):
/// either unconstrained or an explicit set of accepted values.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldSpec {
    Any,
    Values(Vec<u32>),
}

impl FieldSpec {
    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(vs) => vs.contains(&value),
        }
    }

    fn min(&self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Values(vs) => vs.iter().copied().min().unwrap_or(0),
        }
    }

    /// Parse one comma-separated systemd OnCalendar field: `*`, `N`,
    /// `N,M`, `N..M`, `N/S`, `*/S`, or `N..M/S`.
    fn parse(field: &str, min: u32, max: u32) -> Result<Self, String> {
        if field == "*" {
            return Ok(Self::Any);
        }
        let mut values = Vec::new();
        for part in field.split(',') {
            let part = part.trim();
            let (range_part, step) = match part.split_once('/') {
                Some((r, s)) => (
                    r,
                    s.parse::<u32>().map_err(|_| format!("invalid step '{s}' in '{part}'"))?,
                ),
                None => (part, 1),
            };
            let (start, end) = if range_part == "*" {
                (min, max)
            } else if let Some((a, b)) = range_part.split_once("..") {
                (
                    a.parse::<u32>().map_err(|_| format!("invalid range start '{a}'"))?,
                    b.parse::<u32>().map_err(|_| format!("invalid range end '{b}'"))?,
                )
            } else {
                let v = range_part
                    .parse::<u32>()
                    .map_err(|_| format!("invalid value '{range_part}'"))?;
                (v, v)
            };
            if start < min || end > max || start > end {
                return Err(format!("value out of range in '{part}' (expected {min}..={max})"));
            }
            let mut v = start;
            while v <= end {
                values.push(v);
                v += step.max(1);
            }
        }
        values.sort_unstable();
        values.dedup();
        Ok(Self::Values(values))
    }
}

fn weekday_index(dt: &NaiveDateTime) -> u32 {
    // Monday = 0 .. Sunday = 6, matching chrono::Weekday::num_days_from_monday.
    dt.weekday().num_days_from_monday()
}

fn parse_weekday_token(s: &str) -> Result<u32, String> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Ok(0),
        "tue" | "tuesday" => Ok(1),
        "wed" | "wednesday" => Ok(2),
        "thu" | "thursday" => Ok(3),
        "fri" | "friday" => Ok(4),
        "sat" | "saturday" => Ok(5),
        "sun" | "sunday" => Ok(6),
        other => Err(format!("unknown weekday '{other}'")),
    }
}

fn parse_weekdays(field: &str) -> Result<Vec<u32>, String> {
    let mut days = Vec::new();
    for part in field.split(',') {
        let part = part.trim();
        if let Some((a, b)) = part.split_once("..") {
            let start = parse_weekday_token(a)?;
            let end = parse_weekday_token(b)?;
            let mut d = start;
            loop {
                days.push(d);
                if d == end {
                    break;
                }
                d = (d + 1) % 7;
            }
        } else {
            days.push(parse_weekday_token(part)?);
        }
    }
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

/// A parsed systemd OnCalendar expression. Supports the common
/// shorthands plus the full `[weekdays ]Y-M-D H:M:S` grammar.
#[derive(Debug, Clone)]
pub struct OnCalendarExpr {
    weekdays: Option<Vec<u32>>,
    years: FieldSpec,
    months: FieldSpec,
    days: FieldSpec,
    hours: FieldSpec,
    minutes: FieldSpec,
    seconds: FieldSpec,
    source: String,
}

impl OnCalendarExpr {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let canonical = match trimmed.to_lowercase().as_str() {
            "minutely" => "*-*-* *:*:00",
            "hourly" => "*-*-* *:00:00",
            "daily" => "*-*-* 00:00:00",
            "weekly" => "mon *-*-* 00:00:00",
            "monthly" => "*-*-01 00:00:00",
            "yearly" | "annually" => "*-01-01 00:00:00",
            "quarterly" => "*-01,04,07,10-01 00:00:00",
            "semiannually" => "*-01,07-01 00:00:00",
            _ => trimmed,
        };

        let tokens: Vec<&str> = canonical.split_whitespace().collect();
        let mut tokens = tokens.as_slice();

        let weekdays = if let Some(first) = tokens.first()
            && first.chars().next().is_some_and(|c| c.is_alphabetic())
        {
            let wd = parse_weekdays(first).map_err(|message| ScheduleError::InvalidOnCalendar {
                expr: expr.to_string(),
                message,
            })?;
            tokens = &tokens[1..];
            Some(wd)
        } else {
            None
        };

        let mut date_spec = "*-*-*";
        let mut time_spec = "00:00:00";
        for tok in tokens {
            if tok.contains(':') {
                time_spec = tok;
            } else if tok.contains('-') {
                date_spec = tok;
            }
        }

        let date_parts: Vec<&str> = date_spec.split('-').collect();
        if date_parts.len() != 3 {
            return Err(ScheduleError::InvalidOnCalendar {
                expr: expr.to_string(),
                message: format!("date spec '{date_spec}' must be Y-M-D"),
            });
        }
        let time_parts: Vec<&str> = time_spec.split(':').collect();
        if time_parts.is_empty() || time_parts.len() > 3 {
            return Err(ScheduleError::InvalidOnCalendar {
                expr: expr.to_string(),
                message: format!("time spec '{time_spec}' must be H:M[:S]"),
            });
        }

        let wrap = |r: Result<FieldSpec, String>| {
            r.map_err(|message| ScheduleError::InvalidOnCalendar {
                expr: expr.to_string(),
                message,
            })
        };

        Ok(Self {
            weekdays,
            years: wrap(FieldSpec::parse(date_parts[0], 1970, 2200))?,
            months: wrap(FieldSpec::parse(date_parts[1], 1, 12))?,
            days: wrap(FieldSpec::parse(date_parts[2], 1, 31))?,
            hours: wrap(FieldSpec::parse(time_parts[0], 0, 23))?,
            minutes: wrap(FieldSpec::parse(time_parts.get(1).copied().unwrap_or("0"), 0, 59))?,
            seconds: wrap(FieldSpec::parse(time_parts.get(2).copied().unwrap_or("0"), 0, 59))?,
            source: expr.to_string(),
        })
    }

    fn matches_date(&self, d: NaiveDate) -> bool {
        self.years.matches(d.year() as u32)
            && self.months.matches(d.month())
            && self.days.matches(d.day())
            && self
                .weekdays
                .as_ref()
                .is_none_or(|wds| wds.contains(&d.weekday().num_days_from_monday()))
    }

    fn matches_time(&self, t: NaiveDateTime) -> bool {
        self.hours.matches(t.hour()) && self.minutes.matches(t.minute()) && self.seconds.matches(t.second())
    }

    /// Least naive datetime `> after` matching this expression, ignoring
    /// timezone localization. Jumps whole fields forward instead of
    /// scanning second-by-second.
    fn next_naive(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start_second = self.seconds.min();
        let mut candidate = after.date().and_hms_opt(after.hour(), after.minute(), start_second)?;
        if candidate <= after {
            candidate += Duration::minutes(1);
            candidate = candidate.date().and_hms_opt(candidate.hour(), candidate.minute(), start_second)?;
        }

        const MAX_STEPS: u32 = 4 * 366 * 24 * 60;
        for _ in 0..MAX_STEPS {
            let date = candidate.date();
            if !self.years.matches(date.year() as u32) {
                candidate = NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?.and_hms_opt(0, 0, start_second)?;
                continue;
            }
            if !self.months.matches(date.month()) {
                candidate = next_month_start(date)?.and_hms_opt(0, 0, start_second)?;
                continue;
            }
            if !self.matches_date(date) {
                candidate = date.succ_opt()?.and_hms_opt(0, 0, start_second)?;
                continue;
            }
            if !self.hours.matches(candidate.hour()) {
                candidate = bump_hour(candidate)?;
                continue;
            }
            if !self.minutes.matches(candidate.minute()) {
                candidate += Duration::minutes(1);
                candidate = candidate.date().and_hms_opt(candidate.hour(), candidate.minute(), start_second)?;
                continue;
            }
            if !self.matches_time(candidate) {
                candidate += Duration::seconds(1);
                continue;
            }
            return Some(candidate);
        }
        None
    }

    /// Least instant `> after` matching this expression in timezone `tz`,
    /// handling DST gaps (skip) and repeated hours (fire at the first
    /// occurrence only).
    pub fn next_occurrence(&self, tz: Tz, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let mut cursor = after.with_timezone(&tz).naive_local();
        for _ in 0..10_000 {
            let candidate = self
                .next_naive(cursor)
                .ok_or_else(|| ScheduleError::NoOccurrence(10_000))?;
            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => return Ok(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(first, _second) => return Ok(first.with_timezone(&Utc)),
                LocalResult::None => {
                    // DST spring-forward gap: this wall-clock time never happens.
                    cursor = candidate;
                }
            }
        }
        Err(ScheduleError::NoOccurrence(10_000))
    }
}

fn next_month_start(d: NaiveDate) -> Option<NaiveDate> {
    if d.month() == 12 {
        NaiveDate::from_ymd_opt(d.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(d.year(), d.month() + 1, 1)
    }
}

fn bump_hour(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    let next = dt + Duration::hours(1);
    next.date().and_hms_opt(next.hour(), 0, 0)
}

/// The schedule descriptor attached to a check.
#[derive(Debug, Clone)]
pub enum Schedule {
    Simple { timeout: Duration },
    Cron { schedule: Box<cron::Schedule>, source: String },
    OnCalendar { expr: OnCalendarExpr },
}

impl Schedule {
    pub fn parse_cron(expr: &str) -> Result<Self, ScheduleError> {
        // The `cron` crate parses 7-field expressions (sec min hour dom mon dow year);
        // the product's schedules are conventional 5-field (min hour dom mon dow).
        let seven_field = format!("0 {expr} *");
        let schedule = cron::Schedule::from_str(&seven_field).map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::Cron {
            schedule: Box::new(schedule),
            source: expr.to_string(),
        })
    }

    pub fn parse_oncalendar(expr: &str) -> Result<Self, ScheduleError> {
        Ok(Self::OnCalendar {
            expr: OnCalendarExpr::parse(expr)?,
        })
    }

    /// The next instant `> t` at which a ping is expected. Pure function
    /// of its inputs.
    pub fn next_expected(&self, tz: Tz, t: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            Self::Simple { timeout } => Ok(t + *timeout),
            Self::Cron { schedule, .. } => {
                let after_tz = t.with_timezone(&tz);
                schedule
                    .after(&after_tz)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoOccurrence(0))
            }
            Self::OnCalendar { expr } => expr.next_occurrence(tz, t),
        }
    }
}

/// Build the `(Schedule, Tz)` pair for a check from its stored columns.
/// Used by both the resolver and the ingest writer so the two sides
/// never disagree on what "next expected" means.
pub fn for_check(check: &crate::models::Check) -> Result<(Schedule, Tz), ScheduleError> {
    let tz: Tz = check
        .timezone
        .parse()
        .map_err(|_| ScheduleError::UnknownTimezone(check.timezone.clone()))?;
    let schedule = match check.schedule_kind() {
        crate::models::ScheduleKind::Simple => Schedule::Simple {
            timeout: Duration::seconds(check.timeout_secs.unwrap_or(3600)),
        },
        crate::models::ScheduleKind::Cron => {
            let expr = check.schedule_expr.as_deref().unwrap_or("* * * * *");
            Schedule::parse_cron(expr)?
        }
        crate::models::ScheduleKind::OnCalendar => {
            let expr = check.schedule_expr.as_deref().unwrap_or("daily");
            Schedule::parse_oncalendar(expr)?
        }
    };
    Ok((schedule, tz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn simple_schedule_adds_timeout() {
        let sched = Schedule::Simple {
            timeout: Duration::seconds(60),
        };
        let next = sched.next_expected(Tz::UTC, utc(2026, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 0, 1, 0));
    }

    #[test]
    fn cron_daily_fires_next_day() {
        let sched = Schedule::parse_cron("0 9 * * *").unwrap();
        let next = sched.next_expected(Tz::UTC, utc(2026, 1, 1, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 2, 9, 0, 0));
    }

    #[test]
    fn cron_round_trip_is_strictly_increasing() {
        let sched = Schedule::parse_cron("*/15 * * * *").unwrap();
        let t0 = utc(2026, 3, 1, 0, 0, 0);
        let t1 = sched.next_expected(Tz::UTC, t0).unwrap();
        let t2 = sched.next_expected(Tz::UTC, t1).unwrap();
        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[test]
    fn oncalendar_daily_shorthand() {
        let expr = OnCalendarExpr::parse("daily").unwrap();
        let next = expr.next_occurrence(Tz::UTC, utc(2026, 1, 1, 5, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 2, 0, 0, 0));
    }

    #[test]
    fn oncalendar_explicit_time() {
        let expr = OnCalendarExpr::parse("*-*-* 02:00:00").unwrap();
        let next = expr.next_occurrence(Tz::UTC, utc(2026, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 2, 0, 0));
    }

    #[test]
    fn dst_spring_forward_gap_is_skipped() {
        // America/New_York, 2026-03-08: clocks jump 02:00 -> 03:00.
        let tz: Tz = "America/New_York".parse().unwrap();
        let expr = OnCalendarExpr::parse("*-*-* 02:00:00").unwrap();
        let before = tz
            .with_ymd_and_hms(2026, 3, 7, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = expr.next_occurrence(tz, before).unwrap();
        // 2026-03-08 02:00 local doesn't exist; the next real occurrence is 2026-03-09 02:00.
        let local = next.with_timezone(&tz);
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(local.hour(), 2);
    }

    #[test]
    fn dst_fall_back_fires_once_at_first_occurrence() {
        // America/New_York, 2026-11-01: 01:00-02:00 occurs twice.
        let tz: Tz = "America/New_York".parse().unwrap();
        let expr = OnCalendarExpr::parse("*-*-* 01:30:00").unwrap();
        let before = tz
            .with_ymd_and_hms(2026, 10, 31, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let first = expr.next_occurrence(tz, before).unwrap();
        let second = expr.next_occurrence(tz, first).unwrap();
        // first is the earliest (pre-fallback, EDT) 01:30 on 2026-11-01; the loop
        // must not fire again at the ambiguous repeat of the same wall-clock time.
        assert_eq!(second.with_timezone(&tz).date_naive().day(), 2);
    }

    #[test]
    fn weekday_filter_lands_on_correct_day() {
        let expr = OnCalendarExpr::parse("mon *-*-* 09:00:00").unwrap();
        // 2026-01-01 is a Thursday.
        let next = expr.next_occurrence(Tz::UTC, utc(2026, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
    }
}
