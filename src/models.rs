use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cached status label stored on a check. `started` is a resolver-only
/// label derived from `up` + a non-null `last_start`; it is never
/// persisted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Up,
    Down,
    Paused,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Up => "up",
            Self::Down => "down",
            Self::Paused => "paused",
        })
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// A status label as reported to API consumers — adds the `started`
/// variant that is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    New,
    Up,
    Started,
    Down,
    Paused,
}

impl ReportedStatus {
    /// The `status` column value this label is cached as.
    pub fn stored(self) -> Status {
        match self {
            Self::New => Status::New,
            Self::Up | Self::Started => Status::Up,
            Self::Down => Status::Down,
            Self::Paused => Status::Paused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Simple,
    Cron,
    OnCalendar,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Cron => "cron",
            Self::OnCalendar => "oncalendar",
        })
    }
}

impl FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "cron" => Ok(Self::Cron),
            "oncalendar" => Ok(Self::OnCalendar),
            other => Err(format!("unknown schedule kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingKind {
    Success,
    Start,
    Fail,
    Log,
    Ign,
}

impl fmt::Display for PingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Start => "start",
            Self::Fail => "fail",
            Self::Log => "log",
            Self::Ign => "ign",
        })
    }
}

impl FromStr for PingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" | "" => Ok(Self::Success),
            "start" => Ok(Self::Start),
            "fail" => Ok(Self::Fail),
            "log" => Ok(Self::Log),
            "ign" => Ok(Self::Ign),
            other => Err(format!("unknown ping kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipReason {
    Timeout,
    Fail,
    Nag,
}

impl fmt::Display for FlipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Fail => "fail",
            Self::Nag => "nag",
        })
    }
}

impl FromStr for FlipReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "fail" => Ok(Self::Fail),
            "nag" => Ok(Self::Nag),
            other => Err(format!("unknown flip reason '{other}'")),
        }
    }
}

/// Per-check ping filter policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterPolicy {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub subject_regex: Option<String>,
    #[serde(default)]
    pub body_regex: Option<String>,
    #[serde(default)]
    pub success_kw: Vec<String>,
    #[serde(default)]
    pub start_kw: Vec<String>,
    #[serde(default)]
    pub failure_kw: Vec<String>,
}

/// The monitored schedule. Maps 1:1 onto the `checks` table.
#[derive(Debug, Clone, FromRow)]
pub struct Check {
    pub id: String,
    pub fingerprint: String,
    pub name: String,
    pub slug: String,
    pub project_id: Option<String>,

    pub schedule_kind: String,
    pub timeout_secs: Option<i64>,
    pub schedule_expr: Option<String>,
    pub timezone: String,
    pub grace_secs: i64,

    pub status: String,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
    pub alert_after: Option<DateTime<Utc>>,

    pub n_pings: i64,
    pub last_duration_secs: Option<i64>,
    pub manual_resume: bool,

    pub filter_methods: Option<String>,
    pub filter_subject: Option<String>,
    pub filter_body: Option<String>,
    pub success_kw: Option<String>,
    pub start_kw: Option<String>,
    pub failure_kw: Option<String>,

    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Check {
    pub fn status(&self) -> Status {
        self.status.parse().unwrap_or(Status::New)
    }

    pub fn schedule_kind(&self) -> ScheduleKind {
        self.schedule_kind.parse().unwrap_or(ScheduleKind::Simple)
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            methods: parse_json_vec(&self.filter_methods),
            subject_regex: self.filter_subject.clone(),
            body_regex: self.filter_body.clone(),
            success_kw: parse_json_vec(&self.success_kw),
            start_kw: parse_json_vec(&self.start_kw),
            failure_kw: parse_json_vec(&self.failure_kw),
        }
    }
}

fn parse_json_vec(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Derive the short, unguessable fingerprint used in badge URLs: a
/// check is identified by UUID internally, but the badge route is
/// deliberately keyed on something that isn't sequential or
/// predictable from the check's creation order.
pub fn compute_fingerprint(check_id: &str, server_secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(server_secret.as_bytes());
    hasher.update(b":");
    hasher.update(check_id.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..16])
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

/// URL-safe slug validation, mirrored on output-channel slugs.
pub fn validate_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, FromRow)]
pub struct Ping {
    pub id: String,
    pub check_id: String,
    pub n: i64,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub scheme: Option<String>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub exit_status: Option<i64>,
    pub run_id: Option<String>,
    pub body: Option<String>,
    pub object_key: Option<String>,
    pub object_size: Option<i64>,
}

/// Metadata the intake writer captures for each ping. Populated by
/// whichever external collaborator receives the HTTP/SMTP request.
#[derive(Debug, Clone, Default)]
pub struct PingMetadata {
    pub scheme: Option<String>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub exit_status: Option<i64>,
    pub run_id: Option<String>,
    /// Email subject, populated only by an email-based collector; always
    /// `None` on the HTTP path, which makes `subject_regex` a no-op there.
    pub subject: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Flip {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub old_status: String,
    pub new_status: String,
    pub reason: String,
}

impl Flip {
    pub fn reason(&self) -> FlipReason {
        self.reason.parse().unwrap_or(FlipReason::Timeout)
    }

    pub fn is_nag(&self) -> bool {
        self.reason() == FlipReason::Nag
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub kind: String,
    pub value: String,
    pub last_notify: Option<DateTime<Utc>>,
    pub last_notify_duration_ms: Option<i64>,
    pub last_error: String,
    pub disabled: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: String,
    pub check_id: String,
    pub channel_id: String,
    pub flip_id: String,
    pub check_status: String,
    pub created_at: DateTime<Utc>,
    pub error: String,
}
