//! Transport interface: a closed tagged union over notification
//! providers, dispatched by a channel's `kind` string.
//!
//! Every real provider below is reached through `reqwest`, the same
//! HTTP client the intake surface already depends on — webhook, Slack,
//! and PagerDuty all publish plain JSON webhook/Events API endpoints,
//! so none of them need a bespoke SDK.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::TransportError;
use crate::models::{Channel, Check, Flip, Status};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url_up: Option<String>,
    pub url_down: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub address: String,
    /// A configured transactional-email relay webhook (SMTP itself is
    /// out of scope for this crate).
    pub relay_url: String,
    #[serde(default = "default_true")]
    pub notify_up: bool,
    #[serde(default = "default_true")]
    pub notify_down: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagerDutyConfig {
    pub integration_key: String,
}

fn default_true() -> bool {
    true
}

/// The transport variants this crate implements. A channel's `kind`
/// column selects the variant; `value` is its JSON-encoded config blob.
#[derive(Debug, Clone)]
pub enum Transport {
    Webhook(WebhookConfig),
    Email(EmailConfig),
    Slack(SlackConfig),
    PagerDuty(PagerDutyConfig),
    /// Used by tests and by channels with no real endpoint configured:
    /// logs the notification instead of sending it anywhere.
    LogOnly,
}

impl Transport {
    pub fn from_channel(channel: &Channel) -> Result<Self, TransportError> {
        match channel.kind.as_str() {
            "webhook" => serde_json::from_str(&channel.value)
                .map(Transport::Webhook)
                .map_err(|e| TransportError::permanent(format!("invalid webhook config: {e}"))),
            "email" => serde_json::from_str(&channel.value)
                .map(Transport::Email)
                .map_err(|e| TransportError::permanent(format!("invalid email config: {e}"))),
            "slack" => serde_json::from_str(&channel.value)
                .map(Transport::Slack)
                .map_err(|e| TransportError::permanent(format!("invalid slack config: {e}"))),
            "pagerduty" => serde_json::from_str(&channel.value)
                .map(Transport::PagerDuty)
                .map_err(|e| TransportError::permanent(format!("invalid pagerduty config: {e}"))),
            "log" => Ok(Transport::LogOnly),
            other => Err(TransportError::permanent(format!("unknown channel kind '{other}'"))),
        }
    }

    /// Deterministic, no side effects.
    pub fn is_noop(&self, new_status: Status) -> bool {
        match self {
            Self::Webhook(c) => match new_status {
                Status::Up => c.url_up.is_none(),
                Status::Down => c.url_down.is_none(),
                _ => true,
            },
            Self::Email(c) => match new_status {
                Status::Up => !c.notify_up,
                Status::Down => !c.notify_down,
                _ => true,
            },
            Self::Slack(_) | Self::PagerDuty(_) => !matches!(new_status, Status::Up | Status::Down),
            Self::LogOnly => false,
        }
    }

    pub async fn notify(&self, client: &Client, check: &Check, flip: &Flip) -> Result<(), TransportError> {
        let new_status: Status = flip.new_status.parse().unwrap_or(Status::Down);
        let is_repeat = flip.is_nag();

        match self {
            Self::Webhook(c) => {
                let url = match new_status {
                    Status::Up => c.url_up.as_deref(),
                    Status::Down => c.url_down.as_deref(),
                    _ => None,
                };
                let Some(url) = url else {
                    return Ok(());
                };
                let mut req = client.post(url).timeout(DEFAULT_TIMEOUT).json(&json!({
                    "check_id": check.id,
                    "name": check.name,
                    "status": new_status.to_string(),
                    "repeat": is_repeat,
                }));
                for (k, v) in &c.headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                send(req).await
            }
            Self::Email(c) => {
                let req = client.post(&c.relay_url).timeout(DEFAULT_TIMEOUT).json(&json!({
                    "to": c.address,
                    "subject": subject_line(check, new_status, is_repeat),
                    "status": new_status.to_string(),
                }));
                send(req).await
            }
            Self::Slack(c) => {
                let req = client.post(&c.webhook_url).timeout(DEFAULT_TIMEOUT).json(&json!({
                    "text": subject_line(check, new_status, is_repeat),
                }));
                send(req).await
            }
            Self::PagerDuty(c) => {
                let event_action = match new_status {
                    Status::Down => "trigger",
                    _ => "resolve",
                };
                let req = client
                    .post("https://events.pagerduty.com/v2/enqueue")
                    .timeout(DEFAULT_TIMEOUT)
                    .json(&json!({
                        "routing_key": c.integration_key,
                        "event_action": event_action,
                        "dedup_key": check.id,
                        "payload": {
                            "summary": subject_line(check, new_status, is_repeat),
                            "source": check.name,
                            "severity": "critical",
                            "timestamp": Utc::now().to_rfc3339(),
                        },
                    }));
                send(req).await
            }
            Self::LogOnly => {
                tracing::info!(
                    check = %check.name,
                    status = %new_status,
                    repeat = is_repeat,
                    "log-only transport notification"
                );
                Ok(())
            }
        }
    }
}

fn subject_line(check: &Check, status: Status, is_repeat: bool) -> String {
    let base = format!("{} is {}", check.name, status);
    if is_repeat { format!("{base} (repeat notification)") } else { base }
}

async fn send(req: reqwest::RequestBuilder) -> Result<(), TransportError> {
    let response = req.send().await.map_err(|e| TransportError::transient(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 410 || status.as_u16() == 401 {
        return Err(TransportError::permanent(format!("transport rejected delivery: {status}")));
    }
    Err(TransportError::transient(format!("transport returned {status}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_is_noop_without_matching_url() {
        let transport = Transport::Webhook(WebhookConfig {
            url_up: None,
            url_down: Some("https://example.com/down".to_string()),
            headers: Vec::new(),
        });
        assert!(transport.is_noop(Status::Up));
        assert!(!transport.is_noop(Status::Down));
    }

    #[test]
    fn email_respects_notify_flags() {
        let transport = Transport::Email(EmailConfig {
            address: "ops@example.com".to_string(),
            relay_url: "https://relay.example.com".to_string(),
            notify_up: false,
            notify_down: true,
        });
        assert!(transport.is_noop(Status::Up));
        assert!(!transport.is_noop(Status::Down));
    }

    #[test]
    fn subject_line_marks_repeat_notifications() {
        let check = Check {
            id: "c1".into(),
            fingerprint: "fp".into(),
            name: "nightly-backup".into(),
            slug: "nightly-backup".into(),
            project_id: None,
            schedule_kind: "simple".into(),
            timeout_secs: Some(60),
            schedule_expr: None,
            timezone: "UTC".into(),
            grace_secs: 0,
            status: "down".into(),
            last_ping: None,
            last_start: None,
            alert_after: None,
            n_pings: 1,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let line = subject_line(&check, Status::Down, true);
        assert!(line.ends_with("(repeat notification)"));
    }
}
