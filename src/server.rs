//! HTTP ingestion surface: the subset of the product's web surface the
//! core itself depends on — ping intake and the badge.

use axum::Router;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use tracing::warn;

use crate::models::{PingKind, PingMetadata};
use crate::store::checks;
use crate::{ingest, resolver, schedule};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping/{check_id}/{kind}", post(ping_with_kind))
        .route("/ping/{check_id}", get(ping_success))
        .route("/badge/{fingerprint}", get(badge))
        .with_state(state)
}

async fn ping_success(
    State(state): State<AppState>,
    Path(check_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    handle_ping(&state, &check_id, "success", connect_info, headers, body).await
}

async fn ping_with_kind(
    State(state): State<AppState>,
    Path((check_id, kind)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    handle_ping(&state, &check_id, &kind, connect_info, headers, body).await
}

fn parse_kind(raw: &str) -> Option<(PingKind, Option<i64>)> {
    match raw {
        "start" => Some((PingKind::Start, None)),
        "success" | "" => Some((PingKind::Success, None)),
        "fail" => Some((PingKind::Fail, None)),
        "log" => Some((PingKind::Log, None)),
        other => other.parse::<i64>().ok().map(|code| {
            if code == 0 {
                (PingKind::Success, Some(code))
            } else {
                (PingKind::Fail, Some(code))
            }
        }),
    }
}

async fn handle_ping(
    state: &AppState,
    check_id: &str,
    kind_segment: &str,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let Some((kind, exit_status)) = parse_kind(kind_segment) else {
        return (StatusCode::BAD_REQUEST, "unknown ping kind").into_response();
    };

    let check = match checks::find_by_id(&state.pool, check_id).await {
        Ok(Some(c)) => c,
        Ok(None) => return (StatusCode::NOT_FOUND, "unknown check").into_response(),
        Err(e) => {
            warn!(error = %e, check_id = %check_id, "ping lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    let metadata = PingMetadata {
        scheme: headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        method: Some("POST".to_string()),
        exit_status,
        run_id: headers
            .get("rid")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        subject: None,
    };

    // Small bodies only: above this, a real deployment would hand the
    // body to object storage and store only the key here.
    const MAX_INLINE_BODY: usize = 10_000;
    let body_str = if body.len() <= MAX_INLINE_BODY {
        std::str::from_utf8(&body).ok()
    } else {
        None
    };

    match ingest::record_ping(&state.pool, &check, kind, metadata, body_str).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(error = %e, check_id = %check_id, "failed to record ping");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Read-only status badge, authenticated only by the unguessable
/// fingerprint — no token check.
async fn badge(State(state): State<AppState>, Path(fingerprint): Path<String>) -> Response {
    let fingerprint = fingerprint.strip_suffix(".svg").unwrap_or(&fingerprint);

    let check = match checks::find_by_fingerprint(&state.pool, fingerprint).await {
        Ok(Some(c)) => c,
        Ok(None) => return (StatusCode::NOT_FOUND, "unknown badge").into_response(),
        Err(e) => {
            warn!(error = %e, "badge lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    let (schedule, tz) = match schedule::for_check(&check) {
        Ok(s) => s,
        Err(_) => (schedule::Schedule::Simple { timeout: chrono::Duration::hours(1) }, chrono_tz::Tz::UTC),
    };
    let label = resolver::resolve(&check, &schedule, tz, chrono::Utc::now())
        .map(|r| r.label.stored())
        .unwrap_or(crate::models::Status::New);

    let (color, text) = match label {
        crate::models::Status::Up => ("#4c1", "up"),
        crate::models::Status::Down => ("#e05d44", "down"),
        crate::models::Status::Paused => ("#9f9f9f", "paused"),
        crate::models::Status::New => ("#9f9f9f", "new"),
    };

    let svg = render_badge_svg(text, color);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/svg+xml"), (header::CACHE_CONTROL, "no-cache")],
        svg,
    )
        .into_response()
}

fn render_badge_svg(text: &str, color: &str) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="20" role="img" aria-label="status: {text}">
<rect width="100" height="20" fill="{color}"/>
<text x="50" y="14" fill="#fff" font-family="Verdana,sans-serif" font-size="11" text-anchor="middle">{text}</text>
</svg>"##
    )
}
