//! Periodic summary reports (`sendreports`). Email rendering/templating
//! lives outside this core; this reuses the status resolver and logs
//! the summary rather than sending mail — actual delivery goes through
//! the same `reqwest`-based transport used for alerts.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::resolver::resolve;
use crate::schedule;
use crate::store::checks;

const REPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

pub async fn run_once(pool: &SqlitePool) -> anyhow::Result<usize> {
    let now = chrono::Utc::now();
    let all = checks::all(pool).await?;
    let mut reported = 0;

    for check in all {
        let Ok((schedule, tz)) = schedule::for_check(&check) else {
            continue;
        };
        let Ok(resolution) = resolve(&check, &schedule, tz, now) else {
            continue;
        };
        info!(check = %check.name, status = %resolution.label, "summary report line");
        reported += 1;
    }

    Ok(reported)
}

pub async fn sendreports_loop(pool: SqlitePool, _config: Arc<Config>, cancel: CancellationToken) {
    info!("sendreports loop started");
    loop {
        match run_once(&pool).await {
            Ok(n) => info!(checks = n, "sent summary reports"),
            Err(e) => error!(error = %e, "summary report cycle failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("sendreports loop shutting down");
                return;
            }
            _ = tokio::time::sleep(REPORT_INTERVAL) => {}
        }
    }
}
