//! Flip retention pruning loop: flips older than the system-wide
//! retention constant are deleted on a schedule. Ping retention is
//! pruned opportunistically on write (see `store::pings`).

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::store::flips;

const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

pub async fn cleanup_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    info!("cleanup job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cleanup job shutting down");
                return;
            }
            _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
        }

        let retention = match config.flip_retention() {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "invalid flip_retention, defaulting to 93d");
                chrono::Duration::days(93)
            }
        };

        let cutoff = Utc::now() - retention;
        match flips::prune_older_than(&pool, cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, cutoff = %cutoff.to_rfc3339(), "pruned old flips");
                }
            }
            Err(e) => error!(error = %e, "flip cleanup failed"),
        }
    }
}
