//! Dispatcher: drains unprocessed flips and fans each one out to its
//! check's channels with a bounded worker pool.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::{Channel, Check, Flip};
use crate::store::{channels, checks, flips, notifications};
use crate::transport::Transport;

/// Drain unprocessed flips, bounded to `batch_size` per call. Spawns one
/// task per flip's channel fan-out, capped by `semaphore` permits.
pub async fn drain_once(
    pool: &SqlitePool,
    client: &Client,
    semaphore: &Arc<Semaphore>,
    batch_size: i64,
) -> anyhow::Result<usize> {
    let pending = flips::unprocessed(pool, batch_size).await?;
    let mut dispatched = 0;

    for flip in pending {
        let Some(check) = checks::find_by_id(pool, &flip.owner_id).await? else {
            // Owning check was deleted since the flip was written; drop it.
            flips::mark_processed(pool, &flip.id).await?;
            continue;
        };
        dispatch_one(pool, client, semaphore, &check, &flip).await?;
        flips::mark_processed(pool, &flip.id).await?;
        dispatched += 1;
    }

    Ok(dispatched)
}

/// Channel selection + fan-out for a single flip.
async fn dispatch_one(
    pool: &SqlitePool,
    client: &Client,
    semaphore: &Arc<Semaphore>,
    check: &Check,
    flip: &Flip,
) -> anyhow::Result<()> {
    let new_status = flip.new_status.parse().unwrap_or(crate::models::Status::Down);
    let mut targets: Vec<Channel> = channels::for_check(pool, &check.id).await?;
    targets.retain(|channel| match Transport::from_channel(channel) {
        Ok(transport) => !transport.is_noop(new_status),
        Err(e) => {
            warn!(channel = %channel.id, error = %e, "dropping channel with unparseable config");
            false
        }
    });

    let mut handles = Vec::with_capacity(targets.len());
    for channel in targets {
        let pool = pool.clone();
        let client = client.clone();
        let check = check.clone();
        let flip = flip.clone();
        let permit = semaphore.clone().acquire_owned().await?;

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = notify_one_channel(&pool, &client, &check, &flip, &channel).await {
                error!(channel = %channel.id, error = %e, "channel dispatch failed");
            }
        }));
    }

    for handle in handles {
        // A panicking dispatch task must not take down the dispatcher loop;
        // each channel's dispatch is independent of the others.
        if let Err(e) = handle.await {
            error!(error = %e, "dispatch task panicked");
        }
    }

    Ok(())
}

async fn notify_one_channel(
    pool: &SqlitePool,
    client: &Client,
    check: &Check,
    flip: &Flip,
    channel: &Channel,
) -> anyhow::Result<()> {
    let notification_id = Uuid::new_v4().to_string();
    let new_status = flip.new_status.parse().unwrap_or(crate::models::Status::Down);

    let claimed = notifications::insert_pending(
        pool,
        &notification_id,
        &check.id,
        &channel.id,
        &flip.id,
        new_status,
    )
    .await?;
    if !claimed {
        // UNIQUE(flip_id, channel_id) already satisfied by a peer dispatcher.
        return Ok(());
    }

    let transport = Transport::from_channel(channel)?;
    let started = Utc::now();

    match transport.notify(client, check, flip).await {
        Ok(()) => {
            let duration_ms = (Utc::now() - started).num_milliseconds();
            channels::record_success(pool, &channel.id, Utc::now(), duration_ms).await?;
        }
        Err(e) if e.permanent => {
            notifications::record_error(pool, &notification_id, &e.message).await?;
            channels::disable(pool, &channel.id, &e.message).await?;
        }
        Err(e) => {
            notifications::record_error(pool, &notification_id, &e.message).await?;
            channels::record_transient_error(pool, &channel.id, &e.message).await?;
        }
    }

    Ok(())
}
