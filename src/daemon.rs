//! Runtime choreography: one pool, one cancellation token, one bounded
//! semaphore, three cooperative loops, and a graceful shutdown
//! sequence.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::{alerting, cleanup, dispatch, nag};

/// Runs the alerting, nag, cleanup, and dispatch loops continuously until
/// shutdown (`sendalerts`).
pub async fn run_sendalerts(pool: SqlitePool, config: Config) -> Result<()> {
    let config = Arc::new(config);
    let cancel = CancellationToken::new();
    let semaphore = Arc::new(Semaphore::new(config.alerting.num_workers as usize));
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .context("building HTTP client")?;

    let alerting_handle = tokio::spawn(alerting::alerting_loop(pool.clone(), config.clone(), cancel.clone()));
    let nag_handle = tokio::spawn(nag::nag_loop(pool.clone(), config.clone(), cancel.clone()));
    let cleanup_handle = tokio::spawn(cleanup::cleanup_loop(pool.clone(), config.clone(), cancel.clone()));
    let dispatch_handle = tokio::spawn(dispatch_loop(
        pool.clone(),
        client,
        semaphore,
        config.clone(),
        cancel.clone(),
    ));

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(15);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = alerting_handle.await;
        let _ = nag_handle.await;
        let _ = cleanup_handle.await;
        let _ = dispatch_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Dispatch, driven at the same cadence as the alerting scan: after each
/// scan completes, drain whatever flips it produced.
async fn dispatch_loop(
    pool: SqlitePool,
    client: Client,
    semaphore: Arc<Semaphore>,
    config: Arc<Config>,
    cancel: CancellationToken,
) {
    info!("dispatch loop started");
    let interval = config.tick_interval().unwrap_or(std::time::Duration::from_secs(2));
    let mut backoff = Backoff::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("dispatch loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match dispatch::drain_once(&pool, &client, &semaphore, config.alerting.batch_size as i64).await {
            Ok(_) => backoff.reset(),
            Err(e) => {
                tracing::error!(error = %e, "dispatch cycle failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff.next_delay()) => {}
                }
            }
        }
    }
}

/// Runs the HTTP ingestion surface (ping intake + badge) until shutdown.
pub async fn run_server(pool: SqlitePool, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let state = crate::server::AppState { pool: pool.clone() };
    let router = crate::server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.server.bind_addr))?;

    info!(listen = %config.server.bind_addr, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
        })
        .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();
    let _ = server_handle.await;
    pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
