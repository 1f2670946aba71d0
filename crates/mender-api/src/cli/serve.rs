//! `mender serve`: recover interrupted work, then run the REST API until
//! Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;
use mender_core::workflow::recovery::recover_interrupted;
use tokio_util::sync::CancellationToken;

use crate::http::router::build_router;
use crate::monitor;
use crate::state::AppState;

const METRICS_INTERVAL: Duration = Duration::from_secs(60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn serve(
    state: &AppState,
    host: Option<String>,
    port: Option<u16>,
    json: bool,
) -> Result<()> {
    let background = CancellationToken::new();
    let collector = state
        .counters
        .spawn_collector(&state.event_bus, background.clone());
    let logger = monitor::spawn_event_logger(&state.event_bus, background.clone());
    let metrics = monitor::spawn_metrics_logger(
        Arc::clone(&state.counters),
        Arc::clone(&state.dispatcher),
        METRICS_INTERVAL,
        background.clone(),
    );

    let report = recover_interrupted(Arc::clone(&state.store), &state.dispatcher).await?;
    if report.resumed > 0 {
        tracing::info!(
            resumed = report.resumed,
            interrupted_tasks = report.interrupted_tasks,
            "resumed unfinished workflows"
        );
    }

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "listening": format!("http://{addr}"),
                "data_dir": state.data_dir.display().to_string(),
                "resumed_workflows": report.resumed,
            })
        );
    } else {
        println!();
        println!(
            "  {} Mender API listening on {}",
            style("⚡").bold(),
            style(format!("http://{addr}")).cyan()
        );
        if report.resumed > 0 {
            println!(
                "  {} Resumed {} unfinished workflow(s)",
                style("↻").yellow(),
                report.resumed
            );
        }
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        active_workflows = state.dispatcher.active_count(),
        "draining workflow dispatcher"
    );
    if tokio::time::timeout(DRAIN_TIMEOUT, state.dispatcher.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "workflows still running at shutdown; they resume on next start"
        );
    }

    background.cancel();
    let _ = tokio::join!(collector, logger, metrics);

    if !json {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
