//! # care-api — Binary Entry Point
//!
//! Parses the configuration, connects every backend, seeds the bootstrap
//! administrator and serves the API until SIGINT or SIGTERM.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;

use care_api::config::AppConfig;
use care_api::state::AppState;

/// In-flight requests get this long after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    init_tracing(config.is_production());
    tracing::info!(config = ?config, "starting care-api");

    let state = AppState::connect(config.clone()).await.map_err(|e| {
        tracing::error!("startup failed: {e}");
        e
    })?;

    care_api::bootstrap::bootstrap_admin(&state)
        .await
        .context("bootstrap administrator")?;

    let app = care_api::app(state.clone());
    let listener = tokio::net::TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("binding {}", config.server_addr))?;
    tracing::info!("care-api listening on {}", config.server_addr);

    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stopped_tx.send(());
    });

    let mut server = std::pin::pin!(server.into_future());
    tokio::select! {
        result = &mut server => result.context("server error")?,
        _ = async {
            let _ = stopped_rx.await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "in-flight requests did not finish in time; aborting"
            );
        }
    }

    state.close().await;
    tracing::info!("care-api stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {e}");
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
                tracing::error!("failed to listen for SIGTERM: {e}");
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
    tracing::info!("shutdown signal received");
}
