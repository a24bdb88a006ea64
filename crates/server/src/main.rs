mod approvals;
mod bootstrap;
mod clients;
mod context;
mod error;
mod health;
mod processing;
mod state;
#[cfg(test)]
mod testing;

use std::time::Duration;

use anyhow::Result;
use signoff_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use signoff_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        transport_mode = app.config.transport.mode.as_str(),
        "signoff-server listening"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let router = app.router();
    let server = async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                wait_for_shutdown().await;
                let _ = stop_tx.send(true);
            })
            .await
    };
    let deadline = async move {
        if stop_rx.changed().await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        served = server => served?,
        _ = deadline => tracing::warn!(
            event_name = "system.server.shutdown_deadline",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the shutdown deadline"
        ),
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "signoff-server stopping"
    );

    // Queued messages live in memory only; anything still undelivered is recovered by resend.
    let bootstrap::Application { consumers, db_pool, .. } = app;
    for consumer in consumers {
        consumer.abort();
    }
    db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
