mod audit;
mod bootstrap;
mod health;
mod webhooks;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use propbot_core::config::{AppConfig, LoadOptions};
use tokio::sync::Notify;

fn init_logging(config: &AppConfig) {
    use propbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let channels = app.runtime.transports().channels();
    let webhook_state = webhooks::WebhookState::new(
        app.runtime.clone(),
        app.notifier.clone(),
        app.config.server.internal_token.clone(),
    );
    let in_flight = webhook_state.in_flight();
    let router = Router::new()
        .merge(webhooks::router(webhook_state))
        .merge(health::router(app.db_pool.clone(), channels.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        channels = ?channels,
        internal_notify = app.config.server.internal_token.is_some(),
        "propbot-server listening"
    );

    let stop = Arc::new(Notify::new());
    let signal = stop.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            signal.notify_one();
        })
        .into_future();

    // Acknowledged messages get a bounded window to finish once the signal arrives.
    let drained = async {
        server.await?;
        in_flight.wait_idle().await;
        Ok::<(), std::io::Error>(())
    };
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drain_deadline = async {
        stop.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = drained => result?,
        () = drain_deadline => tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            in_flight = in_flight.active(),
            "in-flight messages did not finish before the shutdown deadline"
        ),
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "propbot-server stopping"
    );
    app.db_pool.close().await;

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
        std::future::pending::<()>().await;
    }
}
