use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Consts
mod consts;
pub use consts::*;

// Errors
pub use api::errors::{ApiError, ApiResult};

// Metrics
mod metrics;

// API
mod api;

// Broadcast hub
mod hub;
use hub::Hub;

// State
mod state;
use state::{AppState, Config, HubSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let logger_env = std::env::var(LOGGER_ENV).unwrap_or_else(|_| "info".into());
    let logs_folder = std::env::var(LOGS_ENV).unwrap_or_else(|_| "logs".into());
    let file_appender = tracing_appender::rolling::daily(&logs_folder, "formhub.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::new(logger_env))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .pretty(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    std::panic::set_hook(Box::new(tracing_panic::panic_hook));

    info!("The Form Hub v{} ({})", FORMHUB_VERSION, GIT_HASH);

    // Config
    let config_file: PathBuf = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "Config.toml".into()).into();
    let config = Config::parse(&config_file).context("can't load configuration")?;
    let listen = config.listen.clone();
    let metrics_enabled = config.metrics;
    if config.token.is_none() {
        tracing::warn!("Publisher token is not defined, the HTTP publish bridge is disabled");
    }

    // Hub
    let (hub, _dispatcher) = Hub::spawn(HubSettings::from(&config.hub));

    // State
    let state = AppState::new(hub, config);

    let app = api::app(state, metrics_enabled);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("can't bind {listen}"))?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Serve stopped. Closing...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(kind) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {kind}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => { signal.recv().await; },
            Err(kind) => {
                tracing::error!("failed to install signal handler: {kind}");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Terminate signal received");
}
