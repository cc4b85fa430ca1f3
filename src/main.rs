use std::sync::Arc;

use cargopulse::api;
use cargopulse::config::{Config, LogFormat};
use cargopulse::error::AppError;
use cargopulse::messaging::twilio::TwilioWhatsApp;
use cargopulse::messaging::NotificationProvider;
use cargopulse::state::AppState;
use cargopulse::store::blob::FsBlobStore;
use cargopulse::store::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let provider: Option<Arc<dyn NotificationProvider>> = match config.twilio.clone() {
        Some(settings) => Some(Arc::new(TwilioWhatsApp::new(settings))),
        None => {
            tracing::warn!("twilio not configured, notifications will only be logged");
            None
        }
    };

    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(FsBlobStore::new(
        config.blob_root.clone(),
        &config.blob_public_base_url,
    ));
    let state = Arc::new(AppState::new(&config, store, blobs, provider));
    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
