//! courier - headless runner for the mail client core

use std::sync::Arc;

use anyhow::{Context, Result};
use courier::config::Settings;
use courier::providers::email::NetworkConnector;
use courier::services::LogSink;
use courier::App;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting courier");

    let path = Settings::default_path().context("locating settings")?;
    let settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match settings.accounts.active() {
        Some(account) => tracing::info!(account = %account.address, "active account"),
        None => tracing::warn!(path = %path.display(), "no active account configured"),
    }

    let mut app =
        App::new(Arc::new(NetworkConnector), settings, Box::new(LogSink)).persist_to(path);
    app.start();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        on_signal.cancel();
    });

    app.run_until(cancel).await;
    app.shutdown().await;
    tracing::info!("Stopped courier");
    Ok(())
}
