//! drive-server: wires the transfer engine to HTTP.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use drive_axum::{DownloadTokens, DriveApp, TransferState};
use drive_blob::{
    connect, DefaultKeyStrategy, MemoryFileMetaStore, MemoryUploadSessionStore, TransferAdapter,
};

pub use config::ServerConfig;

/// Build the application from configuration. Every dependency is created
/// here and handed down explicitly.
pub async fn build(config: &ServerConfig) -> anyhow::Result<DriveApp> {
    let store = connect(&config.storage).await?;

    let adapter = TransferAdapter::new(
        store,
        Arc::new(MemoryUploadSessionStore::new()),
        Arc::new(MemoryFileMetaStore::new()),
        Arc::new(DefaultKeyStrategy),
        config.transfer.clone(),
    );
    let tokens = DownloadTokens::new(config.token_secret.as_bytes(), config.token_ttl);

    tracing::info!(
        backend = config.storage.name(),
        chunk_size = config.transfer.chunk_size,
        "transfer engine ready"
    );
    Ok(drive_axum::drive(TransferState::new(adapter, tokens)))
}

/// Periodically forget finished upload sessions
pub fn spawn_session_sweeper(adapter: Arc<TransferAdapter>, retention: Duration) -> tokio::task::JoinHandle<()> {
    let period = (retention / 4).max(Duration::from_secs(60));
    let max_age = max_age_secs(retention);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(err) = adapter.purge_sessions(max_age).await {
                tracing::warn!(error = %err, "session sweep failed");
            }
        }
    })
}

/// Retention as signed seconds, saturating for absurdly long durations
fn max_age_secs(retention: Duration) -> i64 {
    i64::try_from(retention.as_secs()).unwrap_or(i64::MAX)
}
