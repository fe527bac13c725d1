use std::sync::Arc;

use drive_blob::{CancellationToken, TransferAdapter};

use crate::DownloadTokens;

/// Shared handler state, built once in `main` and cloned per request
#[derive(Clone)]
pub struct TransferState {
    pub adapter: Arc<TransferAdapter>,
    pub tokens: Arc<DownloadTokens>,
    /// Fired on shutdown; every request context is a child of it
    pub shutdown: CancellationToken,
}

impl TransferState {
    pub fn new(adapter: TransferAdapter, tokens: DownloadTokens) -> Self {
        Self {
            adapter: Arc::new(adapter),
            tokens: Arc::new(tokens),
            shutdown: CancellationToken::new(),
        }
    }
}
