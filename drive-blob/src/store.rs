use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    FsBlobStore, MemoryBlobStore, S3CompatibleStore, StorageBackend, TransferResult,
};

/// Core blob storage operations - must be implemented by all storage backends.
///
/// Every call transfers one complete object, so readers observe either the
/// previous object or the new one, never a partial write. Concurrent `put`s
/// to the same key resolve as last-writer-wins.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object, replacing whatever lives at `key`
    async fn put(&self, key: &str, data: Bytes) -> TransferResult<PutResult>;

    /// Fetch a whole object. Missing keys fail with `NotFound`.
    async fn get(&self, key: &str) -> TransferResult<Bytes>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> TransferResult<()>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: Option<String>,
    pub size_bytes: u64,
}

impl PutResult {
    pub fn sized(size_bytes: u64) -> Self {
        Self {
            etag: None,
            size_bytes,
        }
    }
}

/// Build the store selected by deployment configuration.
pub async fn connect(backend: &StorageBackend) -> TransferResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match backend {
        StorageBackend::Local { root } => Arc::new(FsBlobStore::open(root.clone()).await?),
        StorageBackend::S3(config) => Arc::new(S3CompatibleStore::new(config.clone()).await?),
        StorageBackend::Memory => Arc::new(MemoryBlobStore::new()),
    };

    tracing::info!(backend = store.backend_name(), "blob store ready");
    Ok(store)
}
