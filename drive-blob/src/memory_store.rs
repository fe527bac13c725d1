use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

use crate::{BlobStore, PutResult, TransferError, TransferResult};

/// In-process blob store for development and tests
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Sorted snapshot of stored keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> TransferResult<PutResult> {
        let size = data.len() as u64;
        self.objects.insert(key.to_string(), data);
        Ok(PutResult::sized(size))
    }

    async fn get(&self, key: &str) -> TransferResult<Bytes> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransferError::not_found(key))
    }

    async fn delete(&self, key: &str) -> TransferResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_and_get_returns_latest() {
        let store = MemoryBlobStore::new();
        store.put("u/f_0", Bytes::from_static(b"old")).await.unwrap();
        store.put("u/f_0", Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(store.get("u/f_0").await.unwrap(), Bytes::from_static(b"new"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(TransferError::NotFound { .. })
        ));
        store.delete("nope").await.unwrap();
    }
}
