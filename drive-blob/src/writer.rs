use bytes::Bytes;
use std::sync::Arc;

use crate::{
    BlobStore, ChunkArrival, ChunkKeyStrategy, ChunkTarget, TransferConfig, TransferCtx,
    TransferError, TransferResult, UploadSession, UploadStatus, UploadTracker,
};

/// Persists chunk bytes and records their arrival.
///
/// The `put` always happens before bookkeeping: a failed `put` records
/// nothing, and a `put` followed by a bookkeeping failure leaves an orphaned
/// object that a retry simply overwrites.
#[derive(Clone)]
pub struct ChunkWriter {
    store: Arc<dyn BlobStore>,
    tracker: UploadTracker,
    keys: Arc<dyn ChunkKeyStrategy>,
    config: TransferConfig,
}

impl ChunkWriter {
    pub fn new(
        store: Arc<dyn BlobStore>,
        tracker: UploadTracker,
        keys: Arc<dyn ChunkKeyStrategy>,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            keys,
            config,
        }
    }

    /// Write one chunk of the file named by `target` into its current upload session.
    pub async fn write_chunk(
        &self,
        ctx: &TransferCtx,
        target: &ChunkTarget,
        index: u32,
        data: Bytes,
    ) -> TransferResult<ChunkArrival> {
        let session = self.tracker.lookup_by_file_id(&target.file_id).await?;
        self.write_into(ctx, &session, target, index, data).await
    }

    /// Write one chunk into an already resolved session.
    pub async fn write_into(
        &self,
        ctx: &TransferCtx,
        session: &UploadSession,
        target: &ChunkTarget,
        index: u32,
        data: Bytes,
    ) -> TransferResult<ChunkArrival> {
        if session.file_id != target.file_id || session.owner_id != target.owner_id {
            return Err(TransferError::permission_denied(
                "Chunk target does not belong to this upload session",
            ));
        }
        match &session.status {
            UploadStatus::Pending => {}
            // bytes are already stored; only redeliver a lost completion signal
            UploadStatus::Completed { .. } if session.received.contains(&index) => {
                return self
                    .tracker
                    .record_chunk_arrival(ctx, &session.token, index)
                    .await;
            }
            _ => return Err(TransferError::session_closed(session.token.as_str())),
        }
        self.check_chunk(session, index, data.len() as u64)?;

        let key = self.keys.chunk_key(target, index)?;
        let size = data.len();
        ctx.guard(self.store.put(key.as_str(), data)).await?;
        tracing::debug!(request_id = %ctx.request_id, key = %key, size, "chunk stored");

        self.tracker
            .record_chunk_arrival(ctx, &session.token, index)
            .await
    }

    /// Split `full` into `chunk_size` slices and write them in order.
    /// Returns the number of chunks written.
    pub async fn split_and_write(
        &self,
        ctx: &TransferCtx,
        target: &ChunkTarget,
        full: Bytes,
        chunk_size: u64,
    ) -> TransferResult<u32> {
        let chunks = split_into_chunks(&full, chunk_size)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let session = self.tracker.lookup_by_file_id(&target.file_id).await?;
        let mut written = 0u32;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let index = u32::try_from(index)
                .map_err(|_| TransferError::invalid("Too many chunks for one upload"))?;
            self.write_into(ctx, &session, target, index, chunk).await?;
            written += 1;
        }
        Ok(written)
    }

    fn check_chunk(&self, session: &UploadSession, index: u32, len: u64) -> TransferResult<()> {
        let expected = session.expected_chunk_len(index).ok_or_else(|| {
            TransferError::invalid(format!(
                "Chunk index {} out of range (0..{})",
                index, session.total_chunks
            ))
        })?;

        let ok = if self.config.require_exact_chunk_size {
            len == expected
        } else {
            len > 0 && len <= session.chunk_size
        };
        if !ok {
            return Err(TransferError::invalid(format!(
                "Chunk {} has {} bytes, expected {}",
                index, len, expected
            )));
        }
        Ok(())
    }
}

/// Partition `full` into sequential `chunk_size` slices (the last may be
/// shorter). Slices share the original buffer.
pub fn split_into_chunks(full: &Bytes, chunk_size: u64) -> TransferResult<Vec<Bytes>> {
    if chunk_size == 0 {
        return Err(TransferError::invalid("Chunk size must be positive"));
    }
    let step = usize::try_from(chunk_size).unwrap_or(usize::MAX);

    let mut chunks = Vec::with_capacity(full.len().div_ceil(step));
    let mut offset = 0;
    while offset < full.len() {
        let end = offset.saturating_add(step).min(full.len());
        chunks.push(full.slice(offset..end));
        offset = end;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BlobStore, DefaultKeyStrategy, FileId, FileMeta, FileMetaStore, FileStatus,
        MemoryBlobStore, MemoryFileMetaStore, MemoryUploadSessionStore, OwnerId, PutResult,
    };
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        blobs: MemoryBlobStore,
        metadata: Arc<MemoryFileMetaStore>,
        tracker: UploadTracker,
        writer: ChunkWriter,
        ctx: TransferCtx,
    }

    fn fixture_with(store: Arc<dyn BlobStore>, blobs: MemoryBlobStore) -> Fixture {
        let config = TransferConfig::default().with_chunk_size(4);
        let metadata = Arc::new(MemoryFileMetaStore::new());
        let tracker = UploadTracker::new(
            Arc::new(MemoryUploadSessionStore::new()),
            metadata.clone(),
            &config,
        );
        let writer = ChunkWriter::new(store, tracker.clone(), Arc::new(DefaultKeyStrategy), config);
        Fixture {
            blobs,
            metadata,
            tracker,
            writer,
            ctx: TransferCtx::new(OwnerId::new("alice")),
        }
    }

    fn fixture() -> Fixture {
        let blobs = MemoryBlobStore::new();
        fixture_with(Arc::new(blobs.clone()), blobs)
    }

    fn target() -> ChunkTarget {
        ChunkTarget::new(OwnerId::new("alice"), FileId::new("f1"))
    }

    async fn begin(fx: &Fixture, size: u64) {
        fx.metadata
            .register_file(FileMeta::new(FileId::new("f1"), OwnerId::new("alice"), "a.bin", size, 4))
            .await
            .unwrap();
        fx.tracker
            .create_session(&fx.ctx, FileId::new("f1"), size, 4)
            .await
            .unwrap();
    }

    #[test]
    fn split_covers_input_in_order() {
        let full = Bytes::from_static(b"abcdefghij");
        let chunks = split_into_chunks(&full, 4).unwrap();
        assert_eq!(chunks, vec![&b"abcd"[..], &b"efgh"[..], &b"ij"[..]]);
        assert!(split_into_chunks(&Bytes::new(), 4).unwrap().is_empty());
        assert!(split_into_chunks(&full, 0).is_err());
    }

    proptest! {
        #[test]
        fn split_then_concat_is_identity(data in proptest::collection::vec(any::<u8>(), 0..500), chunk in 1u64..64) {
            let full = Bytes::from(data.clone());
            let chunks = split_into_chunks(&full, chunk).unwrap();
            prop_assert_eq!(chunks.len() as u64, (data.len() as u64).div_ceil(chunk));
            prop_assert_eq!(chunks.concat(), data);
        }
    }

    #[tokio::test]
    async fn split_and_write_completes_the_upload() {
        let fx = fixture();
        begin(&fx, 10).await;

        let written = fx
            .writer
            .split_and_write(&fx.ctx, &target(), Bytes::from_static(b"0123456789"), 4)
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(fx.blobs.keys(), vec!["alice/f1_0", "alice/f1_1", "alice/f1_2"]);
        assert_eq!(fx.blobs.get("alice/f1_2").await.unwrap(), Bytes::from_static(b"89"));
        assert_eq!(
            fx.metadata.get_file_meta(&FileId::new("f1")).await.unwrap().status,
            FileStatus::Uploaded
        );
    }

    #[tokio::test]
    async fn wrong_length_is_rejected_before_io() {
        let fx = fixture();
        begin(&fx, 10).await;

        let result = fx
            .writer
            .write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"abc"))
            .await;
        assert!(matches!(result, Err(TransferError::Invalid { .. })));

        let result = fx
            .writer
            .write_chunk(&fx.ctx, &target(), 3, Bytes::from_static(b"ab"))
            .await;
        assert!(matches!(result, Err(TransferError::Invalid { .. })));
        assert!(fx.blobs.is_empty());
    }

    #[tokio::test]
    async fn duplicate_write_overwrites_without_resignalling() {
        let fx = fixture();
        begin(&fx, 8).await;

        let first = fx.writer.write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"aaaa")).await.unwrap();
        let again = fx.writer.write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"bbbb")).await.unwrap();

        assert_eq!(first, ChunkArrival::Recorded);
        assert_eq!(again, ChunkArrival::Duplicate);
        assert_eq!(fx.blobs.get("alice/f1_0").await.unwrap(), Bytes::from_static(b"bbbb"));
    }

    #[tokio::test]
    async fn cancelled_request_issues_no_put() {
        let fx = fixture();
        begin(&fx, 8).await;
        fx.ctx.cancel.cancel();

        let result = fx
            .writer
            .write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"aaaa"))
            .await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(fx.blobs.is_empty());
        let session = fx.tracker.lookup_by_file_id(&FileId::new("f1")).await.unwrap();
        assert_eq!(session.received_count(), 0);
    }

    struct FailingStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn put(&self, _key: &str, _data: Bytes) -> TransferResult<PutResult> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransferError::unavailable(std::io::Error::other("disk full")))
        }
        async fn get(&self, key: &str) -> TransferResult<Bytes> {
            Err(TransferError::not_found(key))
        }
        async fn delete(&self, _key: &str) -> TransferResult<()> {
            Ok(())
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn failed_put_records_nothing() {
        let store = Arc::new(FailingStore {
            attempts: AtomicUsize::new(0),
        });
        let fx = fixture_with(store.clone(), MemoryBlobStore::new());
        begin(&fx, 8).await;

        let result = fx
            .writer
            .write_chunk(&fx.ctx, &target(), 1, Bytes::from_static(b"aaaa"))
            .await;

        assert!(matches!(result, Err(TransferError::Unavailable { .. })));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        let session = fx.tracker.lookup_by_file_id(&FileId::new("f1")).await.unwrap();
        assert!(session.received.is_empty());
        assert!(session.status.is_pending());
    }

    #[tokio::test]
    async fn foreign_owner_cannot_write() {
        let fx = fixture();
        begin(&fx, 8).await;
        let mallory = ChunkTarget::new(OwnerId::new("mallory"), FileId::new("f1"));

        let result = fx
            .writer
            .write_chunk(&fx.ctx, &mallory, 0, Bytes::from_static(b"aaaa"))
            .await;
        assert!(matches!(result, Err(TransferError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn retry_after_completion_skips_the_put() {
        let store = Arc::new(CountingStore::default());
        let fx = fixture_with(store.clone(), MemoryBlobStore::new());
        begin(&fx, 4).await;

        let first = fx.writer.write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"aaaa")).await.unwrap();
        let again = fx.writer.write_chunk(&fx.ctx, &target(), 0, Bytes::from_static(b"aaaa")).await.unwrap();

        assert_eq!(first, ChunkArrival::Completed);
        assert_eq!(again, ChunkArrival::Duplicate);
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryBlobStore,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn put(&self, key: &str, data: Bytes) -> TransferResult<PutResult> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, data).await
        }
        async fn get(&self, key: &str) -> TransferResult<Bytes> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> TransferResult<()> {
            self.inner.delete(key).await
        }
        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }
}
