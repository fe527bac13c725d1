use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    BlobStore, ByteRange, ByteStream, ChunkKeyStrategy, ChunkTarget, FileByteLayout,
    ResolvedRange, TransferConfig, TransferCtx, TransferError, TransferResult,
};

/// Reassembles a byte range of a chunked file from the blob store.
#[derive(Clone)]
pub struct DownloadStreamer {
    store: Arc<dyn BlobStore>,
    keys: Arc<dyn ChunkKeyStrategy>,
    prefetch: usize,
}

/// A resolved download: response metadata plus a lazy body
pub struct Download {
    range: ResolvedRange,
    body: ByteStream,
}

impl DownloadStreamer {
    pub fn new(store: Arc<dyn BlobStore>, keys: Arc<dyn ChunkKeyStrategy>, config: &TransferConfig) -> Self {
        Self {
            store,
            keys,
            prefetch: config.download_prefetch.max(1),
        }
    }

    /// Resolve `range` against `layout` and prepare the body stream.
    ///
    /// Range errors surface here, before any byte is fetched. Chunks are
    /// fetched lazily as the body is polled, in ascending index order.
    pub fn stream(
        &self,
        ctx: &TransferCtx,
        target: &ChunkTarget,
        range: Option<ByteRange>,
        layout: FileByteLayout,
    ) -> TransferResult<Download> {
        let resolved = ResolvedRange::resolve(range, layout)?;
        let keys = resolved
            .chunk_indices()
            .map(|index| Ok((index, self.keys.chunk_key(target, index)?)))
            .collect::<TransferResult<Vec<_>>>()?;

        let store = self.store.clone();
        let fetch_ctx = ctx.clone();
        let fetches = stream::iter(keys)
            .map(move |(index, key)| {
                let store = store.clone();
                let ctx = fetch_ctx.clone();
                async move {
                    let data = ctx.guard(store.get(key.as_str())).await?;
                    Ok::<_, TransferError>((index, key, data))
                }
            })
            .buffered(self.prefetch);

        let expected = resolved.content_length();
        let trimmer = resolved.clone();
        let request_id = ctx.request_id.clone();
        let file_id = target.file_id.clone();

        let body = async_stream::stream! {
            let mut fetches = Box::pin(fetches);
            let mut written = 0u64;

            while let Some(fetched) = fetches.next().await {
                let (index, key, data) = match fetched {
                    Ok(fetched) => fetched,
                    Err(err) => {
                        tracing::error!(
                            request_id = %request_id,
                            file_id = %file_id,
                            written,
                            expected,
                            error = %err,
                            "incomplete download stream: chunk fetch failed"
                        );
                        yield Err(std::io::Error::from(err));
                        return;
                    }
                };

                let piece = trimmer.trim(index, data);
                if written + piece.len() as u64 > expected {
                    tracing::error!(request_id = %request_id, key = %key, written, expected, "stored chunk longer than layout");
                    yield Err(std::io::Error::from(TransferError::IncompleteStream { expected, written }));
                    return;
                }
                written += piece.len() as u64;
                if !piece.is_empty() {
                    yield Ok(piece);
                }
            }

            if written != expected {
                tracing::error!(request_id = %request_id, file_id = %file_id, written, expected, "incomplete download stream");
                yield Err(std::io::Error::from(TransferError::IncompleteStream { expected, written }));
            }
        };

        Ok(Download {
            range: resolved,
            body: Box::pin(body),
        })
    }
}

impl Download {
    /// 206 when a range was requested, 200 otherwise
    pub fn status(&self) -> u16 {
        if self.range.partial {
            206
        } else {
            200
        }
    }

    pub fn is_partial(&self) -> bool {
        self.range.partial
    }

    pub fn content_length(&self) -> u64 {
        self.range.content_length()
    }

    /// `Content-Range` header value for partial responses
    pub fn content_range(&self) -> Option<String> {
        self.range.partial.then(|| self.range.content_range())
    }

    pub fn range(&self) -> &ResolvedRange {
        &self.range
    }

    pub fn into_body(self) -> ByteStream {
        self.body
    }

    /// Drive the body into `sink`, returning the number of bytes written.
    pub async fn write_to<W>(self, sink: &mut W) -> TransferResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut body = self.body;
        let mut written = 0u64;
        while let Some(piece) = body.next().await {
            let piece: Bytes = piece.map_err(|err| match err.into_inner() {
                Some(inner) => match inner.downcast::<TransferError>() {
                    Ok(transfer) => *transfer,
                    Err(other) => TransferError::Unavailable { source: other },
                },
                None => TransferError::IncompleteStream {
                    expected: self.range.content_length(),
                    written,
                },
            })?;
            sink.write_all(&piece).await?;
            written += piece.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download").field("range", &self.range).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DefaultKeyStrategy, FileId, MemoryBlobStore, OwnerId};

    fn target() -> ChunkTarget {
        ChunkTarget::new(OwnerId::new("alice"), FileId::new("f1"))
    }

    /// Store `data` as `chunk`-sized objects under the default layout.
    async fn seeded(data: &[u8], chunk: usize) -> MemoryBlobStore {
        let store = MemoryBlobStore::new();
        for (index, piece) in data.chunks(chunk).enumerate() {
            store
                .put(&format!("alice/f1_{}", index), Bytes::copy_from_slice(piece))
                .await
                .unwrap();
        }
        store
    }

    fn streamer(store: &MemoryBlobStore, prefetch: usize) -> DownloadStreamer {
        DownloadStreamer::new(
            Arc::new(store.clone()),
            Arc::new(DefaultKeyStrategy),
            &TransferConfig::default().with_download_prefetch(prefetch),
        )
    }

    fn ctx() -> TransferCtx {
        TransferCtx::new(OwnerId::new("alice"))
    }

    async fn collect(download: Download) -> Result<Vec<u8>, std::io::Error> {
        let mut body = download.into_body();
        let mut out = Vec::new();
        while let Some(piece) = body.next().await {
            out.extend_from_slice(&piece?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn full_download_is_200_with_every_byte() {
        let data: Vec<u8> = (0..100u8).collect();
        let store = seeded(&data, 30).await;
        let layout = FileByteLayout::new(100, 30).unwrap();

        let download = streamer(&store, 1).stream(&ctx(), &target(), None, layout).unwrap();
        assert_eq!(download.status(), 200);
        assert_eq!(download.content_length(), 100);
        assert_eq!(download.content_range(), None);
        assert_eq!(collect(download).await.unwrap(), data);
    }

    #[tokio::test]
    async fn partial_download_spans_chunk_boundary() {
        let data: Vec<u8> = (0..100u8).collect();
        let store = seeded(&data, 30).await;
        let layout = FileByteLayout::new(100, 30).unwrap();

        let range = ByteRange::parse_header("bytes=25-64");
        let download = streamer(&store, 3).stream(&ctx(), &target(), range, layout).unwrap();

        assert_eq!(download.status(), 206);
        assert_eq!(download.content_range().as_deref(), Some("bytes 25-64/100"));
        assert_eq!(collect(download).await.unwrap(), data[25..=64].to_vec());
    }

    #[tokio::test]
    async fn out_of_bounds_range_fails_before_fetching() {
        let store = MemoryBlobStore::new();
        let layout = FileByteLayout::new(100, 30).unwrap();
        let result = streamer(&store, 1).stream(&ctx(), &target(), Some(ByteRange::from_start(100)), layout);
        assert!(matches!(result, Err(TransferError::RangeNotSatisfiable { size: 100 })));
    }

    #[tokio::test]
    async fn missing_chunk_aborts_stream_with_error() {
        let data: Vec<u8> = (0..100u8).collect();
        let store = seeded(&data, 30).await;
        store.delete("alice/f1_2").await.unwrap();
        let layout = FileByteLayout::new(100, 30).unwrap();

        let download = streamer(&store, 2).stream(&ctx(), &target(), None, layout).unwrap();
        let mut sink = Vec::new();
        let result = download.write_to(&mut sink).await;

        assert!(matches!(result, Err(TransferError::NotFound { .. })));
        assert_eq!(sink, data[..60].to_vec());
    }

    #[tokio::test]
    async fn short_stored_chunk_is_reported_incomplete() {
        let store = MemoryBlobStore::new();
        store.put("alice/f1_0", Bytes::from_static(b"abcd")).await.unwrap();
        store.put("alice/f1_1", Bytes::from_static(b"e")).await.unwrap();
        let layout = FileByteLayout::new(6, 4).unwrap();

        let download = streamer(&store, 1).stream(&ctx(), &target(), None, layout).unwrap();
        let result = download.write_to(&mut Vec::new()).await;
        assert!(matches!(
            result,
            Err(TransferError::IncompleteStream { expected: 6, written: 5 })
        ));
    }

    #[tokio::test]
    async fn prefetch_preserves_chunk_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let store = seeded(&data, 7).await;
        let layout = FileByteLayout::new(1000, 7).unwrap();

        let download = streamer(&store, 8)
            .stream(&ctx(), &target(), Some(ByteRange::new(3, Some(996))), layout)
            .unwrap();
        let mut sink = Vec::new();
        let written = download.write_to(&mut sink).await.unwrap();

        assert_eq!(written, 994);
        assert_eq!(sink, data[3..=996].to_vec());
    }

    #[tokio::test]
    async fn cancelled_download_stops_fetching() {
        let data: Vec<u8> = (0..100u8).collect();
        let store = seeded(&data, 30).await;
        let layout = FileByteLayout::new(100, 30).unwrap();
        let ctx = ctx();
        ctx.cancel.cancel();

        let download = streamer(&store, 1).stream(&ctx, &target(), None, layout).unwrap();
        let result = download.write_to(&mut Vec::new()).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_file_streams_nothing() {
        let store = MemoryBlobStore::new();
        let layout = FileByteLayout::new(0, 30).unwrap();
        let download = streamer(&store, 1).stream(&ctx(), &target(), None, layout).unwrap();
        assert_eq!(download.status(), 200);
        assert_eq!(download.content_length(), 0);
        assert!(collect(download).await.unwrap().is_empty());
    }
}
