//! # drive-blob: chunked transfer engine
//!
//! `drive-blob` moves file bytes in and out of a key/value blob store as
//! fixed-size chunks:
//!
//! - **Blob stores**: local filesystem, S3-compatible object storage, or memory
//! - **Chunk keys**: the durable `{owner}/{file}_{index}` layout shared by
//!   the upload and download paths
//! - **Upload sessions**: per-upload arrival tracking with exactly-once
//!   completion signalling
//! - **Range downloads**: byte ranges resolved to chunk spans, fetched in
//!   order and trimmed at the edges
//!
//! ## Quick Start
//!
//! ```rust
//! use drive_blob::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> TransferResult<()> {
//! let adapter = TransferAdapter::new(
//!     Arc::new(MemoryBlobStore::new()),
//!     Arc::new(MemoryUploadSessionStore::new()),
//!     Arc::new(MemoryFileMetaStore::new()),
//!     Arc::new(DefaultKeyStrategy),
//!     TransferConfig::default().with_chunk_size(4),
//! );
//! let ctx = TransferCtx::new(OwnerId::new("user-123"));
//!
//! let plan = adapter.begin_upload(&ctx, UploadRequest::new("hello.txt", 6)).await?;
//! adapter.upload_chunk(&ctx, &plan.session_token, 1, bytes::Bytes::from_static(b"o!")).await?;
//! adapter.upload_chunk(&ctx, &plan.session_token, 0, bytes::Bytes::from_static(b"hell")).await?;
//!
//! let range = ByteRange::parse_header("bytes=1-3");
//! let (_meta, download) = adapter.download(&ctx, &plan.file_id, range).await?;
//! assert_eq!(download.status(), 206);
//!
//! let mut out = Vec::new();
//! download.write_to(&mut out).await?;
//! assert_eq!(out, b"ell");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │         TransferAdapter         │  ← entry point, owner checks
//! ├────────────────┬────────────────┤
//! │  ChunkWriter   │DownloadStreamer│
//! ├────────────────┼────────────────┤
//! │ UploadTracker  │ ResolvedRange  │
//! ├────────────────┴────────────────┤
//! │   ChunkKeyStrategy + BlobStore  │  ← storage primitives
//! └─────────────────────────────────┘
//! ```

pub mod adapter;
mod config;
mod download;
mod error;
mod fs_store;
pub mod keys;
mod memory_store;
pub mod metadata;
pub mod range;
mod s3_store;
mod session_store;
pub mod store;
mod types;
mod upload;
mod writer;

// Re-export main types for clean API
pub use adapter::{ChunkProgress, TransferAdapter, UploadPlan, UploadRequest};
pub use config::{StorageBackend, TransferConfig};
pub use download::{Download, DownloadStreamer};
pub use error::{TransferError, TransferResult};
pub use fs_store::FsBlobStore;
pub use keys::{ChunkKey, ChunkKeyStrategy, ChunkTarget, DefaultKeyStrategy};
pub use memory_store::MemoryBlobStore;
pub use metadata::{
    DriveEntry, FileMeta, FileMetaStore, FileStatus, FileSummary, FolderSummary,
    MemoryFileMetaStore,
};
pub use range::{ByteRange, FileByteLayout, ResolvedRange};
pub use s3_store::{S3CompatibleStore, S3Config};
pub use session_store::MemoryUploadSessionStore;
pub use store::{connect, BlobStore, PutResult};
pub use tokio_util::sync::CancellationToken;
pub use types::{ByteStream, FileId, OwnerId, SessionToken, TransferCtx};
pub use upload::{
    ChunkArrival, ChunkRecord, CompletionSignal, UploadSession, UploadSessionStore, UploadStatus,
    UploadTracker,
};
pub use writer::{split_into_chunks, ChunkWriter};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobStore, ByteRange, DefaultKeyStrategy, FileId, MemoryBlobStore, MemoryFileMetaStore,
        MemoryUploadSessionStore, OwnerId, SessionToken, TransferAdapter, TransferConfig,
        TransferCtx, TransferError, TransferResult, UploadRequest,
    };
}
