use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::keys::extension_of;
use crate::{
    BlobStore, ByteRange, ChunkArrival, ChunkKeyStrategy, ChunkTarget, ChunkWriter, Download,
    DownloadStreamer, DriveEntry, FileByteLayout, FileId, FileMeta, FileMetaStore, FileStatus, FolderSummary,
    SessionToken, TransferConfig, TransferCtx, TransferError, TransferResult, UploadSession,
    UploadSessionStore, UploadTracker,
};

/// Parameters for starting a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub file_name: String,
    pub total_size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl UploadRequest {
    pub fn new<S: Into<String>>(file_name: S, total_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
            content_type: None,
            folder_id: None,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_folder<S: Into<String>>(mut self, folder_id: S) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }
}

/// What a client needs to start sending chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPlan {
    pub session_token: SessionToken,
    pub file_id: FileId,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Progress after one chunk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub status: ChunkArrival,
    pub received: u32,
    pub total_chunks: u32,
}

/// Entry point to the transfer engine.
///
/// Built once at startup from explicit dependencies and shared by reference.
#[derive(Clone)]
pub struct TransferAdapter {
    store: Arc<dyn BlobStore>,
    metadata: Arc<dyn FileMetaStore>,
    keys: Arc<dyn ChunkKeyStrategy>,
    tracker: UploadTracker,
    writer: ChunkWriter,
    streamer: DownloadStreamer,
    config: TransferConfig,
}

impl TransferAdapter {
    pub fn new(
        store: Arc<dyn BlobStore>,
        sessions: Arc<dyn UploadSessionStore>,
        metadata: Arc<dyn FileMetaStore>,
        keys: Arc<dyn ChunkKeyStrategy>,
        config: TransferConfig,
    ) -> Self {
        let tracker = UploadTracker::new(sessions, metadata.clone(), &config);
        let writer = ChunkWriter::new(store.clone(), tracker.clone(), keys.clone(), config.clone());
        let streamer = DownloadStreamer::new(store.clone(), keys.clone(), &config);
        Self {
            store,
            metadata,
            keys,
            tracker,
            writer,
            streamer,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<dyn FileMetaStore> {
        &self.metadata
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Register a pending file and open an upload session for it
    pub async fn begin_upload(&self, ctx: &TransferCtx, request: UploadRequest) -> TransferResult<UploadPlan> {
        ctx.ensure_active()?;
        self.check_size(request.total_size)?;
        if request.total_size == 0 {
            return Err(TransferError::invalid(
                "Chunked uploads need a positive size; send empty files whole",
            ));
        }

        let meta = self
            .register(ctx, &request.file_name, request.total_size, request.content_type, request.folder_id, None)
            .await?;
        let token = match self
            .tracker
            .create_session(ctx, meta.file_id.clone(), meta.size_bytes, meta.chunk_size)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                if let Err(mark_err) = self.metadata.set_file_status(&meta.file_id, FileStatus::Failed).await {
                    tracing::warn!(request_id = %ctx.request_id, file_id = %meta.file_id, error = %mark_err, "could not fail file record");
                }
                return Err(err);
            }
        };

        Ok(UploadPlan {
            session_token: token,
            total_chunks: meta.total_chunks() as u32,
            file_id: meta.file_id,
            chunk_size: meta.chunk_size,
        })
    }

    /// Accept one pre-chunked piece of an upload
    pub async fn upload_chunk(
        &self,
        ctx: &TransferCtx,
        token: &SessionToken,
        index: u32,
        data: Bytes,
    ) -> TransferResult<ChunkProgress> {
        let session = self.session(ctx, token).await?;
        let meta = self.metadata.get_file_meta(&session.file_id).await?;

        let arrival = self
            .writer
            .write_into(ctx, &session, &target_of(&meta), index, data)
            .await?;
        let session = self.tracker.lookup_by_token(token).await?;

        Ok(ChunkProgress {
            status: arrival,
            received: session.received_count(),
            total_chunks: session.total_chunks,
        })
    }

    /// Store a whole file in one call, splitting it server-side
    pub async fn upload_whole(
        &self,
        ctx: &TransferCtx,
        file_name: &str,
        content_type: Option<String>,
        folder_id: Option<String>,
        data: Bytes,
    ) -> TransferResult<FileMeta> {
        let size = data.len() as u64;
        self.check_size(size)?;
        let extension = extension_of(file_name);
        let meta = self
            .register(ctx, file_name, size, content_type, folder_id, extension)
            .await?;

        if size == 0 {
            self.metadata.set_file_status(&meta.file_id, FileStatus::Uploaded).await?;
            return self.metadata.get_file_meta(&meta.file_id).await;
        }

        let token = self
            .tracker
            .create_session(ctx, meta.file_id.clone(), size, meta.chunk_size)
            .await?;
        if let Err(err) = self
            .writer
            .split_and_write(ctx, &target_of(&meta), data, meta.chunk_size)
            .await
        {
            if let Err(mark_err) = self.tracker.mark_failed(ctx, &token, err.to_string()).await {
                tracing::warn!(request_id = %ctx.request_id, %token, error = %mark_err, "could not fail upload session");
            }
            return Err(err);
        }

        self.metadata.get_file_meta(&meta.file_id).await
    }

    /// Fail an upload and delete whatever chunks it received
    pub async fn abort_upload(&self, ctx: &TransferCtx, token: &SessionToken) -> TransferResult<UploadSession> {
        self.session(ctx, token).await?;
        let session = self.tracker.mark_failed(ctx, token, "aborted by client").await?;
        let meta = self.metadata.get_file_meta(&session.file_id).await?;
        let target = target_of(&meta);

        for index in &session.received {
            let key = match self.keys.chunk_key(&target, *index) {
                Ok(key) => key,
                Err(err) => {
                    tracing::warn!(%token, index, error = %err, "skipping cleanup of unaddressable chunk");
                    continue;
                }
            };
            if let Err(err) = self.store.delete(key.as_str()).await {
                tracing::warn!(%token, key = %key, error = %err, "chunk cleanup failed");
            }
        }
        Ok(session)
    }

    /// Session projection by token, owner-checked
    pub async fn session(&self, ctx: &TransferCtx, token: &SessionToken) -> TransferResult<UploadSession> {
        let session = self.tracker.lookup_by_token(token).await?;
        if session.owner_id != ctx.owner_id {
            return Err(TransferError::permission_denied("Upload session belongs to another user"));
        }
        Ok(session)
    }

    /// Session projection by file id, owner-checked
    pub async fn session_for_file(&self, ctx: &TransferCtx, file_id: &FileId) -> TransferResult<UploadSession> {
        let session = self.tracker.lookup_by_file_id(file_id).await?;
        if session.owner_id != ctx.owner_id {
            return Err(TransferError::permission_denied("Upload session belongs to another user"));
        }
        Ok(session)
    }

    pub async fn file_meta(&self, ctx: &TransferCtx, file_id: &FileId) -> TransferResult<FileMeta> {
        let meta = self.metadata.get_file_meta(file_id).await?;
        if meta.owner_id != ctx.owner_id {
            return Err(TransferError::permission_denied("File belongs to another user"));
        }
        Ok(meta)
    }

    /// Prepare a (possibly partial) download of an uploaded file.
    ///
    /// The byte layout is derived from the metadata record on every call.
    pub async fn download(
        &self,
        ctx: &TransferCtx,
        file_id: &FileId,
        range: Option<ByteRange>,
    ) -> TransferResult<(FileMeta, Download)> {
        ctx.ensure_active()?;
        let meta = self.file_meta(ctx, file_id).await?;
        if meta.status != FileStatus::Uploaded {
            return Err(TransferError::NotReady {
                file_id: file_id.to_string(),
            });
        }

        let layout = FileByteLayout::new(meta.size_bytes, meta.chunk_size)?;
        let download = self.streamer.stream(ctx, &target_of(&meta), range, layout)?;
        tracing::debug!(
            request_id = %ctx.request_id,
            file_id = %file_id,
            status = download.status(),
            length = download.content_length(),
            "download prepared"
        );
        Ok((meta, download))
    }

    pub async fn list_entries(&self, ctx: &TransferCtx, folder_id: Option<&str>) -> TransferResult<Vec<DriveEntry>> {
        self.metadata.list_entries(&ctx.owner_id, folder_id).await
    }

    /// Create a folder for the caller, optionally inside one of their folders
    pub async fn create_folder(
        &self,
        ctx: &TransferCtx,
        name: &str,
        parent_id: Option<String>,
    ) -> TransferResult<FolderSummary> {
        let folder = FolderSummary {
            folder_id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            parent_id,
        };
        let folder = self.metadata.register_folder(&ctx.owner_id, folder).await?;
        tracing::debug!(request_id = %ctx.request_id, folder_id = %folder.folder_id, "folder created");
        Ok(folder)
    }

    /// Forget finished sessions older than `max_age_secs`
    pub async fn purge_sessions(&self, max_age_secs: i64) -> TransferResult<usize> {
        self.tracker.purge_terminal(max_age_secs).await
    }

    fn check_size(&self, size: u64) -> TransferResult<()> {
        if size > self.config.max_file_bytes {
            return Err(TransferError::invalid(format!(
                "File size {} exceeds maximum {}",
                size, self.config.max_file_bytes
            )));
        }
        Ok(())
    }

    async fn register(
        &self,
        ctx: &TransferCtx,
        file_name: &str,
        size: u64,
        content_type: Option<String>,
        folder_id: Option<String>,
        extension: Option<String>,
    ) -> TransferResult<FileMeta> {
        if file_name.trim().is_empty() {
            return Err(TransferError::invalid("File name must not be empty"));
        }
        let mut meta = FileMeta::new(
            FileId::generate(),
            ctx.owner_id.clone(),
            file_name,
            size,
            self.config.chunk_size,
        )
        .with_extension(extension)
        .with_folder(folder_id);
        if let Some(content_type) = content_type {
            meta = meta.with_content_type(content_type);
        }
        self.metadata.register_file(meta).await
    }
}

fn target_of(meta: &FileMeta) -> ChunkTarget {
    ChunkTarget::new(meta.owner_id.clone(), meta.file_id.clone()).with_extension(meta.extension.clone())
}
