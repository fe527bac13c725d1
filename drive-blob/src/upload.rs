use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::types::now_secs;
use crate::{
    FileId, FileMetaStore, FileStatus, OwnerId, SessionToken, TransferConfig, TransferCtx,
    TransferError, TransferResult,
};

/// Upload session status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Completed {
        #[serde(rename = "completedAt")]
        completed_at: i64,
    },
    Failed {
        #[serde(rename = "failedAt")]
        failed_at: i64,
        reason: String,
    },
}

impl UploadStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What happened when a chunk arrival was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkArrival {
    /// Index was already received; nothing changed
    Duplicate,
    /// Index recorded, more chunks outstanding
    Recorded,
    /// This arrival moved the session from pending to completed
    Completed,
}

/// Delivery state of the "file uploaded" signal for a completed session.
///
/// A claim (`Sending`) is taken under the session guard; it either settles
/// to `Sent` or is released back to `Unsent` so a later arrival retries it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionSignal {
    #[default]
    Unsent,
    Sending,
    Sent,
}

/// Result of recording one arrival inside the session store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub arrival: ChunkArrival,
    /// Set when this caller now owns delivery of the completion signal
    pub signal_for: Option<FileId>,
}

/// Per-upload progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub token: SessionToken,
    pub file_id: FileId,
    pub owner_id: OwnerId,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
    pub status: UploadStatus,
    #[serde(default)]
    pub completion_signal: CompletionSignal,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadSession {
    pub fn new(
        token: SessionToken,
        file_id: FileId,
        owner_id: OwnerId,
        total_size: u64,
        chunk_size: u64,
    ) -> TransferResult<Self> {
        if total_size == 0 {
            return Err(TransferError::invalid("Total size must be positive"));
        }
        if chunk_size == 0 {
            return Err(TransferError::invalid("Chunk size must be positive"));
        }
        let total_chunks = u32::try_from(total_size.div_ceil(chunk_size))
            .map_err(|_| TransferError::invalid("Too many chunks for one upload"))?;

        let now = now_secs();
        Ok(Self {
            token,
            file_id,
            owner_id,
            total_size,
            chunk_size,
            total_chunks,
            received: BTreeSet::new(),
            status: UploadStatus::Pending,
            completion_signal: CompletionSignal::Unsent,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !self.received.contains(index))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, UploadStatus::Completed { .. })
    }

    /// Terminal with nothing left to deliver: failed, or completed with the
    /// completion signal sent
    pub fn is_settled(&self) -> bool {
        match self.status {
            UploadStatus::Pending => false,
            UploadStatus::Completed { .. } => self.completion_signal == CompletionSignal::Sent,
            UploadStatus::Failed { .. } => true,
        }
    }

    /// Expected byte length of chunk `index`
    pub fn expected_chunk_len(&self, index: u32) -> Option<u64> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        Some((self.total_size - start).min(self.chunk_size))
    }

    /// Add `index` to the received set and detect completion.
    ///
    /// Must run inside the store's per-session critical section.
    pub fn record(&mut self, index: u32, now: i64) -> TransferResult<ChunkArrival> {
        if index >= self.total_chunks {
            return Err(TransferError::invalid(format!(
                "Chunk index {} out of range (0..{})",
                index, self.total_chunks
            )));
        }
        match self.status {
            UploadStatus::Pending => {}
            // late retries of a finished upload are harmless
            UploadStatus::Completed { .. } if self.received.contains(&index) => {
                return Ok(ChunkArrival::Duplicate)
            }
            _ => return Err(TransferError::session_closed(self.token.as_str())),
        }

        if !self.received.insert(index) {
            return Ok(ChunkArrival::Duplicate);
        }
        self.updated_at = now;

        if self.received.len() as u32 == self.total_chunks {
            self.status = UploadStatus::Completed { completed_at: now };
            return Ok(ChunkArrival::Completed);
        }
        Ok(ChunkArrival::Recorded)
    }

    /// Take the right to deliver the completion signal, if it is owed and
    /// nobody else holds it.
    pub fn claim_signal(&mut self) -> bool {
        if self.is_complete() && self.completion_signal == CompletionSignal::Unsent {
            self.completion_signal = CompletionSignal::Sending;
            return true;
        }
        false
    }

    /// Finish a claim taken with [`claim_signal`](Self::claim_signal)
    pub fn settle_signal(&mut self, delivered: bool) {
        if self.completion_signal == CompletionSignal::Sending {
            self.completion_signal = if delivered {
                CompletionSignal::Sent
            } else {
                CompletionSignal::Unsent
            };
        }
    }

    /// Move a pending session to failed
    pub fn fail(&mut self, reason: String, now: i64) -> TransferResult<()> {
        if !self.status.is_pending() {
            return Err(TransferError::session_closed(self.token.as_str()));
        }
        self.status = UploadStatus::Failed {
            failed_at: now,
            reason,
        };
        self.updated_at = now;
        Ok(())
    }
}

/// Storage for upload session state
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    /// Create a new upload session. Fails if the file already has a pending one.
    async fn create(&self, session: UploadSession) -> TransferResult<UploadSession>;

    /// Get an upload session
    async fn get(&self, token: &SessionToken) -> TransferResult<UploadSession>;

    /// Latest session for a file
    async fn find_by_file(&self, file_id: &FileId) -> TransferResult<UploadSession>;

    /// Record a chunk arrival and claim an owed completion signal, both
    /// atomically per session
    async fn record_chunk(&self, token: &SessionToken, index: u32) -> TransferResult<ChunkRecord>;

    /// Settle a completion signal claimed by `record_chunk`
    async fn settle_signal(&self, token: &SessionToken, delivered: bool) -> TransferResult<()>;

    /// Mark session as failed
    async fn mark_failed(&self, token: &SessionToken, reason: String) -> TransferResult<UploadSession>;

    /// Drop settled sessions last touched before `before` (unix seconds)
    async fn purge_terminal(&self, before: i64) -> TransferResult<usize>;
}

/// Tracks which chunks of each upload have arrived and signals completion
/// to the metadata collaborator exactly once.
#[derive(Clone)]
pub struct UploadTracker {
    sessions: Arc<dyn UploadSessionStore>,
    metadata: Arc<dyn FileMetaStore>,
    max_chunks: u32,
}

impl UploadTracker {
    pub fn new(
        sessions: Arc<dyn UploadSessionStore>,
        metadata: Arc<dyn FileMetaStore>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            sessions,
            metadata,
            max_chunks: config.max_chunks,
        }
    }

    pub async fn create_session(
        &self,
        ctx: &TransferCtx,
        file_id: FileId,
        total_size: u64,
        chunk_size: u64,
    ) -> TransferResult<SessionToken> {
        let session = UploadSession::new(
            SessionToken::generate(),
            file_id,
            ctx.owner_id.clone(),
            total_size,
            chunk_size,
        )?;
        if session.total_chunks > self.max_chunks {
            return Err(TransferError::invalid(format!(
                "Upload needs {} chunks, limit is {}",
                session.total_chunks, self.max_chunks
            )));
        }

        let session = self.sessions.create(session).await?;
        tracing::info!(
            request_id = %ctx.request_id,
            token = %session.token,
            file_id = %session.file_id,
            total_chunks = session.total_chunks,
            "upload session created"
        );
        Ok(session.token)
    }

    pub async fn record_chunk_arrival(
        &self,
        ctx: &TransferCtx,
        token: &SessionToken,
        index: u32,
    ) -> TransferResult<ChunkArrival> {
        let recorded = self.sessions.record_chunk(token, index).await?;
        tracing::debug!(request_id = %ctx.request_id, %token, index, arrival = ?recorded.arrival, "chunk recorded");

        if let Some(file_id) = recorded.signal_for {
            self.signal_completion(ctx, token, &file_id).await?;
        }
        Ok(recorded.arrival)
    }

    /// Flip the file to uploaded. On failure the claim is released, so the
    /// next arrival for this session (a client retry) delivers it again.
    async fn signal_completion(&self, ctx: &TransferCtx, token: &SessionToken, file_id: &FileId) -> TransferResult<()> {
        let delivered = self
            .metadata
            .set_file_status(file_id, FileStatus::Uploaded)
            .await;
        if let Err(err) = self.sessions.settle_signal(token, delivered.is_ok()).await {
            tracing::warn!(request_id = %ctx.request_id, %token, error = %err, "could not settle completion signal");
        }
        match delivered {
            Ok(()) => {
                tracing::info!(request_id = %ctx.request_id, %token, %file_id, "upload completed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(request_id = %ctx.request_id, %token, %file_id, error = %err, "completion signal not delivered");
                Err(err)
            }
        }
    }

    pub async fn mark_failed(
        &self,
        ctx: &TransferCtx,
        token: &SessionToken,
        reason: impl Into<String>,
    ) -> TransferResult<UploadSession> {
        let reason = reason.into();
        let session = self.sessions.mark_failed(token, reason.clone()).await?;
        self.metadata
            .set_file_status(&session.file_id, FileStatus::Failed)
            .await?;
        tracing::warn!(request_id = %ctx.request_id, %token, %reason, "upload session failed");
        Ok(session)
    }

    pub async fn lookup_by_token(&self, token: &SessionToken) -> TransferResult<UploadSession> {
        self.sessions.get(token).await
    }

    pub async fn lookup_by_file_id(&self, file_id: &FileId) -> TransferResult<UploadSession> {
        self.sessions.find_by_file(file_id).await
    }

    /// Drop terminal sessions older than `max_age_secs`
    pub async fn purge_terminal(&self, max_age_secs: i64) -> TransferResult<usize> {
        let purged = self.sessions.purge_terminal(now_secs() - max_age_secs).await?;
        if purged > 0 {
            tracing::info!(purged, "purged finished upload sessions");
        }
        Ok(purged)
    }
}
