use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::types::now_secs;
use crate::{
    ChunkRecord, FileId, SessionToken, TransferError, TransferResult, UploadSession,
    UploadSessionStore,
};

/// In-memory upload session store.
///
/// Each session lives in one dashmap shard; chunk arrivals mutate it under
/// that shard's write guard, which makes add-then-check linearizable.
#[derive(Clone, Default)]
pub struct MemoryUploadSessionStore {
    sessions: Arc<DashMap<SessionToken, UploadSession>>,
    by_file: Arc<DashMap<FileId, SessionToken>>,
}

impl MemoryUploadSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn with_session_mut<F, R>(&self, token: &SessionToken, f: F) -> TransferResult<R>
    where
        F: FnOnce(&mut UploadSession) -> TransferResult<R>,
    {
        let mut session = self
            .sessions
            .get_mut(token)
            .ok_or_else(|| TransferError::session_not_found(token.as_str()))?;
        f(session.value_mut())
    }
}

#[async_trait]
impl UploadSessionStore for MemoryUploadSessionStore {
    async fn create(&self, session: UploadSession) -> TransferResult<UploadSession> {
        // lock order: file index, then sessions
        let entry = self.by_file.entry(session.file_id.clone());
        if let Entry::Occupied(existing) = &entry {
            let live = self
                .sessions
                .get(existing.get())
                .map(|s| s.status.is_pending())
                .unwrap_or(false);
            if live {
                return Err(TransferError::invalid(format!(
                    "File {} already has an upload in progress",
                    session.file_id
                )));
            }
        }

        let _index = entry.insert(session.token.clone());
        self.sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, token: &SessionToken) -> TransferResult<UploadSession> {
        self.sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or_else(|| TransferError::session_not_found(token.as_str()))
    }

    async fn find_by_file(&self, file_id: &FileId) -> TransferResult<UploadSession> {
        let token = self
            .by_file
            .get(file_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| TransferError::session_not_found(file_id.as_str()))?;
        self.get(&token).await
    }

    async fn record_chunk(&self, token: &SessionToken, index: u32) -> TransferResult<ChunkRecord> {
        let now = now_secs();
        self.with_session_mut(token, |session| {
            let arrival = session.record(index, now)?;
            let signal_for = session.claim_signal().then(|| session.file_id.clone());
            Ok(ChunkRecord { arrival, signal_for })
        })
    }

    async fn settle_signal(&self, token: &SessionToken, delivered: bool) -> TransferResult<()> {
        self.with_session_mut(token, |session| {
            session.settle_signal(delivered);
            Ok(())
        })
    }

    async fn mark_failed(&self, token: &SessionToken, reason: String) -> TransferResult<UploadSession> {
        let now = now_secs();
        self.with_session_mut(token, |session| {
            session.fail(reason, now)?;
            Ok(session.clone())
        })
    }

    async fn purge_terminal(&self, before: i64) -> TransferResult<usize> {
        let stale: Vec<(SessionToken, FileId)> = self
            .sessions
            .iter()
            .filter(|s| s.is_settled() && s.updated_at < before)
            .map(|s| (s.token.clone(), s.file_id.clone()))
            .collect();

        let mut purged = 0;
        for (token, file_id) in stale {
            if self
                .sessions
                .remove_if(&token, |_, s| s.is_settled())
                .is_some()
            {
                self.by_file.remove_if(&file_id, |_, t| t == &token);
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkArrival, CompletionSignal, OwnerId};

    fn session(file: &str, total: u64) -> UploadSession {
        UploadSession::new(
            SessionToken::generate(),
            FileId::new(file),
            OwnerId::new("alice"),
            total,
            4,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn one_live_session_per_file() {
        let store = MemoryUploadSessionStore::new();
        let first = store.create(session("f1", 8)).await.unwrap();

        assert!(matches!(
            store.create(session("f1", 8)).await,
            Err(TransferError::Invalid { .. })
        ));

        store.mark_failed(&first.token, "aborted".into()).await.unwrap();
        let second = store.create(session("f1", 8)).await.unwrap();
        assert_eq!(store.find_by_file(&FileId::new("f1")).await.unwrap().token, second.token);
    }

    #[tokio::test]
    async fn purge_drops_only_settled_sessions() {
        let store = MemoryUploadSessionStore::new();
        let done = store.create(session("f1", 4)).await.unwrap();
        let open = store.create(session("f2", 8)).await.unwrap();

        let unsignalled = store.create(session("f3", 4)).await.unwrap();

        assert_eq!(store.record_chunk(&done.token, 0).await.unwrap().arrival, ChunkArrival::Completed);
        store.settle_signal(&done.token, true).await.unwrap();
        // completed, but the file was never flipped: kept for the retry
        store.record_chunk(&unsignalled.token, 0).await.unwrap();
        store.settle_signal(&unsignalled.token, false).await.unwrap();

        let purged = store.purge_terminal(now_secs() + 1).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&done.token).await.is_err());
        assert!(store.find_by_file(&FileId::new("f1")).await.is_err());
        assert!(store.get(&open.token).await.is_ok());
        assert!(store.get(&unsignalled.token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_arrivals_complete_once() {
        let store = MemoryUploadSessionStore::new();
        let total_chunks = 64u32;
        let created = store.create(session("f1", total_chunks as u64 * 4)).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..total_chunks {
            // every index delivered twice
            for _ in 0..2 {
                let store = store.clone();
                let token = created.token.clone();
                handles.push(tokio::spawn(async move { store.record_chunk(&token, index).await }));
            }
        }

        let mut completed = 0;
        let mut duplicates = 0;
        let mut claims = 0;
        for handle in handles {
            let recorded = handle.await.unwrap().unwrap();
            if recorded.signal_for.is_some() {
                claims += 1;
            }
            match recorded.arrival {
                ChunkArrival::Completed => completed += 1,
                ChunkArrival::Duplicate => duplicates += 1,
                ChunkArrival::Recorded => {}
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(claims, 1);
        assert_eq!(duplicates, total_chunks);
        let session = store.get(&created.token).await.unwrap();
        assert!(session.is_complete());
        assert_eq!(session.received_count(), total_chunks);
    }

    #[tokio::test]
    async fn released_signal_is_reclaimed_by_next_arrival() {
        let store = MemoryUploadSessionStore::new();
        let created = store.create(session("f1", 4)).await.unwrap();

        let first = store.record_chunk(&created.token, 0).await.unwrap();
        assert_eq!(first.signal_for, Some(FileId::new("f1")));
        // held claim blocks a second claimant
        assert_eq!(store.record_chunk(&created.token, 0).await.unwrap().signal_for, None);

        store.settle_signal(&created.token, false).await.unwrap();
        let retry = store.record_chunk(&created.token, 0).await.unwrap();
        assert_eq!(retry.arrival, ChunkArrival::Duplicate);
        assert_eq!(retry.signal_for, Some(FileId::new("f1")));

        store.settle_signal(&created.token, true).await.unwrap();
        assert_eq!(store.record_chunk(&created.token, 0).await.unwrap().signal_for, None);
        assert_eq!(
            store.get(&created.token).await.unwrap().completion_signal,
            CompletionSignal::Sent
        );
    }
}
