use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{TransferError, TransferResult};

/// Stream of bytes for download content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Identifier of the user owning files and chunks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stored file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Generate a new random file ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from existing string
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, caller-visible token naming one upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    /// Generate a new random session token
    pub fn generate() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request context: who is calling, and whether the request is still wanted.
///
/// Every storage call made on behalf of a request goes through [`TransferCtx::guard`],
/// so once the cancellation token fires (or the deadline passes) no further
/// `get`/`put` is issued.
#[derive(Debug, Clone)]
pub struct TransferCtx {
    pub owner_id: OwnerId,
    pub request_id: String,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl TransferCtx {
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            request_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Fail fast if the request was cancelled or ran out of time.
    pub fn ensure_active(&self) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(TransferError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Run one storage call under this context's cancellation token and deadline.
    pub async fn guard<F, T>(&self, fut: F) -> TransferResult<T>
    where
        F: Future<Output = TransferResult<T>>,
    {
        self.ensure_active()?;

        let deadline = self.deadline;
        let work = async move {
            match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(TransferError::DeadlineExceeded),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = work => result,
        }
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx() -> TransferCtx {
        TransferCtx::new(OwnerId::new("owner-1"))
    }

    #[test]
    fn session_tokens_are_prefixed_and_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert!(a.as_str().starts_with("upl_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn guard_runs_work_when_active() {
        let value = ctx().guard(async { Ok::<_, TransferError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn guard_refuses_work_after_cancel() {
        let ctx = ctx();
        ctx.cancel.cancel();

        let mut ran = false;
        let result = ctx
            .guard(async {
                ran = true;
                Ok::<_, TransferError>(())
            })
            .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(!ran);
    }

    #[tokio::test]
    async fn guard_enforces_deadline() {
        let ctx = ctx().with_timeout(Duration::from_millis(20));
        let result = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TransferError>(())
            })
            .await;

        assert!(matches!(result, Err(TransferError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn guard_stops_in_flight_work_on_cancel() {
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TransferError>(())
            })
            .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
