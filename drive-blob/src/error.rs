use thiserror::Error;

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur while moving chunks in or out of storage
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Upload session not found: {token}")]
    SessionNotFound { token: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Upload session {token} is closed")]
    SessionClosed { token: String },

    #[error("File {file_id} is not ready for download")]
    NotReady { file_id: String },

    #[error("Requested range not satisfiable for size {size}")]
    RangeNotSatisfiable { size: u64 },

    #[error("Storage backend error: {source}")]
    Unavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Metadata collaborator error: {message}")]
    Metadata { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Stream ended after {written} of {expected} bytes")]
    IncompleteStream { expected: u64, written: u64 },
}

impl TransferError {
    /// Wrap a backend failure (filesystem or object store)
    pub fn unavailable<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unavailable {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error for a storage key or record id
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn session_not_found<S: Into<String>>(token: S) -> Self {
        Self::SessionNotFound {
            token: token.into(),
        }
    }

    pub fn session_closed<S: Into<String>>(token: S) -> Self {
        Self::SessionClosed {
            token: token.into(),
        }
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn metadata<S: Into<String>>(message: S) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::unavailable(err)
    }
}

impl From<TransferError> for std::io::Error {
    fn from(err: TransferError) -> Self {
        let kind = match &err {
            TransferError::NotFound { .. } => std::io::ErrorKind::NotFound,
            TransferError::Cancelled => std::io::ErrorKind::Interrupted,
            TransferError::DeadlineExceeded => std::io::ErrorKind::TimedOut,
            TransferError::IncompleteStream { .. } => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
