use std::path::PathBuf;
use std::time::Duration;

use crate::S3Config;

/// Configuration for chunked transfers
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Fixed chunk size (bytes) for every file uploaded through this deployment
    pub chunk_size: u64,

    /// Absolute max size allowed for a single file (safety guard)
    pub max_file_bytes: u64,

    /// Upper bound on chunks per upload to protect session state
    pub max_chunks: u32,

    /// If true: all chunks except the final one must be exactly `chunk_size`,
    /// and the final one must hold the remainder
    pub require_exact_chunk_size: bool,

    /// How many chunks a download may fetch ahead of the one being emitted.
    /// 1 means strictly sequential fetches.
    pub download_prefetch: usize,

    /// Deadline applied to every request context the HTTP layer builds
    pub request_timeout: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5_000_000,                  // 5MB chunks
            max_file_bytes: 5 * 1024 * 1024 * 1024, // 5GB
            max_chunks: 10_000,
            require_exact_chunk_size: true,
            download_prefetch: 1,
            request_timeout: None,
        }
    }
}

impl TransferConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set max file size
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Set max chunks per upload
    pub fn with_max_chunks(mut self, max: u32) -> Self {
        self.max_chunks = max;
        self
    }

    /// Accept chunks of any length (relaxed mode)
    pub fn allow_variable_chunk_sizes(mut self) -> Self {
        self.require_exact_chunk_size = false;
        self
    }

    /// Fetch up to `depth` chunks ahead while streaming a download
    pub fn with_download_prefetch(mut self, depth: usize) -> Self {
        self.download_prefetch = depth.max(1);
        self
    }

    /// Give every request context a deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Where chunk bytes physically live
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Local filesystem rooted at a directory
    Local { root: PathBuf },
    /// S3-compatible object storage
    S3(S3Config),
    /// Process memory, for development and tests
    Memory,
}

impl StorageBackend {
    pub fn local<P: Into<PathBuf>>(root: P) -> Self {
        Self::Local { root: root.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::S3(_) => "s3",
            Self::Memory => "memory",
        }
    }
}
