//! Chunk key scheme.
//!
//! The key layout `{ownerId}/{fileId}_{chunkIndex}` (with an optional
//! `.{ext}` suffix for whole-file uploads) is the durable contract between
//! the upload path, the download path and every storage backend. Changing it
//! requires migrating stored objects.

use crate::{FileId, OwnerId, TransferError, TransferResult};

/// The family of chunks belonging to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTarget {
    pub owner_id: OwnerId,
    pub file_id: FileId,
    pub extension: Option<String>,
}

impl ChunkTarget {
    pub fn new(owner_id: OwnerId, file_id: FileId) -> Self {
        Self {
            owner_id,
            file_id,
            extension: None,
        }
    }

    pub fn with_extension<S: Into<String>>(mut self, extension: Option<S>) -> Self {
        self.extension = extension.map(Into::into);
        self
    }
}

/// Storage key for a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey(String);

impl ChunkKey {
    /// Build the key for `(owner, file, index)`, rejecting identifiers that
    /// would make the layout ambiguous.
    pub fn new(owner_id: &str, file_id: &str, index: u32) -> TransferResult<Self> {
        validate_segment("owner id", owner_id)?;
        validate_segment("file id", file_id)?;
        Ok(Self(format!("{}/{}_{}", owner_id, file_id, index)))
    }

    /// Suffix the key with a file extension (whole-file uploads)
    pub fn with_extension(self, extension: &str) -> TransferResult<Self> {
        let ext = extension.trim_start_matches('.');
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransferError::invalid(format!(
                "Invalid key extension: {:?}",
                extension
            )));
        }
        Ok(Self(format!("{}.{}", self.0, ext)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_segment(what: &str, value: &str) -> TransferResult<()> {
    if value.trim().is_empty() {
        return Err(TransferError::invalid(format!("{} must not be empty", what)));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(TransferError::invalid(format!(
            "{} contains a path separator: {:?}",
            what, value
        )));
    }
    Ok(())
}

/// Strategy for generating chunk keys
pub trait ChunkKeyStrategy: Send + Sync {
    /// Key for one chunk of `target`
    fn chunk_key(&self, target: &ChunkTarget, index: u32) -> TransferResult<ChunkKey>;
}

/// Default key strategy: `{owner}/{file}_{index}[.{ext}]`
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyStrategy;

impl ChunkKeyStrategy for DefaultKeyStrategy {
    fn chunk_key(&self, target: &ChunkTarget, index: u32) -> TransferResult<ChunkKey> {
        let key = ChunkKey::new(target.owner_id.as_str(), target.file_id.as_str(), index)?;
        match target.extension.as_deref() {
            Some(ext) => key.with_extension(ext),
            None => Ok(key),
        }
    }
}

/// Extension of a file name, if it has a usable one (`"a.tar.gz"` -> `"gz"`)
pub fn extension_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
