use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::now_secs;
use crate::{FileId, OwnerId, TransferError, TransferResult};

/// Lifecycle state of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploaded,
    Failed,
}

/// Metadata record the transfer engine keeps about one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub file_id: FileId,
    pub owner_id: OwnerId,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub chunk_size: u64,
    pub extension: Option<String>,
    pub folder_id: Option<String>,
    pub status: FileStatus,
    pub created_at: i64,
}

impl FileMeta {
    pub fn new(file_id: FileId, owner_id: OwnerId, file_name: impl Into<String>, size_bytes: u64, chunk_size: u64) -> Self {
        Self {
            file_id,
            owner_id,
            file_name: file_name.into(),
            content_type: "application/octet-stream".to_string(),
            size_bytes,
            chunk_size,
            extension: None,
            folder_id: None,
            status: FileStatus::Pending,
            created_at: now_secs(),
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_extension(mut self, extension: Option<String>) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_folder(mut self, folder_id: Option<String>) -> Self {
        self.folder_id = folder_id;
        self
    }

    /// ceil(size / chunk_size)
    pub fn total_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.size_bytes.div_ceil(self.chunk_size)
    }
}

/// Folder as it appears in a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub folder_id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// File as it appears in a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: FileId,
    pub name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub status: FileStatus,
}

impl From<&FileMeta> for FileSummary {
    fn from(meta: &FileMeta) -> Self {
        Self {
            file_id: meta.file_id.clone(),
            name: meta.file_name.clone(),
            size_bytes: meta.size_bytes,
            content_type: meta.content_type.clone(),
            status: meta.status,
        }
    }
}

/// One entry of a folder listing, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriveEntry {
    Folder(FolderSummary),
    File(FileSummary),
}

impl DriveEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Folder(folder) => &folder.name,
            Self::File(file) => &file.name,
        }
    }
}

/// Metadata persistence collaborator.
///
/// The transfer engine reads file records to lay out downloads and writes
/// exactly one status flip per upload.
#[async_trait]
pub trait FileMetaStore: Send + Sync {
    async fn register_file(&self, meta: FileMeta) -> TransferResult<FileMeta>;

    async fn get_file_meta(&self, file_id: &FileId) -> TransferResult<FileMeta>;

    async fn set_file_status(&self, file_id: &FileId, status: FileStatus) -> TransferResult<()>;

    async fn register_folder(&self, owner_id: &OwnerId, folder: FolderSummary) -> TransferResult<FolderSummary>;

    /// Entries directly inside `folder_id` (root when `None`): folders
    /// first, each group sorted by name
    async fn list_entries(&self, owner_id: &OwnerId, folder_id: Option<&str>) -> TransferResult<Vec<DriveEntry>>;
}

/// In-memory metadata store
#[derive(Clone, Default)]
pub struct MemoryFileMetaStore {
    files: Arc<DashMap<FileId, FileMeta>>,
    folders: Arc<DashMap<String, (OwnerId, FolderSummary)>>,
}

impl MemoryFileMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileMetaStore for MemoryFileMetaStore {
    async fn register_file(&self, meta: FileMeta) -> TransferResult<FileMeta> {
        if self.files.contains_key(&meta.file_id) {
            return Err(TransferError::invalid(format!(
                "File {} is already registered",
                meta.file_id
            )));
        }
        self.files.insert(meta.file_id.clone(), meta.clone());
        Ok(meta)
    }

    async fn get_file_meta(&self, file_id: &FileId) -> TransferResult<FileMeta> {
        self.files
            .get(file_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransferError::not_found(file_id.as_str()))
    }

    async fn set_file_status(&self, file_id: &FileId, status: FileStatus) -> TransferResult<()> {
        let mut entry = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| TransferError::not_found(file_id.as_str()))?;
        // only pending files move; re-applying the current status is a no-op
        if entry.status != FileStatus::Pending && entry.status != status {
            return Err(TransferError::metadata(format!(
                "File {} is {:?}, cannot become {:?}",
                file_id, entry.status, status
            )));
        }
        entry.status = status;
        Ok(())
    }

    async fn register_folder(&self, owner_id: &OwnerId, folder: FolderSummary) -> TransferResult<FolderSummary> {
        if folder.name.trim().is_empty() {
            return Err(TransferError::invalid("Folder name must not be empty"));
        }
        if let Some(parent) = folder.parent_id.as_deref() {
            let owned = self
                .folders
                .get(parent)
                .map(|entry| &entry.value().0 == owner_id)
                .unwrap_or(false);
            if !owned {
                return Err(TransferError::not_found(parent));
            }
        }
        self.folders
            .insert(folder.folder_id.clone(), (owner_id.clone(), folder.clone()));
        Ok(folder)
    }

    async fn list_entries(&self, owner_id: &OwnerId, folder_id: Option<&str>) -> TransferResult<Vec<DriveEntry>> {
        let mut folders: Vec<FolderSummary> = self
            .folders
            .iter()
            .filter(|e| &e.value().0 == owner_id && e.value().1.parent_id.as_deref() == folder_id)
            .map(|e| e.value().1.clone())
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files: Vec<FileSummary> = self
            .files
            .iter()
            .filter(|e| &e.value().owner_id == owner_id && e.value().folder_id.as_deref() == folder_id)
            .map(|e| FileSummary::from(e.value()))
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(folders
            .into_iter()
            .map(DriveEntry::Folder)
            .chain(files.into_iter().map(DriveEntry::File))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("alice")
    }

    #[tokio::test]
    async fn status_flip_is_visible() {
        let store = MemoryFileMetaStore::new();
        let meta = FileMeta::new(FileId::new("f1"), owner(), "a.bin", 10, 4);
        store.register_file(meta).await.unwrap();

        store.set_file_status(&FileId::new("f1"), FileStatus::Uploaded).await.unwrap();
        let meta = store.get_file_meta(&FileId::new("f1")).await.unwrap();
        assert_eq!(meta.status, FileStatus::Uploaded);
        assert_eq!(meta.total_chunks(), 3);
    }

    #[tokio::test]
    async fn finished_files_do_not_change_status() {
        let store = MemoryFileMetaStore::new();
        store.register_file(FileMeta::new(FileId::new("f1"), owner(), "a.bin", 10, 4)).await.unwrap();
        store.set_file_status(&FileId::new("f1"), FileStatus::Uploaded).await.unwrap();

        store.set_file_status(&FileId::new("f1"), FileStatus::Uploaded).await.unwrap();
        assert!(matches!(
            store.set_file_status(&FileId::new("f1"), FileStatus::Failed).await,
            Err(TransferError::Metadata { .. })
        ));
    }

    #[tokio::test]
    async fn folder_parent_must_exist_for_owner() {
        let store = MemoryFileMetaStore::new();
        let child = FolderSummary { folder_id: "d2".into(), name: "sub".into(), parent_id: Some("d1".into()) };
        assert!(matches!(
            store.register_folder(&owner(), child.clone()).await,
            Err(TransferError::NotFound { .. })
        ));

        store
            .register_folder(&OwnerId::new("bob"), FolderSummary { folder_id: "d1".into(), name: "bobs".into(), parent_id: None })
            .await
            .unwrap();
        assert!(store.register_folder(&owner(), child).await.is_err());
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let store = MemoryFileMetaStore::new();
        assert!(matches!(
            store.set_file_status(&FileId::new("nope"), FileStatus::Failed).await,
            Err(TransferError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn listing_puts_folders_first_and_scopes_by_owner() {
        let store = MemoryFileMetaStore::new();
        store
            .register_folder(&owner(), FolderSummary { folder_id: "d1".into(), name: "docs".into(), parent_id: None })
            .await
            .unwrap();
        store.register_file(FileMeta::new(FileId::new("f2"), owner(), "zeta.txt", 1, 4)).await.unwrap();
        store.register_file(FileMeta::new(FileId::new("f1"), owner(), "alpha.txt", 1, 4)).await.unwrap();
        store
            .register_file(FileMeta::new(FileId::new("f3"), OwnerId::new("bob"), "bob.txt", 1, 4))
            .await
            .unwrap();
        store
            .register_file(FileMeta::new(FileId::new("f4"), owner(), "inner.txt", 1, 4).with_folder(Some("d1".into())))
            .await
            .unwrap();

        let names: Vec<String> = store
            .list_entries(&owner(), None)
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["docs", "alpha.txt", "zeta.txt"]);

        let inner = store.list_entries(&owner(), Some("d1")).await.unwrap();
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn entries_carry_type_discriminator() {
        let entry = DriveEntry::Folder(FolderSummary {
            folder_id: "d1".into(),
            name: "docs".into(),
            parent_id: None,
        });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["folderId"], "d1");

        let back: DriveEntry = serde_json::from_value(serde_json::json!({
            "type": "file",
            "fileId": "f1",
            "name": "a.txt",
            "sizeBytes": 3,
            "contentType": "text/plain",
            "status": "uploaded"
        }))
        .unwrap();
        assert!(matches!(back, DriveEntry::File(f) if f.status == FileStatus::Uploaded));
    }
}
