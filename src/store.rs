//! Collaborator interfaces the archiving core depends on.
//!
//! The orchestrator only talks to a [`RecordStore`] for lifecycle records and
//! a [`BlobStore`] for files. Both are injected at construction; the SQLite
//! [`Database`] and [`LocalBlobStore`] are the production implementations.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::db::{
    fail_unfinished_records, find_latest_record_by_source_url, get_record, insert_record,
    list_records, soft_delete_record, update_record, ArchiveRecord, ArchiveRecordRow, Database,
    NewArchiveRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive record {0} not found")]
    NotFound(i64),

    #[error("corrupt archive record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for archive records.
///
/// Lookups never return soft-deleted records; `update` on a missing or deleted
/// record fails with [`StoreError::NotFound`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: NewArchiveRecord) -> Result<ArchiveRecord, StoreError>;

    async fn get(&self, id: i64) -> Result<ArchiveRecord, StoreError>;

    /// Most recently created active record for `source_url`, if any.
    async fn find_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<ArchiveRecord>, StoreError>;

    async fn update(&self, record: &ArchiveRecord) -> Result<(), StoreError>;

    /// Fail every record left `pending` or `in_progress`, returning how many
    /// were touched.
    async fn fail_interrupted(&self, detail: &str) -> Result<u64, StoreError>;
}

fn active_record(row: ArchiveRecordRow) -> Result<Option<ArchiveRecord>, StoreError> {
    let id = row.id;
    let record =
        ArchiveRecord::try_from(row).map_err(|e| StoreError::Corrupt(format!("{id}: {e:#}")))?;
    Ok(record.is_active().then_some(record))
}

#[async_trait]
impl RecordStore for Database {
    async fn create(&self, record: NewArchiveRecord) -> Result<ArchiveRecord, StoreError> {
        let id = insert_record(self.pool(), &record).await?;
        self.get(id).await
    }

    async fn get(&self, id: i64) -> Result<ArchiveRecord, StoreError> {
        match get_record(self.pool(), id).await? {
            Some(row) => active_record(row)?.ok_or(StoreError::NotFound(id)),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn find_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        match find_latest_record_by_source_url(self.pool(), source_url).await? {
            Some(row) => active_record(row),
            None => Ok(None),
        }
    }

    async fn update(&self, record: &ArchiveRecord) -> Result<(), StoreError> {
        if update_record(self.pool(), record).await? == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        Ok(())
    }

    async fn fail_interrupted(&self, detail: &str) -> Result<u64, StoreError> {
        Ok(fail_unfinished_records(self.pool(), detail, &Utc::now()).await?)
    }
}

impl Database {
    /// Soft-delete a record so it no longer appears in any lookup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record is missing or already deleted.
    pub async fn delete_record(&self, id: i64) -> Result<(), StoreError> {
        if soft_delete_record(self.pool(), id, &Utc::now()).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    /// All active records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn list_active_records(&self) -> Result<Vec<ArchiveRecord>, StoreError> {
        let mut records = Vec::new();
        for row in list_records(self.pool()).await? {
            if let Some(record) = active_record(row)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// File storage for archived pages and assets.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`BlobStore`] backed by the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalBlobStore;

impl LocalBlobStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// Storage layout of one archive job under the output root.
#[derive(Debug, Clone)]
pub struct JobLayout {
    job_dir: PathBuf,
}

impl JobLayout {
    #[must_use]
    pub fn new(output_root: &Path, record_id: i64) -> Self {
        Self {
            job_dir: output_root.join(record_id.to_string()),
        }
    }

    #[must_use]
    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.job_dir.join(crate::constants::INDEX_FILE_NAME)
    }

    #[must_use]
    pub fn asset_dir(&self, category: crate::db::AssetCategory) -> PathBuf {
        self.job_dir
            .join(crate::constants::ASSETS_DIR_NAME)
            .join(category.dir_name())
    }
}
