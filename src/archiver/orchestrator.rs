//! The archive job state machine.
//!
//! A conversion moves its record `pending -> in_progress -> complete | failed`.
//! Fetching the page, creating the job directory and writing `index.html` are
//! fatal; individual asset downloads are not. Each job runs on its own task,
//! so a caller that goes away does not leave the record unfinished.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::downloader::{plan_downloads, AssetDownloader, AssetWarning};
use super::extractor::extract_assets;
use super::http::{build_client, fetch_page};
use super::reassembler::{reassemble, ArchiveContent};
use super::resolver::resolve_all;
use super::url_lock::UrlLocks;
use crate::config::{Config, ExtractionMode};
use crate::db::{ArchiveRecord, ArchiveStatus, AssetManifest, NewArchiveRecord};
use crate::error::{ArchiveError, Result};
use crate::store::{BlobStore, JobLayout, RecordStore};

/// Error detail stored on records found unfinished at startup.
pub const INTERRUPTED_DETAIL: &str = "interrupted before completion";

/// Per-call controls for a conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Cancels the job; the record is finalized as failed.
    pub cancel: CancellationToken,
    /// Upper bound on the whole job, measured from when work starts.
    pub deadline: Option<Duration>,
}

/// Result of `convert` or `retry`.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutcome {
    pub id: i64,
    /// True when an existing record was returned without doing any work.
    pub reused: bool,
    pub status: ArchiveStatus,
    /// Assets that could not be archived. Empty for reused records.
    pub warnings: Vec<AssetWarning>,
}

struct JobOutput {
    html_path: String,
    manifest: AssetManifest,
    warnings: Vec<AssetWarning>,
}

/// Drives archive jobs against an injected record store and blob store.
#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    client: reqwest::Client,
    downloader: AssetDownloader,
    url_locks: Arc<UrlLocks>,
    output_dir: PathBuf,
    public_asset_prefix: String,
    extraction_mode: ExtractionMode,
    job_deadline: Option<Duration>,
}

impl Archiver {
    /// Create an archiver from configuration and its two collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let client = build_client(config.http_timeout)?;
        let downloader =
            AssetDownloader::new(client.clone(), Arc::clone(&blobs), config.asset_concurrency);

        Ok(Self {
            store,
            blobs,
            client,
            downloader,
            url_locks: UrlLocks::new(),
            output_dir: config.output_dir.clone(),
            public_asset_prefix: config.public_asset_prefix.clone(),
            extraction_mode: config.extraction_mode,
            job_deadline: config.job_deadline,
        })
    }

    /// Archive `source_url`, or return the existing record for it.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty URL, or the fatal error that moved the
    /// new record to `failed`.
    pub async fn convert(&self, source_url: &str) -> Result<ConvertOutcome> {
        self.convert_with(source_url, self.default_options()).await
    }

    /// [`Archiver::convert`] with explicit cancellation and deadline.
    ///
    /// # Errors
    ///
    /// See [`Archiver::convert`]; also `Cancelled` when the token fires or the
    /// deadline passes.
    pub async fn convert_with(
        &self,
        source_url: &str,
        options: ConvertOptions,
    ) -> Result<ConvertOutcome> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(ArchiveError::Validation("source URL cannot be empty".to_string()));
        }

        let mut record = {
            let _url_guard = self.url_locks.acquire(source_url).await;

            if let Some(existing) = self.store.find_by_source_url(source_url).await? {
                info!(
                    record_id = existing.id,
                    url = %source_url,
                    status = existing.status.as_str(),
                    "Returning existing archive"
                );
                return Ok(ConvertOutcome {
                    id: existing.id,
                    reused: true,
                    status: existing.status,
                    warnings: Vec::new(),
                });
            }

            self.store.create(NewArchiveRecord::new(source_url)).await?
        };

        let archiver = self.clone();
        detach(async move {
            record.mark_in_progress()?;
            archiver.store.update(&record).await?;
            info!(record_id = record.id, url = %record.source_url, "Archive job started");

            archiver.run_job(record, options).await
        })
        .await
    }

    /// Rerun a failed archive under its existing id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted ids, `InvalidTransition` when
    /// the record is not `failed`, or the fatal error of the new attempt.
    pub async fn retry(&self, id: i64) -> Result<ConvertOutcome> {
        self.retry_with(id, self.default_options()).await
    }

    /// [`Archiver::retry`] with explicit cancellation and deadline.
    ///
    /// # Errors
    ///
    /// See [`Archiver::retry`].
    pub async fn retry_with(&self, id: i64, options: ConvertOptions) -> Result<ConvertOutcome> {
        let source_url = self.store.get(id).await?.source_url;

        let record = {
            let _url_guard = self.url_locks.acquire(&source_url).await;
            // Re-read under the lock so two retries cannot both reopen it.
            let mut record = self.store.get(id).await?;
            record.begin_retry()?;
            self.store.update(&record).await?;
            record
        };
        info!(record_id = id, url = %source_url, "Retrying failed archive");

        let archiver = self.clone();
        detach(async move { archiver.run_job(record, options).await }).await
    }

    /// Fail every record left `pending` or `in_progress` by a previous process.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let count = self.store.fail_interrupted(INTERRUPTED_DETAIL).await?;
        if count > 0 {
            warn!(count, "Marked interrupted archive jobs as failed");
        }
        Ok(count)
    }

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted ids.
    pub async fn record(&self, id: i64) -> Result<ArchiveRecord> {
        Ok(self.store.get(id).await?)
    }

    /// Read back the archived bundle of a completed record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotComplete`, or `Integrity` when a stored file is
    /// missing.
    pub async fn content(&self, id: i64) -> Result<ArchiveContent> {
        let record = self.store.get(id).await?;
        reassemble(
            self.blobs.as_ref(),
            &record,
            &self.output_dir,
            &self.public_asset_prefix,
        )
        .await
    }

    fn default_options(&self) -> ConvertOptions {
        ConvertOptions {
            cancel: CancellationToken::new(),
            deadline: self.job_deadline,
        }
    }

    async fn run_job(
        &self,
        mut record: ArchiveRecord,
        options: ConvertOptions,
    ) -> Result<ConvertOutcome> {
        let deadline = options.deadline.map(|d| Instant::now() + d);
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping the job future aborts any in-flight downloads.
        let result = tokio::select! {
            result = self.archive_page(&record) => result,
            () = options.cancel.cancelled() => {
                Err(ArchiveError::Cancelled("job cancelled".to_string()))
            }
            () = expired => {
                Err(ArchiveError::Cancelled("job deadline exceeded".to_string()))
            }
        };

        let err = match result {
            Ok(output) => match self.finish_complete(record.clone(), output).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            },
            Err(err) => err,
        };

        warn!(record_id = record.id, error = %err, "Archive failed");
        record.mark_failed(err.to_string())?;
        if let Err(e) = self.store.update(&record).await {
            error!(record_id = record.id, error = %e, "Failed to persist failed status");
        }
        Err(err)
    }

    async fn finish_complete(
        &self,
        mut record: ArchiveRecord,
        output: JobOutput,
    ) -> Result<ConvertOutcome> {
        let asset_count = output.manifest.len();
        record.mark_complete(output.html_path, output.manifest)?;
        self.store.update(&record).await?;
        info!(
            record_id = record.id,
            assets = asset_count,
            skipped = output.warnings.len(),
            "Archive complete"
        );
        Ok(ConvertOutcome {
            id: record.id,
            reused: false,
            status: record.status,
            warnings: output.warnings,
        })
    }

    async fn archive_page(&self, record: &ArchiveRecord) -> Result<JobOutput> {
        let page = fetch_page(&self.client, &record.source_url).await?;

        let layout = JobLayout::new(&self.output_dir, record.id);
        self.blobs
            .create_dir_all(layout.job_dir())
            .await
            .map_err(|source| ArchiveError::Storage {
                path: layout.job_dir().to_path_buf(),
                source,
            })?;

        let index_path = layout.index_path();
        self.blobs
            .write(&index_path, page.body.as_bytes())
            .await
            .map_err(|source| ArchiveError::Storage {
                path: index_path.clone(),
                source,
            })?;

        let raw_assets = extract_assets(&page.body, self.extraction_mode);
        let references = resolve_all(&page.final_url, raw_assets);
        let plan = plan_downloads(&layout, &references);
        debug!(
            record_id = record.id,
            references = references.len(),
            downloads = plan.len(),
            "Discovered assets"
        );

        let report = self.downloader.download_all(plan).await;

        Ok(JobOutput {
            html_path: index_path.to_string_lossy().into_owned(),
            manifest: report.manifest,
            warnings: report.warnings,
        })
    }
}

/// Run a job on its own task so it finishes even if the caller stops polling.
async fn detach<F>(job: F) -> Result<ConvertOutcome>
where
    F: Future<Output = Result<ConvertOutcome>> + Send + 'static,
{
    match tokio::spawn(job).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ArchiveError::Cancelled("job aborted".to_string())),
    }
}
