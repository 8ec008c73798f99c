//! Best-effort asset downloads for one archive job.
//!
//! File names are planned up front so that concurrent downloads never race
//! for the same path, then a bounded pool fetches the plan. A failed asset is
//! logged, reported as an [`AssetWarning`], and left out of the manifest.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use super::resolver::AssetReference;
use super::sanitize_filename;
use crate::db::{AssetCategory, AssetManifest};
use crate::error::AssetError;
use crate::store::{BlobStore, JobLayout};

/// Fallback name for URLs whose path has no usable last segment.
const DEFAULT_ASSET_NAME: &str = "asset";

/// One asset and the local path it will be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub url: Url,
    pub category: AssetCategory,
    pub target: PathBuf,
}

/// An asset that could not be archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetWarning {
    pub url: String,
    pub category: AssetCategory,
    pub reason: String,
}

/// Outcome of downloading a plan.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub manifest: AssetManifest,
    pub warnings: Vec<AssetWarning>,
}

/// Assign a target path to every distinct asset URL.
///
/// Repeated URLs are planned once. When two different URLs share a file name
/// within a category, the later one gets an 8-hex-digit suffix derived from
/// its URL.
#[must_use]
pub fn plan_downloads(layout: &JobLayout, references: &[AssetReference]) -> Vec<PlannedAsset> {
    let mut seen_urls = HashSet::new();
    let mut claimed: HashMap<(AssetCategory, String), Url> = HashMap::new();
    let mut plan = Vec::new();

    for reference in references {
        if !seen_urls.insert(reference.resolved_url.clone()) {
            continue;
        }

        let base_name = reference
            .resolved_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(sanitize_filename)
            .unwrap_or_else(|| DEFAULT_ASSET_NAME.to_string());

        let key = (reference.category, base_name.clone());
        let file_name = if claimed.contains_key(&key) {
            let suffixed = with_url_suffix(&base_name, &reference.resolved_url);
            claimed.insert((reference.category, suffixed.clone()), reference.resolved_url.clone());
            suffixed
        } else {
            claimed.insert(key, reference.resolved_url.clone());
            base_name
        };

        plan.push(PlannedAsset {
            url: reference.resolved_url.clone(),
            category: reference.category,
            target: layout.asset_dir(reference.category).join(file_name),
        });
    }

    plan
}

fn with_url_suffix(file_name: &str, url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let suffix = &hex::encode(digest)[..8];
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{file_name}-{suffix}"),
    }
}

/// Downloads planned assets through a bounded pool of concurrent requests.
#[derive(Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    blobs: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl AssetDownloader {
    #[must_use]
    pub fn new(client: reqwest::Client, blobs: Arc<dyn BlobStore>, concurrency: usize) -> Self {
        Self {
            client,
            blobs,
            concurrency: concurrency.max(1),
        }
    }

    /// Download a single asset to its planned path.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-2xx response, or a failed write.
    pub async fn download(&self, asset: &PlannedAsset) -> Result<(), AssetError> {
        let response = self.client.get(asset.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status(status));
        }
        let body = response.bytes().await?;

        if let Some(parent) = asset.target.parent() {
            self.blobs
                .create_dir_all(parent)
                .await
                .map_err(|source| AssetError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        self.blobs
            .write(&asset.target, &body)
            .await
            .map_err(|source| AssetError::Write {
                path: asset.target.clone(),
                source,
            })?;

        debug!(
            url = %asset.url,
            path = %asset.target.display(),
            bytes = body.len(),
            "Downloaded asset"
        );
        Ok(())
    }

    /// Download every planned asset, folding results into a manifest.
    ///
    /// Results are consumed in plan order, so the manifest lists assets in the
    /// order they were referenced regardless of which request finished first.
    pub async fn download_all(&self, plan: Vec<PlannedAsset>) -> DownloadReport {
        stream::iter(plan)
            .map(|asset| async move {
                let result = self.download(&asset).await;
                (asset, result)
            })
            .buffered(self.concurrency)
            .fold(DownloadReport::default(), |mut report, (asset, result)| async move {
                match result {
                    Ok(()) => report
                        .manifest
                        .push(asset.category, asset.target.to_string_lossy().into_owned()),
                    Err(e) => {
                        warn!(
                            url = %asset.url,
                            category = asset.category.as_str(),
                            error = %e,
                            "Asset download failed, omitting from archive"
                        );
                        report.warnings.push(AssetWarning {
                            url: asset.url.to_string(),
                            category: asset.category,
                            reason: e.to_string(),
                        });
                    }
                }
                report
            })
            .await
    }
}
