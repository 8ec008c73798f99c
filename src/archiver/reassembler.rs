//! Reads a completed archive back into memory.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::db::{ArchiveRecord, ArchiveStatus};
use crate::error::{ArchiveError, Result};
use crate::store::BlobStore;

/// The archived bundle of one record.
///
/// Stylesheets and scripts are keyed by file name. Images are returned as
/// public URLs under the configured asset prefix rather than inlined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveContent {
    pub html: String,
    pub css: BTreeMap<String, String>,
    pub js: BTreeMap<String, String>,
    pub images: Vec<String>,
}

/// Load the stored HTML, stylesheets and scripts of a completed record.
///
/// # Errors
///
/// Returns `NotComplete` when the record has not reached `complete`, and
/// `Integrity` when any file named by the record cannot be read.
pub async fn reassemble(
    blobs: &dyn BlobStore,
    record: &ArchiveRecord,
    output_root: &Path,
    public_prefix: &str,
) -> Result<ArchiveContent> {
    if record.status != ArchiveStatus::Complete {
        return Err(ArchiveError::NotComplete {
            id: record.id,
            status: record.status,
        });
    }

    let html = read_text(blobs, &record.html_path).await?;
    let css = read_keyed(blobs, &record.asset_manifest.css).await?;
    let js = read_keyed(blobs, &record.asset_manifest.js).await?;
    let images = record
        .asset_manifest
        .images
        .iter()
        .map(|stored| public_url(output_root, public_prefix, stored))
        .collect();

    Ok(ArchiveContent {
        html,
        css,
        js,
        images,
    })
}

async fn read_text(blobs: &dyn BlobStore, stored: &str) -> Result<String> {
    let path = Path::new(stored);
    let bytes = blobs
        .read(path)
        .await
        .map_err(|source| ArchiveError::Integrity {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn read_keyed(blobs: &dyn BlobStore, paths: &[String]) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for stored in paths {
        let name = Path::new(stored)
            .file_name()
            .map_or_else(|| stored.clone(), |n| n.to_string_lossy().into_owned());
        files.insert(name, read_text(blobs, stored).await?);
    }
    Ok(files)
}

/// Map a stored path under `output_root` to its URL under `public_prefix`.
///
/// Paths outside the output root are returned unchanged.
#[must_use]
pub fn public_url(output_root: &Path, public_prefix: &str, stored: &str) -> String {
    let Ok(relative) = Path::new(stored).strip_prefix(output_root) else {
        return stored.to_string();
    };
    let segments: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{}/{}", public_prefix.trim_end_matches('/'), segments.join("/"))
}
