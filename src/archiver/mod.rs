pub mod downloader;
pub mod extractor;
pub mod http;
pub mod orchestrator;
pub mod reassembler;
pub mod resolver;
pub mod url_lock;

pub use downloader::{AssetDownloader, AssetWarning, DownloadReport, PlannedAsset};
pub use extractor::{extract_assets, RawAsset};
pub use orchestrator::{Archiver, ConvertOptions, ConvertOutcome};
pub use reassembler::ArchiveContent;
pub use resolver::{resolve_reference, AssetReference};
pub use url_lock::UrlLocks;

/// Maximum length of a stored asset file name, extension excluded.
const MAX_NAME_LENGTH: usize = 120;

/// Turn the last path segment of an asset URL into a safe local file name.
///
/// Percent-escapes and anything outside `[A-Za-z0-9._()-]` become underscores,
/// runs of underscores collapse, and the stem is truncated. Returns `None` when
/// nothing usable is left (e.g. a bare `/`).
pub fn sanitize_filename(segment: &str) -> Option<String> {
    let (name, ext) = match segment.rfind('.') {
        Some(0) | None => (segment, ""),
        Some(dot_pos) => segment.split_at(dot_pos),
    };

    let clean = |part: &str| -> String {
        part.chars()
            .map(|c| match c {
                '(' | ')' | '-' | '_' | '.' => c,
                c if c.is_ascii_alphanumeric() => c,
                _ => '_',
            })
            .collect::<String>()
            .split('_')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    };

    let name = clean(name);
    let ext = clean(ext);
    let name: String = name.chars().take(MAX_NAME_LENGTH).collect();
    let name = name.trim_matches('.');

    if name.is_empty() {
        return None;
    }
    Some(format!("{name}{ext}"))
}
