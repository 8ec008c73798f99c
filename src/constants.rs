//! Shared constants used across the application.

/// User agent string used for archival HTTP requests.
///
/// Some servers reject requests without a conventional browser user agent, so
/// page and asset fetches both present as a desktop browser.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// `Accept` header sent with every archival request.
pub const ARCHIVAL_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// `Accept-Language` header sent with every archival request.
pub const ARCHIVAL_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Name of the archived document inside a job directory.
pub const INDEX_FILE_NAME: &str = "index.html";

/// Directory inside a job directory that holds downloaded assets.
pub const ASSETS_DIR_NAME: &str = "assets";
