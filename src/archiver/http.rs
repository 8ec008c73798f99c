use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::constants::{ARCHIVAL_ACCEPT, ARCHIVAL_ACCEPT_LANGUAGE, ARCHIVAL_USER_AGENT};
use crate::error::ArchiveError;

/// Build the HTTP client shared by page and asset fetches.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(ARCHIVAL_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(ARCHIVAL_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ARCHIVAL_ACCEPT_LANGUAGE),
    );

    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// A fetched HTML document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative asset references resolve against it.
    pub final_url: Url,
    pub body: String,
}

/// Fetch the primary page of an archive job.
///
/// # Errors
///
/// Returns [`ArchiveError::Fetch`] on network failure, timeout, or a non-2xx
/// response.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<FetchedPage, ArchiveError> {
    let fetch_error = |reason: String| ArchiveError::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(format!("{:#}", anyhow::Error::new(e))))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP request failed with status {status}")));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| fetch_error(format!("failed to read response body: {:#}", anyhow::Error::new(e))))?;

    debug!(url = %url, final_url = %final_url, bytes = body.len(), "Fetched page");

    Ok(FetchedPage { final_url, body })
}
