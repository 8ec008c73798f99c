//! Resolution of raw asset references against the page they came from.

use tracing::debug;
use url::Url;

use super::extractor::RawAsset;
use crate::db::AssetCategory;

/// An asset ready to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub raw_ref: String,
    pub category: AssetCategory,
    pub resolved_url: Url,
}

/// Resolve `raw_ref` against `base` and classify it.
///
/// Absolute references are used as-is; relative ones (`/x`, `x`, `../x`,
/// `//host/x`) follow standard reference resolution. Returns `None` for
/// references that do not parse or do not point at an `http(s)` resource.
#[must_use]
pub fn resolve_reference(base: &Url, raw_ref: &str) -> Option<AssetReference> {
    let resolved = match Url::parse(raw_ref) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base.join(raw_ref) {
            Ok(url) => url,
            Err(e) => {
                debug!(raw_ref = %raw_ref, error = %e, "Skipping unresolvable asset reference");
                return None;
            }
        },
        Err(e) => {
            debug!(raw_ref = %raw_ref, error = %e, "Skipping malformed asset reference");
            return None;
        }
    };

    if !matches!(resolved.scheme(), "http" | "https") {
        debug!(url = %resolved, "Skipping asset with unsupported scheme");
        return None;
    }

    Some(AssetReference {
        raw_ref: raw_ref.to_string(),
        category: AssetCategory::from_reference(raw_ref),
        resolved_url: resolved,
    })
}

/// Resolve every extracted reference, dropping the ones that fail.
pub fn resolve_all(base: &Url, assets: impl IntoIterator<Item = RawAsset>) -> Vec<AssetReference> {
    assets
        .into_iter()
        .filter_map(|asset| resolve_reference(base, &asset.raw_ref))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://site.example/page").unwrap()
    }

    #[test]
    fn test_resolves_root_relative() {
        let r = resolve_reference(&base(), "/style.css").unwrap();
        assert_eq!(r.resolved_url.as_str(), "http://site.example/style.css");
        assert_eq!(r.category, AssetCategory::Css);
    }

    #[test]
    fn test_resolves_document_relative() {
        let r = resolve_reference(&base(), "a.js").unwrap();
        assert_eq!(r.resolved_url.as_str(), "http://site.example/a.js");
        assert_eq!(r.category, AssetCategory::Js);

        let nested = Url::parse("https://site.example/docs/guide/intro.html").unwrap();
        let r = resolve_reference(&nested, "../img/x.gif").unwrap();
        assert_eq!(r.resolved_url.as_str(), "https://site.example/docs/img/x.gif");
    }

    #[test]
    fn test_absolute_reference_used_as_is() {
        let r = resolve_reference(&base(), "http://cdn.example/x.png").unwrap();
        assert_eq!(r.resolved_url.as_str(), "http://cdn.example/x.png");
        assert_eq!(r.category, AssetCategory::Image);
    }

    #[test]
    fn test_protocol_relative_reference() {
        let secure = Url::parse("https://site.example/").unwrap();
        let r = resolve_reference(&secure, "//cdn.example/lib.js").unwrap();
        assert_eq!(r.resolved_url.as_str(), "https://cdn.example/lib.js");
    }

    #[test]
    fn test_skips_unsupported_and_malformed() {
        assert!(resolve_reference(&base(), "ftp://files.example/a.css").is_none());
        assert!(resolve_reference(&base(), "http://[::1/broken.png").is_none());
    }

    #[test]
    fn test_resolve_all_drops_failures_and_keeps_order() {
        let raw = vec![
            RawAsset {
                raw_ref: "/style.css".to_string(),
                category: AssetCategory::Css,
            },
            RawAsset {
                raw_ref: "mailto:x@example.com.png".to_string(),
                category: AssetCategory::Image,
            },
            RawAsset {
                raw_ref: "a.js".to_string(),
                category: AssetCategory::Js,
            },
        ];
        let resolved = resolve_all(&base(), raw);
        let urls: Vec<_> = resolved.iter().map(|r| r.resolved_url.as_str()).collect();
        assert_eq!(urls, vec!["http://site.example/style.css", "http://site.example/a.js"]);
    }
}
