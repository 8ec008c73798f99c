//! Discovery of stylesheet, script and image references in archived markup.
//!
//! Two strategies share one contract: every reference comes back with its
//! query string and fragment removed, tagged `css`, `js` or `image` by file
//! extension, in the order the strategy finds them. Duplicates are kept.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::config::ExtractionMode;
use crate::db::AssetCategory;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "svg"];

static ASSET_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("link[href], script[src], img[src]").expect("static selector is valid")
});

static STYLESHEET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*?\bhref\s*=\s*["']([^"'?#]+?\.css)(?:[?#][^"']*)?["']"#)
        .expect("static regex is valid")
});

static SCRIPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*?\bsrc\s*=\s*["']([^"'?#]+?\.js)(?:[?#][^"']*)?["']"#)
        .expect("static regex is valid")
});

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"'?#]+?\.(?:jpg|jpeg|png|gif|svg))(?:[?#][^"']*)?["']"#,
    )
    .expect("static regex is valid")
});

/// An asset reference as written in the page, minus query and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAsset {
    pub raw_ref: String,
    pub category: AssetCategory,
}

/// Extract asset references with the configured strategy.
#[must_use]
pub fn extract_assets(html: &str, mode: ExtractionMode) -> Vec<RawAsset> {
    match mode {
        ExtractionMode::Dom => extract_assets_dom(html),
        ExtractionMode::Regex => scan_assets_regex(html),
    }
}

/// Walk the parsed document and collect `link/href`, `script/src` and
/// `img/src` in document order.
#[must_use]
pub fn extract_assets_dom(html: &str) -> Vec<RawAsset> {
    let document = Html::parse_document(html);
    let mut assets = Vec::new();

    for element in document.select(&ASSET_SELECTOR) {
        let element = element.value();
        let (attr, category) = match element.name() {
            "link" => ("href", AssetCategory::Css),
            "script" => ("src", AssetCategory::Js),
            "img" => ("src", AssetCategory::Image),
            _ => continue,
        };
        let Some(value) = element.attr(attr) else {
            continue;
        };
        if let Some(raw_ref) = qualify(value, category) {
            assets.push(RawAsset { raw_ref, category });
        }
    }

    assets
}

/// Fast path: scan the raw text with one pattern per category.
///
/// Results are grouped by category (stylesheets, then scripts, then images).
/// Tags split across unusual attribute layouts can be missed.
#[must_use]
pub fn scan_assets_regex(html: &str) -> Vec<RawAsset> {
    let mut assets = Vec::new();

    for (pattern, category) in [
        (&*STYLESHEET_PATTERN, AssetCategory::Css),
        (&*SCRIPT_PATTERN, AssetCategory::Js),
        (&*IMAGE_PATTERN, AssetCategory::Image),
    ] {
        for captures in pattern.captures_iter(html) {
            if let Some(raw_ref) = captures.get(1).and_then(|m| qualify(m.as_str(), category)) {
                assets.push(RawAsset { raw_ref, category });
            }
        }
    }

    assets
}

/// Remove a trailing `?query` and/or `#fragment`.
#[must_use]
pub fn strip_query(reference: &str) -> &str {
    reference
        .find(['?', '#'])
        .map_or(reference, |pos| &reference[..pos])
}

/// Normalize an attribute value and keep it only if its extension matches
/// the category of the tag it came from.
fn qualify(value: &str, category: AssetCategory) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with("data:") || value.starts_with("javascript:") {
        return None;
    }

    let stripped = strip_query(value);
    let matches = match category {
        AssetCategory::Css => stripped.ends_with(".css"),
        AssetCategory::Js => stripped.ends_with(".js"),
        AssetCategory::Image => stripped.rsplit_once('.').is_some_and(|(_, ext)| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        }),
    };

    matches.then(|| stripped.to_string())
}
