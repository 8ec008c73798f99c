use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Lifecycle status of an archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl ArchiveStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// `Failed -> InProgress` is the explicit retry edge; nothing else leaves a
    /// terminal status.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Complete | Self::Failed)
                | (Self::Failed, Self::InProgress)
        )
    }
}

/// Kind of asset referenced by an archived page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Css,
    Js,
    Image,
}

impl AssetCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Js => "js",
            Self::Image => "image",
        }
    }

    /// Directory name under `assets/`, also the manifest key.
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Js => "js",
            Self::Image => "images",
        }
    }

    /// Classify a reference by its file extension.
    ///
    /// Case-sensitive on `.css` and `.js`; everything else is an image.
    #[must_use]
    pub fn from_reference(reference: &str) -> Self {
        if reference.ends_with(".css") {
            Self::Css
        } else if reference.ends_with(".js") {
            Self::Js
        } else {
            Self::Image
        }
    }
}

/// Local paths of the assets stored for one archive, per category.
///
/// Always serialized with all three keys, even when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub css: Vec<String>,
    #[serde(default)]
    pub js: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl AssetManifest {
    pub fn push(&mut self, category: AssetCategory, path: String) {
        match category {
            AssetCategory::Css => self.css.push(path),
            AssetCategory::Js => self.js.push(path),
            AssetCategory::Image => self.images.push(path),
        }
    }

    #[must_use]
    pub fn paths(&self, category: AssetCategory) -> &[String] {
        match category {
            AssetCategory::Css => &self.css,
            AssetCategory::Js => &self.js,
            AssetCategory::Image => &self.images,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.css.len() + self.js.len() + self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize for the `asset_manifest` column.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Three string vectors cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"css":[],"js":[],"images":[]}"#.into())
    }

    /// Parse the `asset_manifest` column. Missing keys become empty lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object of string lists.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }
}

/// Soft-delete state of a record at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted { at: DateTime<Utc> },
}

/// Raw row of the `archive_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchiveRecordRow {
    pub id: i64,
    pub source_url: String,
    pub html_path: String,
    pub asset_manifest: String,
    pub status: String,
    pub error_detail: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// One archive job and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub source_url: String,
    pub html_path: String,
    pub asset_manifest: AssetManifest,
    pub status: ArchiveStatus,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: RecordState,
}

impl ArchiveRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == RecordState::Active
    }

    fn transition(&mut self, next: ArchiveStatus) -> Result<(), ArchiveError> {
        if !self.status.can_transition_to(next) {
            return Err(ArchiveError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move a freshly created record into `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the record is `pending`.
    pub fn mark_in_progress(&mut self) -> Result<(), ArchiveError> {
        if self.status != ArchiveStatus::Pending {
            return Err(ArchiveError::InvalidTransition {
                from: self.status,
                to: ArchiveStatus::InProgress,
            });
        }
        self.transition(ArchiveStatus::InProgress)
    }

    /// Reopen a failed record for another attempt, clearing prior output.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the record is `failed`.
    pub fn begin_retry(&mut self) -> Result<(), ArchiveError> {
        if self.status != ArchiveStatus::Failed {
            return Err(ArchiveError::InvalidTransition {
                from: self.status,
                to: ArchiveStatus::InProgress,
            });
        }
        self.transition(ArchiveStatus::InProgress)?;
        self.error_detail = None;
        self.html_path.clear();
        self.asset_manifest = AssetManifest::default();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the record is `in_progress`.
    pub fn mark_complete(
        &mut self,
        html_path: String,
        manifest: AssetManifest,
    ) -> Result<(), ArchiveError> {
        self.transition(ArchiveStatus::Complete)?;
        self.html_path = html_path;
        self.asset_manifest = manifest;
        self.error_detail = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the record is `in_progress`.
    pub fn mark_failed(&mut self, detail: impl Into<String>) -> Result<(), ArchiveError> {
        self.transition(ArchiveStatus::Failed)?;
        self.error_detail = Some(detail.into());
        Ok(())
    }
}

impl TryFrom<ArchiveRecordRow> for ArchiveRecord {
    type Error = anyhow::Error;

    fn try_from(row: ArchiveRecordRow) -> Result<Self, Self::Error> {
        let status = ArchiveStatus::from_str(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown status '{}' on record {}", row.status, row.id))?;
        let asset_manifest = AssetManifest::from_json(&row.asset_manifest)
            .map_err(|e| anyhow::anyhow!("malformed asset manifest on record {}: {e}", row.id))?;
        let state = match row.deleted_at.as_deref() {
            Some(at) => RecordState::Deleted {
                at: parse_timestamp(at)?,
            },
            None => RecordState::Active,
        };

        Ok(Self {
            id: row.id,
            source_url: row.source_url,
            html_path: row.html_path,
            asset_manifest,
            status,
            error_detail: row.error_detail,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            state,
        })
    }
}

/// Data for inserting a new record. Always starts `pending` with an empty manifest.
#[derive(Debug, Clone)]
pub struct NewArchiveRecord {
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

impl NewArchiveRecord {
    #[must_use]
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            created_at: Utc::now(),
        }
    }
}

/// Format a timestamp for storage. Fixed width so text ordering is time ordering.
#[must_use]
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{value}': {e}"))
}
