use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{format_timestamp, ArchiveRecord, ArchiveRecordRow, ArchiveStatus, NewArchiveRecord};

// ========== Archive Records ==========

/// Insert a new `pending` record with an empty manifest, returning its ID.
pub async fn insert_record(pool: &SqlitePool, record: &NewArchiveRecord) -> Result<i64> {
    let now = format_timestamp(&record.created_at);
    let result = sqlx::query(
        r#"
        INSERT INTO archive_records
            (source_url, html_path, asset_manifest, status, created_at, updated_at)
        VALUES (?, '', '{"css":[],"js":[],"images":[]}', 'pending', ?, ?)
        "#,
    )
    .bind(&record.source_url)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .context("Failed to insert archive record")?;

    Ok(result.last_insert_rowid())
}

/// Get an active (non-deleted) record by ID.
pub async fn get_record(pool: &SqlitePool, id: i64) -> Result<Option<ArchiveRecordRow>> {
    sqlx::query_as("SELECT * FROM archive_records WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch archive record")
}

/// Get the most recently created active record for a source URL.
pub async fn find_latest_record_by_source_url(
    pool: &SqlitePool,
    source_url: &str,
) -> Result<Option<ArchiveRecordRow>> {
    sqlx::query_as(
        r"
        SELECT * FROM archive_records
        WHERE source_url = ? AND deleted_at IS NULL
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        ",
    )
    .bind(source_url)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch archive record by source URL")
}

/// Overwrite the mutable columns of an active record.
///
/// Returns the number of rows changed; zero means the record does not exist or
/// has been soft-deleted.
pub async fn update_record(pool: &SqlitePool, record: &ArchiveRecord) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE archive_records
        SET html_path = ?,
            asset_manifest = ?,
            status = ?,
            error_detail = ?,
            updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        ",
    )
    .bind(&record.html_path)
    .bind(record.asset_manifest.to_json())
    .bind(record.status.as_str())
    .bind(&record.error_detail)
    .bind(format_timestamp(&record.updated_at))
    .bind(record.id)
    .execute(pool)
    .await
    .context("Failed to update archive record")?;

    Ok(result.rows_affected())
}

/// Soft-delete a record. Returns false if it was missing or already deleted.
pub async fn soft_delete_record(pool: &SqlitePool, id: i64, at: &DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE archive_records
        SET deleted_at = ?, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        ",
    )
    .bind(format_timestamp(at))
    .bind(format_timestamp(at))
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to soft-delete archive record")?;

    Ok(result.rows_affected() > 0)
}

/// List active records, newest first.
pub async fn list_records(pool: &SqlitePool) -> Result<Vec<ArchiveRecordRow>> {
    sqlx::query_as(
        r"
        SELECT * FROM archive_records
        WHERE deleted_at IS NULL
        ORDER BY created_at DESC, id DESC
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list archive records")
}

/// Mark every active record that never finished as failed.
///
/// Used at startup: a `pending` or `in_progress` record belongs to a job that
/// died with the previous process, either before it started or mid-run.
pub async fn fail_unfinished_records(
    pool: &SqlitePool,
    detail: &str,
    at: &DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE archive_records
        SET status = ?, error_detail = ?, updated_at = ?
        WHERE status IN (?, ?) AND deleted_at IS NULL
        ",
    )
    .bind(ArchiveStatus::Failed.as_str())
    .bind(detail)
    .bind(format_timestamp(at))
    .bind(ArchiveStatus::Pending.as_str())
    .bind(ArchiveStatus::InProgress.as_str())
    .execute(pool)
    .await
    .context("Failed to fail interrupted archive records")?;

    Ok(result.rows_affected())
}

/// Count active records grouped by status.
pub async fn count_records_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    sqlx::query_as(
        r"
        SELECT status, COUNT(*) FROM archive_records
        WHERE deleted_at IS NULL
        GROUP BY status
        ORDER BY status
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to count archive records by status")
}
