//! Update Queue Module
//!
//! Durable, append-mostly record of "entity X changed with kind Y at time
//! T", consumed by the reindexing worker. Rows are never deduplicated at
//! append time and survive until explicitly acknowledged, giving
//! at-least-once delivery; consumers must tolerate redelivery of the same
//! entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::{self, FolderFile};
use crate::counts::{CountKind, CountsCache};
use crate::error::{StoreError, StoreResult};
use crate::transactions::WriteScope;

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Created,
    Changed,
    Deleted,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Created => "created",
            UpdateKind::Changed => "changed",
            UpdateKind::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "created" => Ok(UpdateKind::Created),
            "changed" => Ok(UpdateKind::Changed),
            "deleted" => Ok(UpdateKind::Deleted),
            _ => Err(StoreError::InvalidUpdateKind(s.to_string())),
        }
    }
}

/// A pending file reprocessing obligation, resolved for the consumer.
/// `path` is `None` when the file no longer exists (deleted entities are
/// reported by id only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFileUpdate {
    pub file_id: i64,
    pub kind: UpdateKind,
    pub queued_at: DateTime<Utc>,
    pub path: Option<String>,
}

/// A pending folder reprocessing obligation. `files` lists the folder's
/// current files, and is empty for `Created` updates (there is nothing to
/// diff against yet) and for deleted folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFolderUpdate {
    pub folder_id: i64,
    pub kind: UpdateKind,
    pub queued_at: DateTime<Utc>,
    pub path: Option<String>,
    pub files: Vec<FolderFile>,
}

/// Append one update row per folder id, stamped with the current time.
pub async fn touch_folders(
    scope: &mut WriteScope,
    counts: &CountsCache,
    folder_ids: &[i64],
    kind: UpdateKind,
) -> StoreResult<()> {
    if folder_ids.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    for id in folder_ids {
        sqlx::query("INSERT INTO folder_updates (folder_id, kind, queued_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(kind.as_str())
            .bind(now)
            .execute(scope.write_conn().await?)
            .await?;
    }

    counts
        .adjust(scope, CountKind::PendingUpdates, folder_ids.len() as i64)
        .await?;
    debug!("Queued {} folder update(s): {}", folder_ids.len(), kind.as_str());
    Ok(())
}

/// Append one update row per file id, stamped with the current time.
pub async fn touch_files(
    scope: &mut WriteScope,
    counts: &CountsCache,
    file_ids: &[i64],
    kind: UpdateKind,
) -> StoreResult<()> {
    if file_ids.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    for id in file_ids {
        sqlx::query("INSERT INTO file_updates (file_id, kind, queued_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(kind.as_str())
            .bind(now)
            .execute(scope.write_conn().await?)
            .await?;
    }

    counts
        .adjust(scope, CountKind::PendingUpdates, file_ids.len() as i64)
        .await?;
    debug!("Queued {} file update(s): {}", file_ids.len(), kind.as_str());
    Ok(())
}

/// Acknowledge folder updates: delete every queued row for these folder
/// ids. Returns the number of rows removed.
pub async fn mark_folders_processed(
    scope: &mut WriteScope,
    counts: &CountsCache,
    folder_ids: &[i64],
) -> StoreResult<u64> {
    if folder_ids.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; folder_ids.len()].join(", ");
    let query = format!("DELETE FROM folder_updates WHERE folder_id IN ({})", placeholders);

    let mut query_builder = sqlx::query(&query);
    for id in folder_ids {
        query_builder = query_builder.bind(id);
    }

    let result = query_builder.execute(scope.write_conn().await?).await?;
    let removed = result.rows_affected();

    counts
        .adjust(scope, CountKind::PendingUpdates, -(removed as i64))
        .await?;
    debug!("Acknowledged {} folder update row(s)", removed);
    Ok(removed)
}

/// Acknowledge file updates: delete every queued row for these file ids.
/// Returns the number of rows removed.
pub async fn mark_files_processed(
    scope: &mut WriteScope,
    counts: &CountsCache,
    file_ids: &[i64],
) -> StoreResult<u64> {
    if file_ids.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; file_ids.len()].join(", ");
    let query = format!("DELETE FROM file_updates WHERE file_id IN ({})", placeholders);

    let mut query_builder = sqlx::query(&query);
    for id in file_ids {
        query_builder = query_builder.bind(id);
    }

    let result = query_builder.execute(scope.write_conn().await?).await?;
    let removed = result.rows_affected();

    counts
        .adjust(scope, CountKind::PendingUpdates, -(removed as i64))
        .await?;
    debug!("Acknowledged {} file update row(s)", removed);
    Ok(removed)
}

/// Fetch up to `limit` pending file updates, most recently queued first,
/// each resolved to its current full path where the file still exists.
/// The drain observes `cancel` between rows.
pub async fn pending_file_updates(
    conn: &mut SqliteConnection,
    limit: i64,
    cancel: &CancellationToken,
) -> StoreResult<Vec<PendingFileUpdate>> {
    let rows = sqlx::query(
        r#"
        SELECT u.file_id, u.kind, u.queued_at, f.name AS file_name, fo.path AS folder_path
        FROM file_updates u
        LEFT JOIN files f ON f.id = u.file_id
        LEFT JOIN folders fo ON fo.id = f.folder_id
        ORDER BY u.queued_at DESC, u.id DESC
        LIMIT ?1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut pending = Vec::with_capacity(rows.len());
    for row in rows {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let kind_str: String = row.try_get("kind")?;
        let name: Option<String> = row.try_get("file_name")?;
        let folder: Option<String> = row.try_get("folder_path")?;

        pending.push(PendingFileUpdate {
            file_id: row.try_get("file_id")?,
            kind: UpdateKind::parse(&kind_str)?,
            queued_at: row.try_get("queued_at")?,
            path: match (folder, name) {
                (Some(folder), Some(name)) => Some(catalog::join_path(&folder, &name)),
                _ => None,
            },
        });
    }

    debug!("Fetched {} pending file update(s)", pending.len());
    Ok(pending)
}

/// Fetch up to `limit` pending folder updates, most recently queued first.
/// Each is resolved to its current path and file listing; `Created` updates
/// carry an empty file list. The drain observes `cancel` between rows.
pub async fn pending_folder_updates(
    conn: &mut SqliteConnection,
    limit: i64,
    cancel: &CancellationToken,
) -> StoreResult<Vec<PendingFolderUpdate>> {
    let rows = sqlx::query(
        r#"
        SELECT u.folder_id, u.kind, u.queued_at, fo.path AS folder_path
        FROM folder_updates u
        LEFT JOIN folders fo ON fo.id = u.folder_id
        ORDER BY u.queued_at DESC, u.id DESC
        LIMIT ?1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut pending = Vec::with_capacity(rows.len());
    for row in rows {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let kind_str: String = row.try_get("kind")?;
        let kind = UpdateKind::parse(&kind_str)?;
        let folder_id: i64 = row.try_get("folder_id")?;
        let path: Option<String> = row.try_get("folder_path")?;

        let files = if kind == UpdateKind::Created || path.is_none() {
            Vec::new()
        } else {
            catalog::files_in_folder(&mut *conn, folder_id).await?
        };

        pending.push(PendingFolderUpdate {
            folder_id,
            kind,
            queued_at: row.try_get("queued_at")?,
            path,
            files,
        });
    }

    debug!("Fetched {} pending folder update(s)", pending.len());
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_update_serializes_for_consumers() {
        let update = PendingFileUpdate {
            file_id: 7,
            kind: UpdateKind::Changed,
            queued_at: Utc::now(),
            path: Some("/data/report.txt".to_string()),
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["kind"], "changed");
        assert_eq!(json["path"], "/data/report.txt");

        let back: PendingFileUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(back.file_id, 7);
        assert_eq!(back.kind, UpdateKind::Changed);
    }

    #[test]
    fn test_update_kind_round_trip() {
        for kind in [UpdateKind::Created, UpdateKind::Changed, UpdateKind::Deleted] {
            assert_eq!(UpdateKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(matches!(
            UpdateKind::parse("renamed"),
            Err(StoreError::InvalidUpdateKind(_))
        ));
    }
}
