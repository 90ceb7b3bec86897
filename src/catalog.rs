//! Folder/File Catalog Module
//!
//! Canonical mapping between normalized paths and integer ids, kept
//! consistent under create, delete, and rename. Every mutation here also
//! touches the update queue and adjusts the counters in the same write
//! scope, so the three always change atomically.
//!
//! All operations take the caller's [`WriteScope`]; the caller decides the
//! atomicity boundary and owns commit/rollback. Lookups accept any
//! connection so they compose with read scopes too.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::counts::{CountKind, CountsCache};
use crate::error::{StoreError, StoreResult};
use crate::transactions::WriteScope;
use crate::updates::{self, UpdateKind};

/// A file entry as listed under its folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderFile {
    pub id: i64,
    pub name: String,
}

/// Resolved location of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: i64,
    pub folder_id: i64,
}

/// Normalize a path for storage: forward slashes, no trailing separator.
/// Case is preserved; comparisons are case-insensitive at the schema level.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split a file path into its parent folder path and file name.
pub fn split_file_path(path: &str) -> (String, String) {
    let normalized = normalize_path(path);
    match normalized.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), normalized),
    }
}

/// Join a folder path and file name back into a full path.
pub fn join_path(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{}{}", folder, name)
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Look up a folder id by path. Absence is not an error.
pub async fn folder_id(conn: &mut SqliteConnection, path: &str) -> StoreResult<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM folders WHERE path = ?1")
        .bind(normalize_path(path))
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(id,)| id))
}

/// Look up a folder's stored path by id.
pub async fn folder_path(conn: &mut SqliteConnection, id: i64) -> StoreResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT path FROM folders WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(path,)| path))
}

/// Look up a file id within a folder. Absence is not an error.
pub async fn file_id(
    conn: &mut SqliteConnection,
    folder_id: i64,
    name: &str,
) -> StoreResult<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM files WHERE folder_id = ?1 AND name = ?2")
            .bind(folder_id)
            .bind(name)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(id,)| id))
}

/// Resolve a full file path to its record, without creating anything.
pub async fn lookup_file(
    conn: &mut SqliteConnection,
    path: &str,
) -> StoreResult<Option<FileRef>> {
    let (folder, name) = split_file_path(path);
    let Some(fid) = folder_id(conn, &folder).await? else {
        return Ok(None);
    };
    Ok(file_id(conn, fid, &name).await?.map(|file_id| FileRef {
        file_id,
        folder_id: fid,
    }))
}

/// List the files currently recorded under a folder.
pub async fn files_in_folder(
    conn: &mut SqliteConnection,
    folder_id: i64,
) -> StoreResult<Vec<FolderFile>> {
    let rows = sqlx::query("SELECT id, name FROM files WHERE folder_id = ?1 ORDER BY name")
        .bind(folder_id)
        .fetch_all(conn)
        .await?;

    let mut files = Vec::with_capacity(rows.len());
    for row in rows {
        files.push(FolderFile {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        });
    }
    Ok(files)
}

/// Resolve a folder id by path, inserting the row if absent.
///
/// Insertion queues a `Created` update. Returns the id either way.
pub async fn get_or_create_folder_id(
    scope: &mut WriteScope,
    counts: &CountsCache,
    path: &str,
) -> StoreResult<i64> {
    let path = normalize_path(path);

    if let Some(id) = folder_id(scope.read_conn(), &path).await? {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO folders (path) VALUES (?1) ON CONFLICT (path) DO NOTHING")
        .bind(&path)
        .execute(scope.write_conn().await?)
        .await?;

    if result.rows_affected() == 0 {
        // Unique collision: the row exists after all, re-read the id.
        return folder_id(scope.read_conn(), &path).await?.ok_or_else(|| {
            StoreError::Corrupted(format!("folder insert affected no rows: {}", path))
        });
    }

    let id = result.last_insert_rowid();
    updates::touch_folders(scope, counts, &[id], UpdateKind::Created).await?;
    debug!("Created folder {} (id {})", path, id);
    Ok(id)
}

/// Resolve a file id within a folder, inserting the row if absent.
///
/// Insertion queues a `Created` update and increments the files counter.
pub async fn get_or_create_file_id(
    scope: &mut WriteScope,
    counts: &CountsCache,
    folder_id: i64,
    name: &str,
) -> StoreResult<i64> {
    if let Some(id) = file_id(scope.read_conn(), folder_id, name).await? {
        return Ok(id);
    }

    let result = sqlx::query(
        "INSERT INTO files (folder_id, name) VALUES (?1, ?2) ON CONFLICT (folder_id, name) DO NOTHING",
    )
    .bind(folder_id)
    .bind(name)
    .execute(scope.write_conn().await?)
    .await?;

    if result.rows_affected() == 0 {
        return file_id(scope.read_conn(), folder_id, name)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupted(format!("file insert affected no rows: {}", name))
            });
    }

    let id = result.last_insert_rowid();
    updates::touch_files(scope, counts, &[id], UpdateKind::Created).await?;
    counts.adjust(scope, CountKind::Files, 1).await?;
    debug!("Created file {} in folder {} (id {})", name, folder_id, id);
    Ok(id)
}

/// Delete a file record by id: queue `Deleted`, remove the row, decrement
/// the files counter.
pub async fn delete_file(
    scope: &mut WriteScope,
    counts: &CountsCache,
    file_id: i64,
) -> StoreResult<()> {
    updates::touch_files(scope, counts, &[file_id], UpdateKind::Deleted).await?;

    let result = sqlx::query("DELETE FROM files WHERE id = ?1")
        .bind(file_id)
        .execute(scope.write_conn().await?)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Corrupted(format!(
            "file delete affected no rows: id {}",
            file_id
        )));
    }

    counts.adjust(scope, CountKind::Files, -1).await?;
    debug!("Deleted file id {}", file_id);
    Ok(())
}

/// Delete the file at `path` if it is recorded. Returns the deleted id.
pub async fn delete_file_at(
    scope: &mut WriteScope,
    counts: &CountsCache,
    path: &str,
) -> StoreResult<Option<i64>> {
    let Some(file) = lookup_file(scope.read_conn(), path).await? else {
        return Ok(None);
    };
    delete_file(scope, counts, file.file_id).await?;
    Ok(Some(file.file_id))
}

async fn delete_folder_by_id(
    scope: &mut WriteScope,
    counts: &CountsCache,
    folder_id: i64,
) -> StoreResult<()> {
    let files = files_in_folder(scope.read_conn(), folder_id).await?;

    if !files.is_empty() {
        let file_ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        updates::touch_files(scope, counts, &file_ids, UpdateKind::Deleted).await?;

        let result = sqlx::query("DELETE FROM files WHERE folder_id = ?1")
            .bind(folder_id)
            .execute(scope.write_conn().await?)
            .await?;
        counts
            .adjust(scope, CountKind::Files, -(result.rows_affected() as i64))
            .await?;
    }

    updates::touch_folders(scope, counts, &[folder_id], UpdateKind::Deleted).await?;

    let result = sqlx::query("DELETE FROM folders WHERE id = ?1")
        .bind(folder_id)
        .execute(scope.write_conn().await?)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Corrupted(format!(
            "folder delete affected no rows: id {}",
            folder_id
        )));
    }

    debug!("Deleted folder id {} ({} files)", folder_id, files.len());
    Ok(())
}

/// Cascade-delete the folder at `path` and everything under it. Returns the
/// deleted folder id, or `None` if the path was not recorded.
pub async fn delete_folder(
    scope: &mut WriteScope,
    counts: &CountsCache,
    path: &str,
) -> StoreResult<Option<i64>> {
    let Some(id) = folder_id(scope.read_conn(), path).await? else {
        return Ok(None);
    };
    delete_folder_by_id(scope, counts, id).await?;
    Ok(Some(id))
}

/// Rename a folder with the three-way merge policy:
/// old missing → plain create of new; new missing → in-place path update;
/// same record → no-op; both present → cascade-delete old, keep new.
/// Returns the id now holding `new_path`.
pub async fn rename_folder(
    scope: &mut WriteScope,
    counts: &CountsCache,
    new_path: &str,
    old_path: &str,
) -> StoreResult<i64> {
    let new_path = normalize_path(new_path);

    let Some(old_id) = folder_id(scope.read_conn(), old_path).await? else {
        return get_or_create_folder_id(scope, counts, &new_path).await;
    };

    match folder_id(scope.read_conn(), &new_path).await? {
        None => {
            let result = sqlx::query("UPDATE folders SET path = ?1 WHERE id = ?2")
                .bind(&new_path)
                .bind(old_id)
                .execute(scope.write_conn().await?)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Corrupted(format!(
                    "folder rename affected no rows: id {}",
                    old_id
                )));
            }
            updates::touch_folders(scope, counts, &[old_id], UpdateKind::Changed).await?;
            debug!("Renamed folder id {} to {}", old_id, new_path);
            Ok(old_id)
        }
        Some(new_id) if new_id == old_id => Ok(old_id),
        Some(new_id) => {
            delete_folder_by_id(scope, counts, old_id).await?;
            updates::touch_folders(scope, counts, &[new_id], UpdateKind::Changed).await?;
            debug!(
                "Folder rename merged: id {} deleted, id {} kept at {}",
                old_id, new_id, new_path
            );
            Ok(new_id)
        }
    }
}

/// Rename a file with the same merge policy as [`rename_folder`]. The new
/// parent folder is created if needed. Returns the id now holding
/// `new_path`.
pub async fn rename_file(
    scope: &mut WriteScope,
    counts: &CountsCache,
    new_path: &str,
    old_path: &str,
) -> StoreResult<i64> {
    let (new_folder_path, new_name) = split_file_path(new_path);

    let Some(old) = lookup_file(scope.read_conn(), old_path).await? else {
        let folder_id = get_or_create_folder_id(scope, counts, &new_folder_path).await?;
        return get_or_create_file_id(scope, counts, folder_id, &new_name).await;
    };

    let new_folder_id = get_or_create_folder_id(scope, counts, &new_folder_path).await?;

    match file_id(scope.read_conn(), new_folder_id, &new_name).await? {
        None => {
            let result = sqlx::query("UPDATE files SET folder_id = ?1, name = ?2 WHERE id = ?3")
                .bind(new_folder_id)
                .bind(&new_name)
                .bind(old.file_id)
                .execute(scope.write_conn().await?)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Corrupted(format!(
                    "file rename affected no rows: id {}",
                    old.file_id
                )));
            }
            updates::touch_files(scope, counts, &[old.file_id], UpdateKind::Changed).await?;
            debug!("Renamed file id {} to {}", old.file_id, new_name);
            Ok(old.file_id)
        }
        Some(existing_id) if existing_id == old.file_id => Ok(existing_id),
        Some(existing_id) => {
            delete_file(scope, counts, old.file_id).await?;
            updates::touch_files(scope, counts, &[existing_id], UpdateKind::Changed).await?;
            debug!(
                "File rename merged: id {} deleted, id {} kept at {}",
                old.file_id, existing_id, new_name
            );
            Ok(existing_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("C:\\docs\\notes"), "C:/docs/notes");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_split_file_path() {
        assert_eq!(
            split_file_path("/a/b/x.txt"),
            ("/a/b".to_string(), "x.txt".to_string())
        );
        assert_eq!(
            split_file_path("/x.txt"),
            ("/".to_string(), "x.txt".to_string())
        );
        assert_eq!(
            split_file_path("x.txt"),
            ("/".to_string(), "x.txt".to_string())
        );
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/a/b", "x.txt"), "/a/b/x.txt");
        assert_eq!(join_path("/", "x.txt"), "/x.txt");
    }
}
