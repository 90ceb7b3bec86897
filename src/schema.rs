//! Schema Definitions
//!
//! DDL for the indexing store tables, executed at startup. All statements are
//! `IF NOT EXISTS` so initialization is idempotent across restarts.
//!
//! Constraints the rest of the crate relies on:
//! - `folders.path` and `(files.folder_id, files.name)` are unique,
//!   case-insensitive (`COLLATE NOCASE`).
//! - `words.text` and `parts.text` are unique; the unique index on
//!   `parts.text` doubles as the prefix-lookup index.
//! - Junction tables carry unique pair constraints and cascade with their
//!   referenced rows, so dangling junction rows cannot survive a delete.
//! - Update tables deliberately carry no foreign keys: rows for deleted
//!   entities must remain reportable until acknowledged.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::StoreResult;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL,
        name TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (folder_id, name),
        FOREIGN KEY (folder_id) REFERENCES folders (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS folder_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        queued_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        queued_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS counts (
        kind TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS words (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text TEXT NOT NULL,
        length INTEGER NOT NULL,
        UNIQUE (text)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text TEXT NOT NULL,
        UNIQUE (text)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS words_parts (
        word_id INTEGER NOT NULL,
        part_id INTEGER NOT NULL,
        UNIQUE (word_id, part_id),
        FOREIGN KEY (word_id) REFERENCES words (id) ON DELETE CASCADE,
        FOREIGN KEY (part_id) REFERENCES parts (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files_words (
        word_id INTEGER NOT NULL,
        file_id INTEGER NOT NULL,
        UNIQUE (word_id, file_id),
        FOREIGN KEY (word_id) REFERENCES words (id) ON DELETE CASCADE,
        FOREIGN KEY (file_id) REFERENCES files (id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_files_folder ON files (folder_id)",
    "CREATE INDEX IF NOT EXISTS idx_folder_updates_folder ON folder_updates (folder_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_updates_file ON file_updates (file_id)",
    "CREATE INDEX IF NOT EXISTS idx_folder_updates_queued ON folder_updates (queued_at)",
    "CREATE INDEX IF NOT EXISTS idx_file_updates_queued ON file_updates (queued_at)",
    "CREATE INDEX IF NOT EXISTS idx_files_words_file ON files_words (file_id)",
    "CREATE INDEX IF NOT EXISTS idx_words_parts_part ON words_parts (part_id)",
];

/// Create all store tables and indexes if they do not exist yet.
pub async fn initialize_schema(pool: &SqlitePool) -> StoreResult<()> {
    info!("Initializing indexing store schema");

    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }

    debug!("Schema initialization complete ({} statements)", DDL.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConnectionConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test_schema.db");

        let config = StoreConnectionConfig::with_database_path(&db_path);
        let pool = config.create_pool().await.unwrap();

        initialize_schema(&pool).await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'folders'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_unique_folder_path_case_insensitive() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test_schema_unique.db");

        let config = StoreConnectionConfig::with_database_path(&db_path);
        let pool = config.create_pool().await.unwrap();
        initialize_schema(&pool).await.unwrap();

        sqlx::query("INSERT INTO folders (path) VALUES (?1)")
            .bind("/Home/Docs")
            .execute(&pool)
            .await
            .unwrap();

        let result = sqlx::query("INSERT INTO folders (path) VALUES (?1)")
            .bind("/home/docs")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
