//! Word/Part Indexer Module
//!
//! Maintains the inverted prefix index. Every indexed word is decomposed
//! into its prefix parts (all leading substrings up to the configured
//! maximum part length, character counted) and linked to them through the
//! `words_parts` junction; parts are globally deduplicated. A typed prefix
//! then resolves to candidate words through a single indexed lookup instead
//! of a vocabulary scan.
//!
//! Removal is deliberately lazy: unlinking a file leaves now-orphaned words
//! and parts in place. [`purge_orphans`] is the maintenance pass that
//! reclaims them; stale rows between passes are tolerated.

use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::transactions::WriteScope;

/// Normalize a raw token: trim and lowercase. Returns `None` for tokens
/// that normalize to nothing.
pub fn normalize_word(raw: &str) -> Option<String> {
    let word = raw.trim().to_lowercase();
    if word.is_empty() {
        None
    } else {
        Some(word)
    }
}

/// Deterministic part decomposition: all leading substrings of the word,
/// lengths 1 through `max_part_length` characters.
pub fn word_parts(word: &str, max_part_length: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let max = max_part_length.min(chars.len());
    (1..=max).map(|len| chars[..len].iter().collect()).collect()
}

async fn get_or_create_word_id(
    scope: &mut WriteScope,
    word: &str,
    length: i64,
) -> StoreResult<i64> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM words WHERE text = ?1")
        .bind(word)
        .fetch_optional(scope.read_conn())
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let result = sqlx::query(
        "INSERT INTO words (text, length) VALUES (?1, ?2) ON CONFLICT (text) DO NOTHING",
    )
    .bind(word)
    .bind(length)
    .execute(scope.write_conn().await?)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(result.last_insert_rowid());
    }

    // Unique collision: re-read the id.
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM words WHERE text = ?1")
        .bind(word)
        .fetch_optional(scope.read_conn())
        .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| StoreError::Corrupted(format!("word insert affected no rows: {}", word)))
}

async fn get_or_create_part_id(scope: &mut WriteScope, part: &str) -> StoreResult<i64> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM parts WHERE text = ?1")
        .bind(part)
        .fetch_optional(scope.read_conn())
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO parts (text) VALUES (?1) ON CONFLICT (text) DO NOTHING")
        .bind(part)
        .execute(scope.write_conn().await?)
        .await?;

    if result.rows_affected() > 0 {
        return Ok(result.last_insert_rowid());
    }

    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM parts WHERE text = ?1")
        .bind(part)
        .fetch_optional(scope.read_conn())
        .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| StoreError::Corrupted(format!("part insert affected no rows: {}", part)))
}

/// Attribute a word to a file and reconcile the word's part links.
///
/// The word is normalized first; words longer than `max_word_length`
/// characters are silently dropped (returns `Ok(None)`). Indexing the same
/// (word, file) pair twice is a no-op. Part reconciliation is a true set
/// difference: missing links are inserted, stale links removed, untouched
/// links left alone. The loop observes `cancel` between iterations.
pub async fn index_word(
    scope: &mut WriteScope,
    raw_word: &str,
    file_id: i64,
    max_word_length: usize,
    max_part_length: usize,
    cancel: &CancellationToken,
) -> StoreResult<Option<i64>> {
    let Some(word) = normalize_word(raw_word) else {
        return Ok(None);
    };

    let length = word.chars().count();
    if length > max_word_length {
        debug!("Skipping overlong word ({} chars)", length);
        return Ok(None);
    }

    let word_id = get_or_create_word_id(scope, &word, length as i64).await?;

    sqlx::query(
        "INSERT INTO files_words (word_id, file_id) VALUES (?1, ?2) ON CONFLICT (word_id, file_id) DO NOTHING",
    )
    .bind(word_id)
    .bind(file_id)
    .execute(scope.write_conn().await?)
    .await?;

    // Reconcile words_parts against the freshly computed part set.
    let desired: BTreeSet<String> = word_parts(&word, max_part_length).into_iter().collect();

    let rows = sqlx::query(
        r#"
        SELECT p.id, p.text
        FROM parts p
        JOIN words_parts wp ON wp.part_id = p.id
        WHERE wp.word_id = ?1
        "#,
    )
    .bind(word_id)
    .fetch_all(scope.read_conn())
    .await?;

    let mut current: HashMap<String, i64> = HashMap::with_capacity(rows.len());
    for row in rows {
        current.insert(row.try_get("text")?, row.try_get("id")?);
    }

    for part in desired.iter().filter(|p| !current.contains_key(*p)) {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let part_id = get_or_create_part_id(scope, part).await?;
        sqlx::query(
            "INSERT INTO words_parts (word_id, part_id) VALUES (?1, ?2) ON CONFLICT (word_id, part_id) DO NOTHING",
        )
        .bind(word_id)
        .bind(part_id)
        .execute(scope.write_conn().await?)
        .await?;
    }

    for (part, part_id) in current.iter().filter(|(p, _)| !desired.contains(*p)) {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        sqlx::query("DELETE FROM words_parts WHERE word_id = ?1 AND part_id = ?2")
            .bind(word_id)
            .bind(part_id)
            .execute(scope.write_conn().await?)
            .await?;
        debug!("Dropped stale part link {} for word id {}", part, word_id);
    }

    Ok(Some(word_id))
}

/// Unlink every word from the given file. Orphaned words and parts are left
/// for [`purge_orphans`]. Returns the number of links removed.
pub async fn remove_file_words(scope: &mut WriteScope, file_id: i64) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM files_words WHERE file_id = ?1")
        .bind(file_id)
        .execute(scope.write_conn().await?)
        .await?;

    debug!(
        "Removed {} word link(s) for file id {}",
        result.rows_affected(),
        file_id
    );
    Ok(result.rows_affected())
}

/// Maintenance pass: delete words no file references any more, then parts
/// no word references any more. Returns (words removed, parts removed).
pub async fn purge_orphans(
    scope: &mut WriteScope,
    cancel: &CancellationToken,
) -> StoreResult<(u64, u64)> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    // words_parts rows cascade with their word.
    let words = sqlx::query("DELETE FROM words WHERE id NOT IN (SELECT word_id FROM files_words)")
        .execute(scope.write_conn().await?)
        .await?
        .rows_affected();

    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    let parts = sqlx::query("DELETE FROM parts WHERE id NOT IN (SELECT part_id FROM words_parts)")
        .execute(scope.write_conn().await?)
        .await?
        .rows_affected();

    info!("Purged {} orphaned word(s), {} orphaned part(s)", words, parts);
    Ok((words, parts))
}
