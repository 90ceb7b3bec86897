//! Query Engine Module
//!
//! Executes prefix searches against the part index and projects the results
//! to file locations. The typed prefix is truncated to the maximum part
//! length before matching, so overlong queries behave exactly as their
//! truncation would.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::error::StoreResult;

/// One search result tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub word: String,
    pub file_name: String,
    pub folder_path: String,
}

/// Escape LIKE wildcards in user input so a literal `%` or `_` in the
/// prefix matches itself.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Find up to `limit` (word, file, folder) tuples whose word starts with
/// `prefix`. An empty (or all-whitespace) prefix yields no results.
pub async fn search(
    conn: &mut SqliteConnection,
    prefix: &str,
    limit: i64,
    max_part_length: usize,
) -> StoreResult<Vec<SearchHit>> {
    let normalized = prefix.trim().to_lowercase();
    let truncated: String = normalized.chars().take(max_part_length).collect();
    if truncated.is_empty() {
        return Ok(Vec::new());
    }

    let pattern = format!("{}%", escape_like(&truncated));

    let rows = sqlx::query(
        r#"
        SELECT DISTINCT w.text AS word, f.name AS file_name, fo.path AS folder_path
        FROM parts p
        JOIN words_parts wp ON wp.part_id = p.id
        JOIN words w ON w.id = wp.word_id
        JOIN files_words fw ON fw.word_id = w.id
        JOIN files f ON f.id = fw.file_id
        JOIN folders fo ON fo.id = f.folder_id
        WHERE p.text LIKE ?1 ESCAPE '\'
        ORDER BY w.text, fo.path, f.name
        LIMIT ?2
        "#,
    )
    .bind(&pattern)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    let mut hits = Vec::with_capacity(rows.len());
    for row in rows {
        hits.push(SearchHit {
            word: row.try_get("word")?,
            file_name: row.try_get("file_name")?,
            folder_path: row.try_get("folder_path")?,
        });
    }

    debug!("Search '{}' returned {} hit(s)", truncated, hits.len());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("abc"), "abc");
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
