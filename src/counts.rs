//! Counts Cache Module
//!
//! In-memory mirror of the durable aggregate counters. Initialized once per
//! process from the stored rows (or a real `COUNT(*)` on first run); after
//! that, every mutation adjusts the durable row and stages an in-memory
//! delta on the owning write scope. The staged delta lands in the cache only
//! when the scope commits, so a rolled-back scope leaves both the table and
//! the cache untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::transactions::WriteScope;

/// Counter discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountKind {
    /// Unacknowledged folder + file update rows
    PendingUpdates,
    /// Rows in the files table
    Files,
}

impl CountKind {
    pub const ALL: [CountKind; 2] = [CountKind::PendingUpdates, CountKind::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            CountKind::PendingUpdates => "pending_updates",
            CountKind::Files => "files",
        }
    }
}

/// Process-wide counter cache, owned by the store instance.
pub struct CountsCache {
    values: Mutex<Option<HashMap<CountKind, i64>>>,
}

impl CountsCache {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(None),
        }
    }

    /// Whether `initialize` has completed.
    pub fn is_initialized(&self) -> bool {
        self.values
            .lock()
            .expect("counts cache lock poisoned")
            .is_some()
    }

    /// Load counters from the store, computing and persisting the real
    /// `COUNT(*)` for any counter seen for the first time. Runs under the
    /// caller's write scope; calling again is a no-op.
    pub async fn initialize(&self, scope: &mut WriteScope) -> StoreResult<()> {
        if self.is_initialized() {
            debug!("Counts cache already initialized");
            return Ok(());
        }

        let mut values = HashMap::new();

        for kind in CountKind::ALL {
            let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM counts WHERE kind = ?1")
                .bind(kind.as_str())
                .fetch_optional(scope.read_conn())
                .await?;

            let value = match row {
                Some((value,)) => value,
                None => {
                    let value = Self::real_count(scope, kind).await?;
                    sqlx::query("INSERT INTO counts (kind, value) VALUES (?1, ?2)")
                        .bind(kind.as_str())
                        .bind(value)
                        .execute(scope.write_conn().await?)
                        .await?;
                    debug!("Seeded counter {} = {}", kind.as_str(), value);
                    value
                }
            };

            values.insert(kind, value);
        }

        info!(
            "Counts cache initialized: files={}, pending_updates={}",
            values[&CountKind::Files],
            values[&CountKind::PendingUpdates]
        );

        *self.values.lock().expect("counts cache lock poisoned") = Some(values);
        Ok(())
    }

    async fn real_count(scope: &mut WriteScope, kind: CountKind) -> StoreResult<i64> {
        let query = match kind {
            CountKind::Files => "SELECT COUNT(*) FROM files",
            CountKind::PendingUpdates => {
                "SELECT (SELECT COUNT(*) FROM folder_updates) + (SELECT COUNT(*) FROM file_updates)"
            }
        };
        let (count,): (i64,) = sqlx::query_as(query).fetch_one(scope.read_conn()).await?;
        Ok(count)
    }

    /// Apply a signed delta to a counter inside the given scope.
    ///
    /// The durable row changes within the scope's transaction; the in-memory
    /// mirror is advanced when (and only when) the scope commits.
    pub async fn adjust(
        &self,
        scope: &mut WriteScope,
        kind: CountKind,
        delta: i64,
    ) -> StoreResult<()> {
        if delta == 0 {
            return Ok(());
        }
        if !self.is_initialized() {
            return Err(StoreError::CountsNotInitialized);
        }

        let result = sqlx::query("UPDATE counts SET value = value + ?1 WHERE kind = ?2")
            .bind(delta)
            .bind(kind.as_str())
            .execute(scope.write_conn().await?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupted(format!(
                "missing counts row for {}",
                kind.as_str()
            )));
        }

        scope.stage_count_delta(kind, delta);
        Ok(())
    }

    /// Current cached value. Fails fast before initialization.
    pub fn get(&self, kind: CountKind) -> StoreResult<i64> {
        let guard = self.values.lock().expect("counts cache lock poisoned");
        let values = guard.as_ref().ok_or(StoreError::CountsNotInitialized)?;
        values.get(&kind).copied().ok_or_else(|| {
            StoreError::Corrupted(format!("counter {} missing from cache", kind.as_str()))
        })
    }

    pub(crate) fn apply_deltas(&self, deltas: &[(CountKind, i64)]) {
        if deltas.is_empty() {
            return;
        }
        let mut guard = self.values.lock().expect("counts cache lock poisoned");
        if let Some(values) = guard.as_mut() {
            for (kind, delta) in deltas {
                *values.entry(*kind).or_insert(0) += delta;
            }
        }
    }
}

impl Default for CountsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConnectionConfig;
    use crate::schema;
    use crate::transactions::TransactionManager;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    async fn setup(db_name: &str) -> (tempfile::TempDir, TransactionManager, Arc<CountsCache>) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join(db_name);
        let config = StoreConnectionConfig::with_database_path(&db_path);
        let pool = config.create_pool().await.unwrap();
        schema::initialize_schema(&pool).await.unwrap();
        let counts = Arc::new(CountsCache::new());
        let manager = TransactionManager::new(pool, counts.clone());
        (temp_dir, manager, counts)
    }

    #[tokio::test]
    async fn test_read_before_initialize_fails() {
        let (_tmp, _manager, counts) = setup("uninit.db").await;
        assert!(matches!(
            counts.get(CountKind::Files),
            Err(StoreError::CountsNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_initialize_seeds_real_counts() {
        let (_tmp, manager, counts) = setup("seed.db").await;
        let cancel = CancellationToken::new();

        // Pre-existing rows the cache must pick up.
        let mut scope = manager.begin_write(&cancel).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('/a')")
            .execute(scope.write_conn().await.unwrap())
            .await
            .unwrap();
        sqlx::query("INSERT INTO files (folder_id, name) VALUES (1, 'x.txt')")
            .execute(scope.write_conn().await.unwrap())
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = manager.begin_write(&cancel).await.unwrap();
        counts.initialize(&mut scope).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(counts.get(CountKind::Files).unwrap(), 1);
        assert_eq!(counts.get(CountKind::PendingUpdates).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_adjust_applies_on_commit_only() {
        let (_tmp, manager, counts) = setup("adjust.db").await;
        let cancel = CancellationToken::new();

        let mut scope = manager.begin_write(&cancel).await.unwrap();
        counts.initialize(&mut scope).await.unwrap();
        scope.commit().await.unwrap();

        // Rolled back: neither the row nor the cache moves.
        let mut scope = manager.begin_write(&cancel).await.unwrap();
        counts.adjust(&mut scope, CountKind::Files, 3).await.unwrap();
        scope.rollback().await.unwrap();
        assert_eq!(counts.get(CountKind::Files).unwrap(), 0);

        // Committed: both move together.
        let mut scope = manager.begin_write(&cancel).await.unwrap();
        counts.adjust(&mut scope, CountKind::Files, 3).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(counts.get(CountKind::Files).unwrap(), 3);

        let mut read = manager.begin_read().await.unwrap();
        let (stored,): (i64,) = sqlx::query_as("SELECT value FROM counts WHERE kind = 'files'")
            .fetch_one(read.conn())
            .await
            .unwrap();
        assert_eq!(stored, 3);
    }
}
