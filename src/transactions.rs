//! Transaction Manager Module
//!
//! Enforces the store's single-writer/multi-reader protocol. Any number of
//! [`ReadScope`]s may be outstanding at once; at most one [`WriteScope`]
//! exists system-wide, serialized through an async write slot rather than an
//! OS lock. A write scope opens its underlying `BEGIN IMMEDIATE` transaction
//! lazily on the first write statement, so pure reads inside a write scope
//! pay no transaction overhead.
//!
//! Scopes are affine values: `commit` and `rollback` consume them, which
//! makes double-commit and cross-manager misuse unrepresentable.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::counts::{CountKind, CountsCache};
use crate::error::{StoreError, StoreResult};

/// Coordinates read and write scopes over one SQLite pool.
pub struct TransactionManager {
    pool: SqlitePool,
    write_slot: Arc<Mutex<()>>,
    counts: Arc<CountsCache>,
}

impl TransactionManager {
    /// Create a manager over an existing pool and counts cache.
    pub fn new(pool: SqlitePool, counts: Arc<CountsCache>) -> Self {
        Self {
            pool,
            write_slot: Arc::new(Mutex::new(())),
            counts,
        }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open an independent read scope.
    ///
    /// Readers never contend with the writer (WAL mode); concurrency is
    /// bounded only by pool capacity.
    pub async fn begin_read(&self) -> StoreResult<ReadScope> {
        let conn = self.pool.acquire().await?;
        Ok(ReadScope { conn })
    }

    /// Acquire the write slot and open a write scope.
    ///
    /// Suspends until the slot frees. If `cancel` fires first, returns
    /// [`StoreError::Cancelled`] without acquiring the slot.
    pub async fn begin_write(&self, cancel: &CancellationToken) -> StoreResult<WriteScope> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let slot = tokio::select! {
            guard = self.write_slot.clone().lock_owned() => guard,
            _ = cancel.cancelled() => {
                debug!("Write slot wait cancelled");
                return Err(StoreError::Cancelled);
            }
        };

        let conn = self.pool.acquire().await?;

        Ok(WriteScope {
            conn: Some(conn),
            _slot: slot,
            counts: self.counts.clone(),
            pending_deltas: Vec::new(),
            begun: false,
        })
    }
}

/// A read-only unit of work. Observes the last committed state.
pub struct ReadScope {
    conn: PoolConnection<Sqlite>,
}

impl ReadScope {
    /// Connection for read statements.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

/// The single outstanding write unit of work.
///
/// Holds the system-wide write slot until committed, rolled back, or
/// dropped. Dropping a scope with an open transaction rolls it back.
pub struct WriteScope {
    // Always `Some` until commit/rollback consume the scope.
    conn: Option<PoolConnection<Sqlite>>,
    _slot: OwnedMutexGuard<()>,
    counts: Arc<CountsCache>,
    pending_deltas: Vec<(CountKind, i64)>,
    begun: bool,
}

impl WriteScope {
    /// Connection for read statements. Does not open the transaction; after
    /// the first write it is the transaction connection, so reads observe
    /// uncommitted writes made in this scope.
    pub fn read_conn(&mut self) -> &mut SqliteConnection {
        self.conn.as_mut().expect("write scope already finished")
    }

    /// Connection for write statements. Opens `BEGIN IMMEDIATE` on first use.
    pub async fn write_conn(&mut self) -> StoreResult<&mut SqliteConnection> {
        if !self.begun {
            let conn = self.conn.as_mut().expect("write scope already finished");
            sqlx::query("BEGIN IMMEDIATE").execute(&mut **conn).await?;
            self.begun = true;
            debug!("Write transaction opened");
        }
        Ok(self.conn.as_mut().expect("write scope already finished"))
    }

    /// Whether the underlying transaction has been opened.
    pub fn in_transaction(&self) -> bool {
        self.begun
    }

    /// Record an in-memory counter delta to apply if this scope commits.
    pub(crate) fn stage_count_delta(&mut self, kind: CountKind, delta: i64) {
        if delta != 0 {
            self.pending_deltas.push((kind, delta));
        }
    }

    /// Make all buffered writes durable and release the write slot.
    ///
    /// Staged counter deltas reach the in-memory cache only here, so a
    /// scope that never commits leaves the cache untouched.
    pub async fn commit(mut self) -> StoreResult<()> {
        if self.begun {
            let conn = self.conn.as_mut().expect("write scope already finished");
            sqlx::query("COMMIT").execute(&mut **conn).await?;
            self.begun = false;
            self.counts.apply_deltas(&self.pending_deltas);
            debug!("Write transaction committed");
        }
        Ok(())
    }

    /// Discard all buffered writes and release the write slot.
    pub async fn rollback(mut self) -> StoreResult<()> {
        if self.begun {
            let conn = self.conn.as_mut().expect("write scope already finished");
            sqlx::query("ROLLBACK").execute(&mut **conn).await?;
            self.begun = false;
            debug!("Write transaction rolled back");
        }
        Ok(())
    }
}

impl Drop for WriteScope {
    fn drop(&mut self) {
        if !self.begun {
            return;
        }
        // Abandoned mid-transaction. The connection must not return to the
        // pool with the transaction open, so roll back on a runtime task.
        if let Some(mut conn) = self.conn.take() {
            warn!("Write scope dropped with an open transaction; rolling back");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                            error!("Failed to roll back abandoned write scope: {}", e);
                        }
                    });
                }
                Err(_) => {
                    // No runtime to roll back on. Detach the connection from
                    // the pool so it is closed instead of handed, still in
                    // the transaction, to the next acquirer.
                    error!("Write scope dropped outside a runtime; closing its connection");
                    drop(conn.detach());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConnectionConfig;
    use crate::schema;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_manager(db_name: &str) -> (tempfile::TempDir, TransactionManager) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join(db_name);
        let config = StoreConnectionConfig::with_database_path(&db_path);
        let pool = config.create_pool().await.unwrap();
        schema::initialize_schema(&pool).await.unwrap();
        let counts = Arc::new(CountsCache::new());
        (temp_dir, TransactionManager::new(pool, counts))
    }

    #[tokio::test]
    async fn test_second_writer_waits_for_first() {
        let (_tmp, manager) = test_manager("writers.db").await;
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();

        let first = manager.begin_write(&cancel).await.unwrap();

        let manager2 = manager.clone();
        let cancel2 = cancel.clone();
        let second = tokio::spawn(async move {
            let scope = manager2.begin_write(&cancel2).await.unwrap();
            scope.commit().await.unwrap();
        });

        // The second writer cannot make progress while the first holds the slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_readers_not_blocked_by_writer() {
        let (_tmp, manager) = test_manager("readers.db").await;
        let cancel = CancellationToken::new();

        let mut write = manager.begin_write(&cancel).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('/pending')")
            .execute(write.write_conn().await.unwrap())
            .await
            .unwrap();

        // Reader proceeds while the write transaction is open, and does not
        // see its uncommitted row.
        let mut read = manager.begin_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folders")
            .fetch_one(read.conn())
            .await
            .unwrap();
        assert_eq!(count, 0);

        write.commit().await.unwrap();

        let mut read = manager.begin_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folders")
            .fetch_one(read.conn())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_cancelled() {
        let (_tmp, manager) = test_manager("cancel.db").await;
        let cancel = CancellationToken::new();

        let held = manager.begin_write(&cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let waiter_cancel2 = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter_cancel2.cancel();
        });

        let result = manager.begin_write(&waiter_cancel).await;
        assert!(matches!(result, Err(StoreError::Cancelled)));

        held.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (_tmp, manager) = test_manager("rollback.db").await;
        let cancel = CancellationToken::new();

        let mut scope = manager.begin_write(&cancel).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('/doomed')")
            .execute(scope.write_conn().await.unwrap())
            .await
            .unwrap();
        scope.rollback().await.unwrap();

        let mut read = manager.begin_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folders")
            .fetch_one(read.conn())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_drop_outside_runtime_does_not_poison_pool() {
        let (_tmp, manager) = test_manager("drop_offloop.db").await;
        let cancel = CancellationToken::new();

        let mut scope = manager.begin_write(&cancel).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('/abandoned')")
            .execute(scope.write_conn().await.unwrap())
            .await
            .unwrap();

        // Dropped on a plain thread, where no rollback task can be spawned.
        std::thread::spawn(move || drop(scope)).join().unwrap();

        // The next writer must get a clean connection, not one still inside
        // the abandoned transaction.
        let mut scope = manager.begin_write(&cancel).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('/next')")
            .execute(scope.write_conn().await.unwrap())
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut read = manager.begin_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folders")
            .fetch_one(read.conn())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_pure_reads_never_open_transaction() {
        let (_tmp, manager) = test_manager("lazy.db").await;
        let cancel = CancellationToken::new();

        let mut scope = manager.begin_write(&cancel).await.unwrap();
        let (_,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folders")
            .fetch_one(scope.read_conn())
            .await
            .unwrap();
        assert!(!scope.in_transaction());
        scope.commit().await.unwrap();
    }
}
