//! Index Store Facade
//!
//! [`IndexStore`] owns the connection pool, the transaction manager, and
//! the counts cache, and exposes the store's three consumer surfaces:
//! filesystem notifications, the reindexing queue, and prefix search.
//! Every notification wraps one write scope, so "insert file" + "queue
//! update" + "bump counter" land atomically or not at all.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog;
use crate::config::StoreConfig;
use crate::counts::{CountKind, CountsCache};
use crate::error::StoreResult;
use crate::indexer;
use crate::query::{self, SearchHit};
use crate::schema;
use crate::transactions::{TransactionManager, WriteScope};
use crate::updates::{self, PendingFileUpdate, PendingFolderUpdate, UpdateKind};

/// The transactional indexing store.
pub struct IndexStore {
    transactions: TransactionManager,
    counts: Arc<CountsCache>,
    config: StoreConfig,
    cancel: CancellationToken,
}

impl IndexStore {
    /// Open (creating if necessary) the store at the configured database
    /// path: builds the pool, initializes the schema, and seeds the counts
    /// cache.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        let pool = config.connection.create_pool().await?;
        schema::initialize_schema(&pool).await?;

        let counts = Arc::new(CountsCache::new());
        let transactions = TransactionManager::new(pool, counts.clone());
        let cancel = CancellationToken::new();

        let mut scope = transactions.begin_write(&cancel).await?;
        counts.initialize(&mut scope).await?;
        scope.commit().await?;

        info!(
            "Indexing store ready: {} file(s), {} pending update(s)",
            counts.get(CountKind::Files)?,
            counts.get(CountKind::PendingUpdates)?
        );

        Ok(Self {
            transactions,
            counts,
            config,
            cancel,
        })
    }

    /// Transaction manager, for callers composing larger atomic operations
    /// from the `catalog`/`updates`/`indexer` building blocks.
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Counts cache handle.
    pub fn counts(&self) -> &CountsCache {
        &self.counts
    }

    /// Signal cancellation to in-flight and future operations.
    pub fn shutdown(&self) {
        info!("Indexing store shutting down");
        self.cancel.cancel();
    }

    /// Token observed by this store's suspend points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of files currently indexed.
    pub fn files_count(&self) -> StoreResult<i64> {
        self.counts.get(CountKind::Files)
    }

    /// Number of unacknowledged update rows.
    pub fn pending_updates_count(&self) -> StoreResult<i64> {
        self.counts.get(CountKind::PendingUpdates)
    }

    /// Commit on success, roll back and log on failure.
    async fn finish<T>(scope: WriteScope, result: StoreResult<T>, op: &str) -> StoreResult<T> {
        match result {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(e) => {
                error!("{} failed, rolling back: {}", op, e);
                if let Err(rollback_err) = scope.rollback().await {
                    error!("Rollback after {} failed: {}", op, rollback_err);
                }
                Err(e)
            }
        }
    }

    // --- Filesystem watcher surface -------------------------------------

    /// A file appeared. Records the file (and its folder if new), queues
    /// `Created`. Returns the file id.
    pub async fn notify_file_created(&self, path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = async {
            let (folder, name) = catalog::split_file_path(path);
            let folder_id =
                catalog::get_or_create_folder_id(&mut scope, &self.counts, &folder).await?;
            catalog::get_or_create_file_id(&mut scope, &self.counts, folder_id, &name).await
        }
        .await;
        Self::finish(scope, result, "notify_file_created").await
    }

    /// A file's content changed. Queues `Changed`; an unknown path is
    /// recorded as a creation instead (the debouncer may fold a create and
    /// a change into one event).
    pub async fn notify_file_changed(&self, path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = async {
            match catalog::lookup_file(scope.read_conn(), path).await? {
                Some(file) => {
                    updates::touch_files(
                        &mut scope,
                        &self.counts,
                        &[file.file_id],
                        UpdateKind::Changed,
                    )
                    .await?;
                    Ok(file.file_id)
                }
                None => {
                    let (folder, name) = catalog::split_file_path(path);
                    let folder_id =
                        catalog::get_or_create_folder_id(&mut scope, &self.counts, &folder).await?;
                    catalog::get_or_create_file_id(&mut scope, &self.counts, folder_id, &name).await
                }
            }
        }
        .await;
        Self::finish(scope, result, "notify_file_changed").await
    }

    /// A file disappeared. Returns the deleted id, or `None` if the path
    /// was never recorded.
    pub async fn notify_file_deleted(&self, path: &str) -> StoreResult<Option<i64>> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = catalog::delete_file_at(&mut scope, &self.counts, path).await;
        Self::finish(scope, result, "notify_file_deleted").await
    }

    /// A file moved. Applies the three-way rename merge and returns the id
    /// now holding `new_path`.
    pub async fn notify_file_renamed(&self, new_path: &str, old_path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = catalog::rename_file(&mut scope, &self.counts, new_path, old_path).await;
        Self::finish(scope, result, "notify_file_renamed").await
    }

    /// A folder appeared. Returns its id.
    pub async fn notify_folder_created(&self, path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = catalog::get_or_create_folder_id(&mut scope, &self.counts, path).await;
        Self::finish(scope, result, "notify_folder_created").await
    }

    /// A folder changed. Queues `Changed`, creating the record first if the
    /// path is unknown.
    pub async fn notify_folder_changed(&self, path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = async {
            match catalog::folder_id(scope.read_conn(), path).await? {
                Some(id) => {
                    updates::touch_folders(&mut scope, &self.counts, &[id], UpdateKind::Changed)
                        .await?;
                    Ok(id)
                }
                None => catalog::get_or_create_folder_id(&mut scope, &self.counts, path).await,
            }
        }
        .await;
        Self::finish(scope, result, "notify_folder_changed").await
    }

    /// A folder disappeared: cascade-deletes its files. Returns the deleted
    /// folder id, or `None` if unrecorded.
    pub async fn notify_folder_deleted(&self, path: &str) -> StoreResult<Option<i64>> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = catalog::delete_folder(&mut scope, &self.counts, path).await;
        Self::finish(scope, result, "notify_folder_deleted").await
    }

    /// A folder moved. Applies the three-way rename merge and returns the
    /// id now holding `new_path`.
    pub async fn notify_folder_renamed(&self, new_path: &str, old_path: &str) -> StoreResult<i64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = catalog::rename_folder(&mut scope, &self.counts, new_path, old_path).await;
        Self::finish(scope, result, "notify_folder_renamed").await
    }

    // --- Reindexing consumer surface ------------------------------------

    /// Up to `limit` pending folder updates, newest first. Aborts with
    /// `StoreError::Cancelled` if the store is shut down mid-drain.
    pub async fn pending_folder_updates(
        &self,
        limit: i64,
    ) -> StoreResult<Vec<PendingFolderUpdate>> {
        let mut scope = self.transactions.begin_read().await?;
        updates::pending_folder_updates(scope.conn(), limit, &self.cancel).await
    }

    /// Up to `limit` pending file updates, newest first. Aborts with
    /// `StoreError::Cancelled` if the store is shut down mid-drain.
    pub async fn pending_file_updates(&self, limit: i64) -> StoreResult<Vec<PendingFileUpdate>> {
        let mut scope = self.transactions.begin_read().await?;
        updates::pending_file_updates(scope.conn(), limit, &self.cancel).await
    }

    /// Acknowledge all queued updates for these folder ids.
    pub async fn mark_folders_processed(&self, folder_ids: &[i64]) -> StoreResult<u64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = updates::mark_folders_processed(&mut scope, &self.counts, folder_ids).await;
        Self::finish(scope, result, "mark_folders_processed").await
    }

    /// Acknowledge all queued updates for these file ids.
    pub async fn mark_files_processed(&self, file_ids: &[i64]) -> StoreResult<u64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = updates::mark_files_processed(&mut scope, &self.counts, file_ids).await;
        Self::finish(scope, result, "mark_files_processed").await
    }

    /// Attribute a word to a file in the prefix index. Returns the word id,
    /// or `None` when the word was dropped (empty or overlong).
    pub async fn index_word(&self, word: &str, file_id: i64) -> StoreResult<Option<i64>> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = indexer::index_word(
            &mut scope,
            word,
            file_id,
            self.config.max_word_length,
            self.config.max_part_length,
            &self.cancel,
        )
        .await;
        Self::finish(scope, result, "index_word").await
    }

    /// Unlink all words from a file (on delete or before reparsing).
    pub async fn remove_file_words(&self, file_id: i64) -> StoreResult<u64> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = indexer::remove_file_words(&mut scope, file_id).await;
        Self::finish(scope, result, "remove_file_words").await
    }

    /// Maintenance: reclaim words and parts no file references any more.
    pub async fn purge_orphans(&self) -> StoreResult<(u64, u64)> {
        let mut scope = self.transactions.begin_write(&self.cancel).await?;
        let result = indexer::purge_orphans(&mut scope, &self.cancel).await;
        Self::finish(scope, result, "purge_orphans").await
    }

    // --- Search consumer surface ----------------------------------------

    /// Prefix search, propagating storage faults to the caller.
    pub async fn try_search(&self, prefix: &str, limit: i64) -> StoreResult<Vec<SearchHit>> {
        let mut scope = self.transactions.begin_read().await?;
        query::search(scope.conn(), prefix, limit, self.config.max_part_length).await
    }

    /// Prefix search for the front-end: a failure is logged and surfaced as
    /// an empty result set, never a partial one.
    pub async fn search(&self, prefix: &str, limit: i64) -> Vec<SearchHit> {
        match self.try_search(prefix, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("Search for '{}' failed: {}", prefix, e);
                Vec::new()
            }
        }
    }
}
