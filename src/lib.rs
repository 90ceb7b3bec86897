//! Transactional indexing store for local file prefix search.
//!
//! This crate is the persistence core of a file-search system: it serializes
//! writes against one SQLite store while allowing unbounded concurrent
//! reads, keeps a durable at-least-once queue of entities that need
//! reprocessing, maintains incrementally updated aggregate counters, and
//! manages a word-to-prefix-part inverted index so a typed prefix resolves
//! to matching files without scanning the vocabulary.
//!
//! The filesystem watcher, the reindexing worker, and the search front-end
//! are external collaborators; they drive the store exclusively through
//! [`IndexStore`] (or compose their own atomic operations from the
//! `catalog`/`updates`/`indexer` building blocks and a [`WriteScope`]).

pub mod catalog;
pub mod config;
pub mod counts;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod query;
pub mod schema;
pub mod store;
pub mod transactions;
pub mod updates;

pub use crate::catalog::{FileRef, FolderFile};
pub use crate::config::{StoreConfig, StoreConnectionConfig};
pub use crate::counts::{CountKind, CountsCache};
pub use crate::error::{StoreError, StoreResult};
pub use crate::logging::{initialize_logging, LoggingConfig};
pub use crate::query::SearchHit;
pub use crate::store::IndexStore;
pub use crate::transactions::{ReadScope, TransactionManager, WriteScope};
pub use crate::updates::{PendingFileUpdate, PendingFolderUpdate, UpdateKind};
