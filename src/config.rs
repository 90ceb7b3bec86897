// Store Configuration Module
//
// Provides SQLite connection configuration for the indexing store with WAL
// mode and connection pooling, plus the tuning knobs for word decomposition.

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct StoreConnectionConfig {
    /// Database file path
    pub database_path: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,

    /// Minimum number of idle connections
    pub min_connections: u32,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Busy timeout (time to wait when database is locked)
    pub busy_timeout: Duration,

    /// WAL checkpoint interval (in number of pages)
    pub wal_autocheckpoint: i32,

    /// Cache size (in pages, negative for KB)
    pub cache_size: i32,

    /// Memory-mapped I/O size (in bytes)
    pub mmap_size: i64,

    /// Synchronous mode
    pub synchronous: SqliteSynchronous,

    /// Whether to create database if it doesn't exist
    pub create_if_missing: bool,
}

impl Default for StoreConnectionConfig {
    fn default() -> Self {
        // Sized for a local index: one writer at a time plus a handful of
        // concurrent readers, database usually well under a gigabyte.
        Self {
            database_path: "findex.db".to_string(),
            max_connections: 8,
            min_connections: 1,
            connection_timeout: Duration::from_secs(15),
            busy_timeout: Duration::from_secs(10),
            wal_autocheckpoint: 512,
            cache_size: -16384, // 16MB
            mmap_size: 67108864, // 64MB
            synchronous: SqliteSynchronous::Normal,
            create_if_missing: true,
        }
    }
}

impl StoreConnectionConfig {
    /// Create configuration with custom database path
    pub fn with_database_path<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::default();
        config.database_path = path.as_ref().to_string_lossy().to_string();
        config
    }

    /// Build SQLite connection options from configuration
    pub fn build_connection_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.database_path)
            // WAL mode so readers are never blocked by the writer
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL is safe with WAL
            .synchronous(self.synchronous)
            .foreign_keys(true)
            .create_if_missing(self.create_if_missing)
            .busy_timeout(self.busy_timeout)
            .pragma("cache_size", self.cache_size.to_string())
            .pragma("mmap_size", self.mmap_size.to_string())
            .pragma("temp_store", "memory")
            .pragma("wal_autocheckpoint", self.wal_autocheckpoint.to_string())
            .optimize_on_close(true, None)
    }

    /// Create connection pool with this configuration
    pub async fn create_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        info!("Creating SQLite connection pool: {}", self.database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connection_timeout)
            .idle_timeout(Some(Duration::from_secs(300)))
            .test_before_acquire(true)
            .connect_with(self.build_connection_options())
            .await?;

        debug!(
            "Connection pool created with {} max connections",
            self.max_connections
        );

        Ok(pool)
    }
}

/// Top-level store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite connection settings
    pub connection: StoreConnectionConfig,

    /// Words longer than this (in characters) are excluded from indexing
    pub max_word_length: usize,

    /// Maximum length (in characters) of a prefix part; search input is
    /// truncated to this length before matching
    pub max_part_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection: StoreConnectionConfig::default(),
            max_word_length: 64,
            max_part_length: 8,
        }
    }
}

impl StoreConfig {
    /// Create configuration with custom database path
    pub fn with_database_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            connection: StoreConnectionConfig::with_database_path(path),
            ..Self::default()
        }
    }
}
