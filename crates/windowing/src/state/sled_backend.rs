//! Sled-based persistent state backend
//!
//! Keeps finalized window records on local disk so they survive restarts.
//! Sled calls are blocking and run under `block_in_place`, which requires the
//! multi-threaded tokio runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::Db;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use super::backend::StateBackend;
use crate::error::{StateError, StateResult};

const BACKEND_TYPE: &str = "sled";

fn storage_error(details: String) -> StateError {
    StateError::StorageError {
        backend_type: BACKEND_TYPE.to_string(),
        details,
    }
}

/// Configuration for the Sled backend
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Path to the database directory
    pub path: PathBuf,
    /// Cache size in bytes (default: 64MB)
    pub cache_capacity: u64,
    /// Flush every N write operations (default: 100)
    pub flush_every: u64,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/windows"),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every: 100,
        }
    }
}

impl SledConfig {
    /// Create a new configuration with the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_flush_every(mut self, count: u64) -> Self {
        self.flush_every = count;
        self
    }
}

/// Sled-based persistent state backend
///
/// ## Example
///
/// ```rust,no_run
/// use windowing::state::{SledConfig, SledStateBackend, StateBackend};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = SledConfig::new("/var/lib/windowing/finalized")
///         .with_cache_capacity(128 * 1024 * 1024);
///
///     let backend = SledStateBackend::open(config).await?;
///     backend.put(b"window_final:all_202403011000_5min", b"{}").await?;
///     backend.flush().await?;
///
///     Ok(())
/// }
/// ```
pub struct SledStateBackend {
    db: Arc<Db>,
    config: SledConfig,
    /// Write operations since the last flush
    op_counter: Mutex<u64>,
}

impl SledStateBackend {
    /// Open (or create) a Sled database with the given configuration
    pub async fn open(config: SledConfig) -> StateResult<Self> {
        info!("Opening Sled database at {:?}", config.path);

        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .open()
            .map_err(|e| storage_error(format!("Failed to open database: {}", e)))?;

        info!("Sled database opened successfully, {} keys", db.len());

        Ok(Self {
            db: Arc::new(db),
            config,
            op_counter: Mutex::new(0),
        })
    }

    /// Path of the database directory
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush all pending writes to disk, returning the bytes flushed
    pub fn flush_sync(&self) -> StateResult<usize> {
        trace!("Flushing Sled database");

        let flushed = tokio::task::block_in_place(|| {
            self.db
                .flush()
                .map_err(|e| storage_error(format!("Flush failed: {}", e)))
        })?;

        debug!("Flushed {} bytes to disk", flushed);
        Ok(flushed)
    }

    /// Check if automatic flush is needed and perform it
    fn maybe_flush(&self) -> StateResult<()> {
        let due = {
            let mut counter = self.op_counter.lock();
            *counter += 1;
            if *counter >= self.config.flush_every {
                *counter = 0;
                true
            } else {
                false
            }
        };

        if due {
            self.flush_sync()?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for SledStateBackend {
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        trace!("Getting key from Sled: {:?}", String::from_utf8_lossy(key));

        let value = tokio::task::block_in_place(|| {
            self.db
                .get(key)
                .map_err(|e| storage_error(format!("Get failed: {}", e)))
        })?;

        Ok(value.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
        trace!(
            "Putting key to Sled: {:?}, value size: {} bytes",
            String::from_utf8_lossy(key),
            value.len()
        );

        tokio::task::block_in_place(|| {
            self.db
                .insert(key, value)
                .map_err(|e| storage_error(format!("Put failed: {}", e)))
        })?;

        self.maybe_flush()
    }

    async fn delete(&self, key: &[u8]) -> StateResult<()> {
        trace!("Deleting key from Sled: {:?}", String::from_utf8_lossy(key));

        tokio::task::block_in_place(|| {
            self.db
                .remove(key)
                .map_err(|e| storage_error(format!("Delete failed: {}", e)))
        })?;

        self.maybe_flush()
    }

    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
        trace!("Listing keys with prefix: {:?}", String::from_utf8_lossy(prefix));

        tokio::task::block_in_place(|| {
            self.db
                .scan_prefix(prefix)
                .keys()
                .map(|result| {
                    result
                        .map(|k| k.to_vec())
                        .map_err(|e| storage_error(format!("Prefix scan failed: {}", e)))
                })
                .collect::<StateResult<Vec<_>>>()
        })
    }

    async fn scan(&self, prefix: &[u8]) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        tokio::task::block_in_place(|| {
            self.db
                .scan_prefix(prefix)
                .map(|result| {
                    result
                        .map(|(k, v)| (k.to_vec(), v.to_vec()))
                        .map_err(|e| storage_error(format!("Prefix scan failed: {}", e)))
                })
                .collect::<StateResult<Vec<_>>>()
        })
    }

    async fn flush(&self) -> StateResult<()> {
        self.flush_sync().map(|_| ())
    }

    async fn clear(&self) -> StateResult<()> {
        debug!("Clearing Sled database");

        tokio::task::block_in_place(|| {
            self.db
                .clear()
                .map_err(|e| storage_error(format!("Clear failed: {}", e)))
        })?;

        self.flush_sync().map(|_| ())
    }

    async fn count(&self) -> StateResult<usize> {
        Ok(self.db.len())
    }

    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        tokio::task::block_in_place(|| {
            self.db
                .contains_key(key)
                .map_err(|e| storage_error(format!("Contains failed: {}", e)))
        })
    }
}

impl Drop for SledStateBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush Sled database on drop: {}", e);
        }
    }
}
