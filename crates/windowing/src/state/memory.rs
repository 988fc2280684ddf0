//! In-memory state backend implementation
//!
//! A `DashMap`-backed store for tests and deployments where finalized
//! results do not need to survive a restart.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::StateBackend;
use crate::error::StateResult;

/// Statistics about the memory state backend
#[derive(Debug, Clone, Default)]
pub struct MemoryBackendStats {
    /// Number of get operations
    pub get_count: u64,
    /// Number of put operations
    pub put_count: u64,
    /// Number of delete operations
    pub delete_count: u64,
    /// Number of gets that found a value
    pub hit_count: u64,
    /// Number of gets that found nothing
    pub miss_count: u64,
}

/// In-memory state backend using DashMap
///
/// Clones share the same underlying map.
///
/// ## Example
///
/// ```rust,no_run
/// use windowing::state::{MemoryStateBackend, StateBackend};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let backend = MemoryStateBackend::new();
///
///     backend.put(b"window_final:all_202403011000_5min", b"{}").await?;
///
///     if let Some(data) = backend.get(b"window_final:all_202403011000_5min").await? {
///         println!("Record: {:?}", data);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct MemoryStateBackend {
    data: Arc<DashMap<Vec<u8>, Vec<u8>>>,
    stats: Arc<RwLock<MemoryBackendStats>>,
}

impl MemoryStateBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current statistics
    pub fn stats(&self) -> MemoryBackendStats {
        self.stats.read().clone()
    }

    /// Approximate memory usage of keys and values in bytes
    pub fn memory_usage(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        trace!("Getting key: {:?}", String::from_utf8_lossy(key));

        let result = self.data.get(key).map(|entry| entry.value().clone());

        let mut stats = self.stats.write();
        stats.get_count += 1;
        if result.is_some() {
            stats.hit_count += 1;
        } else {
            stats.miss_count += 1;
        }

        Ok(result)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
        trace!(
            "Putting key: {:?}, value size: {} bytes",
            String::from_utf8_lossy(key),
            value.len()
        );

        self.data.insert(key.to_vec(), value.to_vec());
        self.stats.write().put_count += 1;

        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StateResult<()> {
        trace!("Deleting key: {:?}", String::from_utf8_lossy(key));

        self.data.remove(key);
        self.stats.write().delete_count += 1;

        Ok(())
    }

    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn scan(&self, prefix: &[u8]) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn clear(&self) -> StateResult<()> {
        debug!("Clearing all state");
        self.data.clear();
        Ok(())
    }

    async fn count(&self) -> StateResult<usize> {
        Ok(self.data.len())
    }

    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        Ok(self.data.contains_key(key))
    }
}
