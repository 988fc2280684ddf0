//! State backend trait definition
//!
//! The finalized window store persists its records through this byte-oriented
//! key-value interface, so any durable store can sit behind it.

use async_trait::async_trait;

use crate::error::StateResult;

/// Core trait for key-value state backends
///
/// Keys and values are byte slices; callers own the encoding. Implementations
/// must be safe to share between tasks and make each individual operation
/// atomic.
///
/// ## Example Implementation
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use windowing::state::StateBackend;
/// use windowing::StateResult;
/// use std::collections::BTreeMap;
/// use tokio::sync::RwLock;
///
/// struct SimpleBackend {
///     data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
/// }
///
/// #[async_trait]
/// impl StateBackend for SimpleBackend {
///     async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
///         Ok(self.data.read().await.get(key).cloned())
///     }
///
///     async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
///         self.data.write().await.insert(key.to_vec(), value.to_vec());
///         Ok(())
///     }
///
///     async fn delete(&self, key: &[u8]) -> StateResult<()> {
///         self.data.write().await.remove(key);
///         Ok(())
///     }
///
///     async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
///         Ok(self.data.read().await
///             .keys()
///             .filter(|k| k.starts_with(prefix))
///             .cloned()
///             .collect())
///     }
/// }
/// ```
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Retrieve the value stored under `key`
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any previous one
    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key: &[u8]) -> StateResult<()>;

    /// List all keys with the given prefix. Empty prefix matches all keys.
    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>>;

    /// All key/value pairs whose key starts with `prefix`
    ///
    /// Entries deleted between listing and reading are skipped.
    async fn scan(&self, prefix: &[u8]) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let keys = self.list_keys(prefix).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Persist buffered writes
    async fn flush(&self) -> StateResult<()> {
        Ok(())
    }

    /// Clear all state from the backend
    ///
    /// This is primarily used for testing and cleanup. Use with caution.
    async fn clear(&self) -> StateResult<()> {
        let keys = self.list_keys(b"").await?;
        for key in keys {
            self.delete(&key).await?;
        }
        Ok(())
    }

    /// Number of keys in the backend; may be expensive
    async fn count(&self) -> StateResult<usize> {
        Ok(self.list_keys(b"").await?.len())
    }

    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
