//! Window sizes of a topic bound to query handles

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;

use crate::error::{QueryError, QueryResult};
use crate::window::WindowConfiguration;

use super::entity_set::EntitySet;
use super::windowed::WindowedEntitySet;

/// One [`WindowedEntitySet`] per configured window size, created on demand
pub struct WindowCollection<T> {
    base: Arc<dyn EntitySet<T>>,
    sizes: Vec<u32>,
    windows: DashMap<u32, Arc<WindowedEntitySet<T>>>,
}

impl<T> WindowCollection<T>
where
    T: Send + 'static,
{
    /// Bind `sizes` (de-duplicated and sorted) to `base`
    pub fn new(
        base: Arc<dyn EntitySet<T>>,
        sizes: impl IntoIterator<Item = u32>,
    ) -> QueryResult<Self> {
        let mut sizes: Vec<u32> = sizes.into_iter().collect();
        if sizes.contains(&0) {
            return Err(QueryError::InvalidWindowMinutes { minutes: 0 });
        }
        sizes.sort_unstable();
        sizes.dedup();

        Ok(Self {
            base,
            sizes,
            windows: DashMap::new(),
        })
    }

    /// Bind the window sizes of a tracker configuration
    pub fn for_configuration<U>(
        base: Arc<dyn EntitySet<T>>,
        config: &WindowConfiguration<U>,
    ) -> QueryResult<Self> {
        Self::new(base, config.windows().iter().copied())
    }

    /// Configured sizes, ascending
    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Handle for one configured window size
    pub fn window(&self, window_minutes: u32) -> QueryResult<Arc<WindowedEntitySet<T>>> {
        if !self.sizes.contains(&window_minutes) {
            return Err(QueryError::UnsupportedWindowSize {
                requested: window_minutes,
                available: self
                    .sizes
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let handle = self
            .windows
            .entry(window_minutes)
            .or_insert_with(|| {
                Arc::new(WindowedEntitySet::new(
                    Arc::clone(&self.base),
                    window_minutes,
                ))
            })
            .clone();
        Ok(handle)
    }

    /// Read every window size concurrently
    pub async fn get_all_windows(&self) -> QueryResult<BTreeMap<u32, Vec<T>>> {
        let handles = self
            .sizes
            .iter()
            .map(|&size| self.window(size).map(|handle| (size, handle)))
            .collect::<QueryResult<Vec<_>>>()?;

        let loads = handles.into_iter().map(|(size, handle)| async move {
            let rows = handle.to_list().await?;
            Ok::<_, QueryError>((size, rows))
        });

        Ok(try_join_all(loads).await?.into_iter().collect())
    }
}
