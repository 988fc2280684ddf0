//! View of a finalized-result set restricted to one window size

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{QueryError, QueryResult};
use crate::window::WindowFinalMessage;

use super::entity_set::EntitySet;

/// Rows that carry the size of the window they belong to
pub trait WindowTagged {
    fn window_minutes(&self) -> u32;
}

impl WindowTagged for WindowFinalMessage {
    fn window_minutes(&self) -> u32 {
        self.window_minutes
    }
}

/// Reads only rows of one window size; writes pass through unchanged
pub struct WindowFilteredSet<T> {
    base: Arc<dyn EntitySet<T>>,
    window_minutes: u32,
}

impl<T> WindowFilteredSet<T>
where
    T: WindowTagged + Send + 'static,
{
    pub fn new(base: Arc<dyn EntitySet<T>>, window_minutes: u32) -> QueryResult<Self> {
        if window_minutes == 0 {
            return Err(QueryError::InvalidWindowMinutes {
                minutes: window_minutes,
            });
        }
        Ok(Self {
            base,
            window_minutes,
        })
    }

    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    fn matches(&self, row: &T) -> bool {
        row.window_minutes() == self.window_minutes
    }
}

#[async_trait]
impl<T> EntitySet<T> for WindowFilteredSet<T>
where
    T: WindowTagged + Send + 'static,
{
    fn topic_name(&self) -> &str {
        self.base.topic_name()
    }

    async fn add(&self, entity: T) -> QueryResult<()> {
        self.base.add(entity).await
    }

    async fn to_list(&self) -> QueryResult<Vec<T>> {
        let rows = self.base.to_list().await?;
        Ok(rows.into_iter().filter(|row| self.matches(row)).collect())
    }

    async fn for_each(&self, action: &mut (dyn FnMut(T) + Send)) -> QueryResult<()> {
        let window_minutes = self.window_minutes;
        let mut filtered = |row: T| {
            if row.window_minutes() == window_minutes {
                action(row);
            }
        };
        self.base.for_each(&mut filtered).await
    }
}
