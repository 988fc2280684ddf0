//! Entity source and statement executor seams
//!
//! [`EntitySet`] is the raw, unwindowed source of entities for a topic;
//! [`StatementExecutor`] runs generated statements against the streaming
//! query engine.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::QueryResult;

/// Raw entity source bound to one topic
#[async_trait]
pub trait EntitySet<T>: Send + Sync {
    /// Topic the entities are read from and written to
    fn topic_name(&self) -> &str;

    /// Produce an entity to the topic
    async fn add(&self, entity: T) -> QueryResult<()>;

    /// Read all currently available entities
    async fn to_list(&self) -> QueryResult<Vec<T>>;

    /// Apply `action` to every currently available entity
    async fn for_each(&self, action: &mut (dyn FnMut(T) + Send)) -> QueryResult<()>;
}

/// Executes statements against the streaming query engine
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Run a DDL statement such as CREATE TABLE AS SELECT
    async fn execute(&self, statement: &str) -> QueryResult<()>;

    /// Run a pull query and return its rows as JSON objects
    async fn pull(&self, query: &str) -> QueryResult<Vec<serde_json::Value>>;
}

/// In-memory entity set, for tests and local wiring
#[derive(Debug)]
pub struct MemoryEntitySet<T> {
    topic: String,
    entities: RwLock<Vec<T>>,
}

impl<T> MemoryEntitySet<T> {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            entities: RwLock::new(Vec::new()),
        }
    }

    /// Create a set pre-populated with `entities`
    pub fn with_entities(topic: impl Into<String>, entities: Vec<T>) -> Self {
        Self {
            topic: topic.into(),
            entities: RwLock::new(entities),
        }
    }
}

#[async_trait]
impl<T> EntitySet<T> for MemoryEntitySet<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn topic_name(&self) -> &str {
        &self.topic
    }

    async fn add(&self, entity: T) -> QueryResult<()> {
        trace!(topic = %self.topic, "Adding entity");
        self.entities.write().await.push(entity);
        Ok(())
    }

    async fn to_list(&self) -> QueryResult<Vec<T>> {
        Ok(self.entities.read().await.clone())
    }

    async fn for_each(&self, action: &mut (dyn FnMut(T) + Send)) -> QueryResult<()> {
        for entity in self.entities.read().await.iter() {
            action(entity.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_entity_set() {
        let set = MemoryEntitySet::new("orders");
        set.add(1u32).await.unwrap();
        set.add(2u32).await.unwrap();

        assert_eq!(set.topic_name(), "orders");
        assert_eq!(set.to_list().await.unwrap(), vec![1, 2]);

        let mut seen = Vec::new();
        set.for_each(&mut |n| seen.push(n)).await.unwrap();
        assert_eq!(seen, vec![1, 2]);
    }
}
