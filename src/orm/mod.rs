//! Storage-agnostic persistence for entities.
//!
//! Entities are plain serde structs. A [`Repository`] stores them as documents
//! and answers [`QueryFilter`] queries over their indexed fields. The crate ships
//! [`MemoryRepository`]; hosts plug in their own storage by implementing the
//! trait.

use crate::error::PacklinkResult;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod filter;
pub mod memory;

pub use filter::{Chain, Condition, Direction, Operator, QueryFilter};
pub use memory::MemoryRepository;

/// A persisted record type.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable type name, used as the storage table / collection name
    const TYPE: &'static str;

    /// Storage id, `None` until first saved
    fn id(&self) -> Option<i64>;

    /// Set the storage id after insert
    fn set_id(&mut self, id: i64);

    /// Serialized field names that may appear in filters and ordering
    fn indexes() -> &'static [&'static str];
}

/// CRUD access to one entity type.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// All entities matching the filter
    async fn select(&self, filter: &QueryFilter) -> PacklinkResult<Vec<E>>;

    /// First entity matching the filter
    async fn select_one(&self, filter: &QueryFilter) -> PacklinkResult<Option<E>> {
        let filter = filter.clone().limit(1);
        Ok(self.select(&filter).await?.into_iter().next())
    }

    /// Insert the entity and assign its id
    async fn save(&self, entity: &mut E) -> PacklinkResult<i64>;

    /// Overwrite the stored entity with the same id; `false` if it is gone
    async fn update(&self, entity: &E) -> PacklinkResult<bool>;

    /// Delete the stored entity with the same id; `false` if it is gone
    async fn delete(&self, entity: &E) -> PacklinkResult<bool>;

    /// Delete everything matching the filter and return how many rows went
    async fn delete_where(&self, filter: &QueryFilter) -> PacklinkResult<u64>;

    /// Number of entities matching the filter
    async fn count(&self, filter: &QueryFilter) -> PacklinkResult<u64>;

    /// Entity by id
    async fn find_by_id(&self, id: i64) -> PacklinkResult<Option<E>> {
        self.select_one(&QueryFilter::new().eq("id", id)).await
    }
}
