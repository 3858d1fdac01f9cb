//! In-memory repository.
//!
//! Stores entities as JSON documents keyed by an auto-incremented id. Useful for
//! tests, demos and single-process hosts where persistence across restarts is
//! not required.

use super::{Entity, QueryFilter, Repository};
use crate::error::{PacklinkError, PacklinkResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// Document store used by [`MemoryRepository`].
pub(crate) type Documents = BTreeMap<i64, Value>;

/// In-memory repository for one entity type.
#[derive(Debug)]
pub struct MemoryRepository<E> {
    documents: RwLock<Documents>,
    next_id: AtomicI64,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryRepository<E> {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            _entity: PhantomData,
        }
    }

    /// Raw document access for specialised repositories in this crate.
    pub(crate) fn documents(&self) -> &RwLock<Documents> {
        &self.documents
    }

    pub(crate) fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize `entity` into a document, with `id` filled in.
    pub(crate) fn to_document(entity: &E) -> PacklinkResult<Value> {
        let document = serde_json::to_value(entity)?;
        if !document.is_object() {
            return Err(PacklinkError::storage(format!(
                "entity '{}' must serialize to a JSON object",
                E::TYPE
            )));
        }
        Ok(document)
    }

    /// Matching documents, ordered and windowed as the filter asks.
    pub(crate) fn query(documents: &Documents, filter: &QueryFilter) -> PacklinkResult<Vec<Value>> {
        filter.validate(E::indexes())?;

        let mut matched: Vec<(&i64, &Value)> = documents
            .iter()
            .filter(|(_, document)| filter.matches(document))
            .collect();

        // Stable sort keeps id order between equal keys.
        matched.sort_by(|(_, left), (_, right)| filter.compare_documents(left, right));

        let (offset, limit) = filter.window();
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, document)| document.clone())
            .collect())
    }

    /// Number of stored documents, regardless of filters.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

impl<E: Entity> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryRepository<E> {
    async fn select(&self, filter: &QueryFilter) -> PacklinkResult<Vec<E>> {
        let documents = self.documents.read().await;
        Self::query(&documents, filter)?
            .into_iter()
            .map(|document| serde_json::from_value(document).map_err(PacklinkError::from))
            .collect()
    }

    async fn save(&self, entity: &mut E) -> PacklinkResult<i64> {
        let id = self.allocate_id();
        entity.set_id(id);
        let document = Self::to_document(entity)?;

        self.documents.write().await.insert(id, document);
        tracing::trace!("Saved {} #{}", E::TYPE, id);
        Ok(id)
    }

    async fn update(&self, entity: &E) -> PacklinkResult<bool> {
        let id = entity.id().ok_or_else(|| {
            PacklinkError::storage(format!("cannot update unsaved {}", E::TYPE))
        })?;
        let document = Self::to_document(entity)?;

        let mut documents = self.documents.write().await;
        match documents.get_mut(&id) {
            Some(stored) => {
                *stored = document;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, entity: &E) -> PacklinkResult<bool> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        Ok(self.documents.write().await.remove(&id).is_some())
    }

    async fn delete_where(&self, filter: &QueryFilter) -> PacklinkResult<u64> {
        let mut documents = self.documents.write().await;
        let doomed: Vec<i64> = Self::query(&documents, filter)?
            .iter()
            .filter_map(|document| document.get("id").and_then(Value::as_i64))
            .collect();

        for id in &doomed {
            documents.remove(id);
        }

        if !doomed.is_empty() {
            tracing::debug!("Deleted {} {} rows", doomed.len(), E::TYPE);
        }
        Ok(doomed.len() as u64)
    }

    async fn count(&self, filter: &QueryFilter) -> PacklinkResult<u64> {
        let documents = self.documents.read().await;
        Ok(Self::query(&documents, filter)?.len() as u64)
    }
}
