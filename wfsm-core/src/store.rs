//! Storage seam consumed by the engine.
//!
//! The engine needs four operations from a record store: a due-time scan,
//! load by id, save and delete. Save and delete are idempotent and keyed by
//! `(kind, id)`.

use crate::entity::Entity;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by an [`EntityStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record {kind}/{entity_id}: {reason}")]
    Corrupt {
        kind: String,
        entity_id: String,
        reason: String,
    },

    #[error("{0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Returns whether retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Record store holding workflow entities.
pub trait EntityStore: Send + Sync {
    /// All entities of `kind` whose `next_transition_at` lies in `(0, now]`.
    fn find_due(&self, kind: &str, now: i64) -> Result<Vec<Entity>, StoreError>;

    /// Loads one entity.
    fn load(&self, kind: &str, id: &str) -> Result<Option<Entity>, StoreError>;

    /// Inserts or replaces an entity.
    fn save(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Removes an entity. Deleting a missing entity is not an error.
    fn delete(&self, entity: &Entity) -> Result<(), StoreError>;
}

/// In-memory store, suitable for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<(String, String), Entity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Returns clones of all stored entities of `kind`.
    pub fn all(&self, kind: &str) -> Vec<Entity> {
        self.entities
            .read()
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl EntityStore for MemoryStore {
    fn find_due(&self, kind: &str, now: i64) -> Result<Vec<Entity>, StoreError> {
        let mut due: Vec<Entity> = self
            .entities
            .read()
            .values()
            .filter(|e| e.kind == kind && e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_transition_at);
        Ok(due)
    }

    fn load(&self, kind: &str, id: &str) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .entities
            .read()
            .get(&(kind.to_string(), id.to_string()))
            .cloned())
    }

    fn save(&self, entity: &Entity) -> Result<(), StoreError> {
        self.entities
            .write()
            .insert((entity.kind.clone(), entity.id.clone()), entity.clone());
        Ok(())
    }

    fn delete(&self, entity: &Entity) -> Result<(), StoreError> {
        self.entities
            .write()
            .remove(&(entity.kind.clone(), entity.id.clone()));
        Ok(())
    }
}
