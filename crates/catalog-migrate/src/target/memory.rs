//! In-memory target catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{TargetEntity, TargetStore};
use crate::error::{MigrateError, Result};
use crate::tracking::TargetRef;

#[derive(Debug, Clone)]
struct StoredEntity {
    target_ref: TargetRef,
    entity: TargetEntity,
}

/// Target catalog held in process memory.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    entities: RwLock<HashMap<(String, String), StoredEntity>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored entity by reference.
    pub async fn get(&self, target_ref: TargetRef) -> Option<TargetEntity> {
        self.entities
            .read()
            .await
            .values()
            .find(|stored| stored.target_ref == target_ref)
            .map(|stored| stored.entity.clone())
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn create_or_get(&self, entity: &TargetEntity) -> Result<TargetRef> {
        entity
            .check_constraints()
            .map_err(|msg| MigrateError::target_creation(&entity.natural_key, msg))?;

        let mut entities = self.entities.write().await;
        let stored = entities
            .entry((entity.entity_type.clone(), entity.natural_key.clone()))
            .or_insert_with(|| StoredEntity {
                target_ref: TargetRef::new(),
                entity: entity.clone(),
            });
        Ok(stored.target_ref)
    }

    async fn find(&self, entity_type: &str, natural_key: &str) -> Result<Option<TargetRef>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(entity_type.to_string(), natural_key.to_string()))
            .map(|stored| stored.target_ref))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entities.read().await.len() as u64)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let store = MemoryTargetStore::new();
        let entity = TargetEntity::new("file.file", "a.iso:abc");

        let first = store.create_or_get(&entity).await.unwrap();
        let second = store.create_or_get(&entity).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(first).await.unwrap(), entity);
    }

    #[tokio::test]
    async fn test_same_key_different_type_is_distinct() {
        let store = MemoryTargetStore::new();
        let a = store
            .create_or_get(&TargetEntity::new("file.file", "k"))
            .await
            .unwrap();
        let b = store
            .create_or_get(&TargetEntity::new("file.remote", "k"))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(store.find("file.remote", "k").await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_invalid_entity_is_not_stored() {
        let store = MemoryTargetStore::new();
        let err = store
            .create_or_get(&TargetEntity::new("file.file", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::TargetCreationFailed { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
