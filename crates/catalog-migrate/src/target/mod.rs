//! Target catalog operations.
//!
//! The engine only needs create-or-get semantics from the target system:
//! an entity is identified by its `(entity_type, natural_key)` pair, and
//! creating it twice returns the same [`TargetRef`]. That is what makes a
//! crash between entity creation and the tracking update recoverable.

mod db;
mod memory;

pub use db::DbTargetStore;
pub use memory::MemoryTargetStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tracking::TargetRef;

/// Longest natural key the target catalog indexes.
pub const MAX_NATURAL_KEY_LEN: usize = 2048;

/// Intended target entity, built before anything is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    /// Target model, e.g. `file.file`.
    pub entity_type: String,

    /// Domain-defined unique key within `entity_type`.
    pub natural_key: String,

    /// Field values.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl TargetEntity {
    pub fn new(entity_type: impl Into<String>, natural_key: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            natural_key: natural_key.into(),
            fields: Map::new(),
        }
    }

    /// Set a field value.
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Check the constraints every target table enforces.
    ///
    /// Returns a description of the first violation.
    pub fn check_constraints(&self) -> std::result::Result<(), String> {
        if self.entity_type.trim().is_empty() {
            return Err("entity_type is empty".to_string());
        }
        if !self.entity_type.contains('.') {
            return Err(format!(
                "entity_type '{}' is not of the form <plugin>.<model>",
                self.entity_type
            ));
        }
        if self.natural_key.is_empty() {
            return Err("natural_key is empty".to_string());
        }
        if self.natural_key.len() > MAX_NATURAL_KEY_LEN {
            return Err(format!(
                "natural_key is {} bytes (max {})",
                self.natural_key.len(),
                MAX_NATURAL_KEY_LEN
            ));
        }
        if let Some((name, _)) = self.fields.iter().find(|(name, _)| name.is_empty()) {
            return Err(format!("empty field name '{}'", name));
        }
        Ok(())
    }
}

/// Trait for target catalog operations.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create tables/indexes. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Create the entity, or return the reference of the existing entity
    /// with the same `(entity_type, natural_key)`.
    async fn create_or_get(&self, entity: &TargetEntity) -> Result<TargetRef>;

    /// Look up an existing entity.
    async fn find(&self, entity_type: &str, natural_key: &str) -> Result<Option<TargetRef>>;

    /// Validate an entity without persisting it (dry-run).
    async fn validate(&self, entity: &TargetEntity) -> std::result::Result<(), String> {
        entity.check_constraints()
    }

    /// Number of stored entities.
    async fn count(&self) -> Result<u64>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_constraints_accepts_valid() {
        let entity = TargetEntity::new("file.file", "a.iso:sha256:abc").with_field("size", 10);
        assert!(entity.check_constraints().is_ok());
    }

    #[test]
    fn test_check_constraints_rejects_bad_type() {
        let entity = TargetEntity::new("file", "a.iso");
        assert!(entity.check_constraints().is_err());
    }

    #[test]
    fn test_check_constraints_rejects_empty_key() {
        let entity = TargetEntity::new("file.file", "");
        assert_eq!(
            entity.check_constraints().unwrap_err(),
            "natural_key is empty"
        );
    }

    #[test]
    fn test_check_constraints_rejects_long_key() {
        let entity = TargetEntity::new("file.file", "k".repeat(MAX_NATURAL_KEY_LEN + 1));
        assert!(entity.check_constraints().is_err());
    }
}
