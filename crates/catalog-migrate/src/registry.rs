//! Registry of domain migrators.
//!
//! The [`MigratorRegistry`] is built once at startup and handed to the
//! coordinator behind an `Arc`, so it cannot change while a run is using it.
//!
//! ```rust,ignore
//! let mut registry = MigratorRegistry::new();
//! registry.register(IsoMigrator::new())?;
//!
//! let coordinator = RunCoordinator::new(Arc::new(registry), stores, config);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{MigrateError, Result};
use crate::migrator::Migrator;
use crate::plugins::{DockerMigrator, IsoMigrator};
use crate::source::SourceProbe;

/// Domain name -> migrator.
#[derive(Default)]
pub struct MigratorRegistry {
    migrators: BTreeMap<String, Arc<dyn Migrator>>,
}

impl MigratorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the bundled `iso` and `docker` domains.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(IsoMigrator::new()));
        registry.insert(Arc::new(DockerMigrator::new()));
        registry
    }

    /// Register a migrator. A domain may only be registered once.
    pub fn register(&mut self, migrator: impl Migrator + 'static) -> Result<()> {
        self.register_arc(Arc::new(migrator))
    }

    pub fn register_arc(&mut self, migrator: Arc<dyn Migrator>) -> Result<()> {
        if self.migrators.contains_key(migrator.domain_name()) {
            return Err(MigrateError::Config(format!(
                "domain '{}' is already registered",
                migrator.domain_name()
            )));
        }
        self.insert(migrator);
        Ok(())
    }

    fn insert(&mut self, migrator: Arc<dyn Migrator>) {
        self.migrators
            .insert(migrator.domain_name().to_string(), migrator);
    }

    /// Get a migrator by domain name.
    pub fn get(&self, domain: &str) -> Option<Arc<dyn Migrator>> {
        self.migrators.get(domain).cloned()
    }

    /// Get a migrator, or `DomainNotSupported`.
    pub fn lookup(&self, domain: &str) -> Result<Arc<dyn Migrator>> {
        self.get(domain).ok_or_else(|| MigrateError::DomainNotSupported {
            domain: domain.to_string(),
        })
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.migrators.contains_key(domain)
    }

    /// Registered domain names, sorted.
    pub fn domain_names(&self) -> Vec<&str> {
        self.migrators.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.migrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }

    /// Whether the domain is registered and its source collection has
    /// documents.
    pub async fn is_installed(&self, domain: &str, probe: &dyn SourceProbe) -> Result<bool> {
        match self.get(domain) {
            Some(migrator) => {
                probe
                    .collection_has_documents(migrator.source_collection())
                    .await
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for MigratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratorRegistry")
            .field("domains", &self.domain_names())
            .finish()
    }
}
