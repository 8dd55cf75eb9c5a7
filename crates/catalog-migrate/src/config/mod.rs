//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::info;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, logged with each run.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl PostgresConfig {
    /// Build a connection pool and check connectivity.
    pub async fn create_pool(&self, default_max_conns: usize) -> Result<Pool> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(self.max_connections.unwrap_or(default_max_conns).max(1))
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "building pool"))?;

        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (schema {})",
            self.host, self.port, self.database, self.schema
        );

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
tracking:
  backend: postgres
  postgres:
    host: db.internal
    database: catalog
    user: migrator
    password: secret
source:
  installed_collections: [units_iso, units_docker_manifest]
plans:
  dir: /etc/catalog-migrate/plans
migration:
  workers: 8
  on_target_failure: abort_domain
  lock:
    policy: wait
    timeout_secs: 30
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.tracking.backend, BackendKind::Postgres);
        let pg = config.tracking.postgres.as_ref().unwrap();
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.schema, "catalog_migrate");
        assert_eq!(config.target.backend, BackendKind::Memory);
        assert_eq!(config.source.installed_collections.len(), 2);
        assert_eq!(config.migration.get_workers(), 8);
        assert_eq!(config.migration.on_target_failure, FailurePolicy::AbortDomain);
        assert_eq!(config.migration.lock.policy, LockPolicy::Wait);
        assert_eq!(config.migration.lock.timeout_secs, 30);
        assert_eq!(config.migration.lock.resource, "catalog-migrate/run");
    }

    #[test]
    fn test_from_yaml_empty_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.migration.get_domain_concurrency(), 1);
        assert_eq!(config.migration.lock.policy, LockPolicy::FailFast);
        assert_eq!(config.plans.dir, std::path::PathBuf::from("plans"));
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = "migration:\n  queue_capacity: 0\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::default();
        let mut b = Config::default();
        assert_eq!(a.hash(), b.hash());
        b.migration.workers = Some(3);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 8,
        };
        let tuned = MigrationConfig {
            workers: Some(2),
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(tuned.get_workers(), 2);
        assert_eq!(tuned.get_queue_capacity(), 16);
        assert_eq!(tuned.get_scan_batch_size(), 1_000);
    }
}
