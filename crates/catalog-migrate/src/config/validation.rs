//! Configuration validation.

use super::{BackendKind, Config, StoreConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("tracking", &config.tracking)?;
    validate_store("target", &config.target)?;

    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.queue_capacity {
        return Err(MigrateError::Config(
            "migration.queue_capacity must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.scan_batch_size {
        return Err(MigrateError::Config(
            "migration.scan_batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.domain_concurrency {
        return Err(MigrateError::Config(
            "migration.domain_concurrency must be at least 1".into(),
        ));
    }
    if config.migration.lock.resource.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.lock.resource must not be empty".into(),
        ));
    }

    Ok(())
}

fn validate_store(section: &str, store: &StoreConfig) -> Result<()> {
    match (store.backend, &store.postgres) {
        (BackendKind::Postgres, None) => Err(MigrateError::Config(format!(
            "{}.postgres is required when {}.backend is 'postgres'",
            section, section
        ))),
        (BackendKind::Postgres, Some(pg)) => {
            if pg.host.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.postgres.host is required",
                    section
                )));
            }
            if pg.database.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.postgres.database is required",
                    section
                )));
            }
            if pg.user.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.postgres.user is required",
                    section
                )));
            }
            if !is_identifier(&pg.schema) {
                return Err(MigrateError::Config(format!(
                    "{}.postgres.schema '{}' must be a plain SQL identifier",
                    section, pg.schema
                )));
            }
            Ok(())
        }
        (BackendKind::Memory, _) => Ok(()),
    }
}

/// Schema names are interpolated into DDL, so restrict them.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;

    fn pg() -> PostgresConfig {
        PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "catalog".to_string(),
            user: "migrator".to_string(),
            password: "password".to_string(),
            schema: "catalog_migrate".to_string(),
            max_connections: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_settings() {
        let mut config = Config::default();
        config.tracking.backend = BackendKind::Postgres;
        assert!(validate(&config).is_err());

        config.tracking.postgres = Some(pg());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_unsafe_schema_name() {
        let mut config = Config::default();
        config.target.backend = BackendKind::Postgres;
        let mut settings = pg();
        settings.schema = "x; DROP TABLE y".to_string();
        config.target.postgres = Some(settings);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.migration.workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_postgres_config_debug_redacts_password() {
        let mut settings = pg();
        settings.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", settings);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }
}
