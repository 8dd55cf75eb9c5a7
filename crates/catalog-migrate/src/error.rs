//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A plan entry names a domain with no registered migrator.
    #[error("Domain not supported: {domain}")]
    DomainNotSupported { domain: String },

    /// A tracking record's content type has no converter in its domain.
    #[error("Unknown content type '{content_type}' for source unit {source_id}")]
    UnknownContentType {
        content_type: String,
        source_id: String,
    },

    /// A plan importer names an importer type the domain cannot convert.
    #[error("Unknown importer type '{importer_type}' for domain {domain}")]
    UnknownImporterType {
        domain: String,
        importer_type: String,
    },

    /// A converter produced an entity the target system would reject.
    #[error("Invalid target entity for source unit {source_id}: {message}")]
    InvalidEntity { source_id: String, message: String },

    /// Writing a target entity failed.
    #[error("Target creation failed for source unit {source_id}: {message}")]
    TargetCreationFailed { source_id: String, message: String },

    /// Another migration run holds the global run lock.
    #[error("Another migration run is active (resource: {resource})")]
    LockConflict { resource: String },

    /// Validate-only mode found unsupported or unavailable plan entries.
    #[error("Plan validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// No migration plan with this id exists.
    #[error("Migration plan not found: {0}")]
    PlanNotFound(String),

    /// Tracking store failure.
    #[error("Tracking store error: {0}")]
    Tracking(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A spawned worker or run task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a TargetCreationFailed error
    pub fn target_creation(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TargetCreationFailed {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidEntity error
    pub fn invalid_entity(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::InvalidEntity {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::PlanNotFound(_) => 2,
            MigrateError::ValidationFailed(_) | MigrateError::DomainNotSupported { .. } => 3,
            MigrateError::LockConflict { .. } => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<deadpool_postgres::PoolError> for MigrateError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        MigrateError::pool(err.to_string(), "acquiring connection")
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_conflict_message() {
        let err = MigrateError::LockConflict {
            resource: "catalog-migrate".into(),
        };
        assert_eq!(
            err.to_string(),
            "Another migration run is active (resource: catalog-migrate)"
        );
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_validation_failed_joins_entries() {
        let err = MigrateError::ValidationFailed(vec![
            "rpm: not registered".into(),
            "docker: not installed".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Plan validation failed: rpm: not registered; docker: not installed"
        );
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "plan.yaml");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: plan.yaml"));
        assert_eq!(err.exit_code(), 1);
    }
}
