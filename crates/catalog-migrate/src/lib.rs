//! # catalog-migrate
//!
//! Content catalog migration engine.
//!
//! Moves content from a legacy document-oriented catalog into a relational
//! one, domain by domain:
//!
//! - **Migrator registry** of per-domain plugins, each a pair of
//!   content-type and importer converter maps
//! - **Declarative pipeline** that scans unmigrated tracking records and
//!   materializes target entities with bounded parallelism
//! - **Run coordinator** that executes a migration plan under a global run
//!   lock, with dry-run and validate-only modes
//! - **Idempotent re-runs**: a record's `target_ref` is set at most once
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_migrate::{Config, MigratorRegistry, RunCoordinator, RunRequest, Stores};
//!
//! #[tokio::main]
//! async fn main() -> catalog_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let stores = Stores::from_config(&config).await?;
//!     let coordinator = RunCoordinator::new(
//!         Arc::new(MigratorRegistry::with_builtins()),
//!         stores,
//!         config.migration.clone(),
//!     );
//!     let result = coordinator.run(RunRequest::new("nightly")).await?;
//!     println!("{}: {} migrated", result.status, result.total_migrated());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod migrator;
pub mod pipeline;
pub mod plan;
pub mod plugins;
pub mod registry;
pub mod source;
pub mod stores;
pub mod target;
pub mod tracking;

// Re-exports for convenient access
pub use config::{Config, FailurePolicy, LockPolicy, MigrationConfig};
pub use coordinator::{
    DomainOutcome, DomainStatus, RunCoordinator, RunDispatcher, RunHandle, RunPhase, RunRequest,
    RunResult, RunStatus, ValidationReport,
};
pub use error::{MigrateError, Result};
pub use migrator::{ContentConverter, ImporterConverter, MigrationContext, Migrator};
pub use pipeline::{PipelineConfig, PipelineStats, RecordError, RecordErrorKind};
pub use plan::{MigrationPlan, PlanEntry, PlanStore};
pub use registry::MigratorRegistry;
pub use stores::Stores;
pub use target::{TargetEntity, TargetStore};
pub use tracking::{RecordKey, TargetRef, TrackingFilter, TrackingRecord, TrackingStore};
