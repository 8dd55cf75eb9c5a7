//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tracking store backend.
    #[serde(default)]
    pub tracking: StoreConfig,

    /// Target catalog backend.
    #[serde(default)]
    pub target: StoreConfig,

    /// Source system probe settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Where migration plans live.
    #[serde(default)]
    pub plans: PlansConfig,

    /// Run behavior.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process memory; contents are lost at exit.
    #[default]
    Memory,
    /// PostgreSQL via a connection pool.
    Postgres,
}

/// Configuration for a tracking or target store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Connection settings, required for the postgres backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
}

/// PostgreSQL connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the engine's tables.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Maximum pool connections. Defaults to twice the worker count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Source system probe settings.
///
/// The engine does not connect to the source system. The pre-migration step
/// exports the list of source collections that hold at least one document,
/// and `is_installed` checks are answered from this list instead of a live
/// query. A [`SourceProbe`](crate::source::SourceProbe) implementation backed
/// by the source database can replace it through `Stores::with_source`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub installed_collections: Vec<String>,
}

/// Plan storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlansConfig {
    /// Directory of `<plan_id>.yaml` files.
    #[serde(default = "default_plans_dir")]
    pub dir: PathBuf,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            dir: default_plans_dir(),
        }
    }
}

/// What stage 2 does when a target write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep materializing other units.
    #[default]
    Skip,
    /// Stop the domain's pipeline at the first failure.
    AbortDomain,
}

/// What the coordinator does when another run holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Return `LockConflict` immediately.
    #[default]
    FailFast,
    /// Wait up to `timeout_secs` for the lock.
    Wait,
}

/// Run lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub policy: LockPolicy,

    /// Maximum wait under the `wait` policy.
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry interval while waiting on a cross-process lock.
    #[serde(default = "default_lock_poll_ms")]
    pub poll_interval_ms: u64,

    /// Resource key shared by every migration run.
    #[serde(default = "default_lock_resource")]
    pub resource: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            policy: LockPolicy::default(),
            timeout_secs: default_lock_timeout_secs(),
            poll_interval_ms: default_lock_poll_ms(),
            resource: default_lock_resource(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Migration behavior configuration.
/// Performance fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Concurrent stage 2 workers per domain. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Capacity of the queue between stage 1 and stage 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Tracking records fetched per stage 1 page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_batch_size: Option<usize>,

    /// Plan entries migrated concurrently within one run (default: 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_concurrency: Option<usize>,

    /// Policy for target write failures.
    #[serde(default)]
    pub on_target_failure: FailurePolicy,

    /// Global run lock.
    #[serde(default)]
    pub lock: LockConfig,
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Target writes are I/O bound: 2 per core, 4..=32
        if self.workers.is_none() {
            self.workers = Some((cores * 2).clamp(4, 32));
        }
        let workers = self.get_workers();

        if self.queue_capacity.is_none() {
            self.queue_capacity = Some((workers * 4).clamp(16, 256));
        }

        if self.scan_batch_size.is_none() {
            self.scan_batch_size = Some(if resources.total_memory_gb >= 8.0 {
                1_000
            } else {
                500
            });
        }

        info!(
            "Auto-tuned config: workers={}, queue_capacity={}, scan_batch_size={}",
            self.get_workers(),
            self.get_queue_capacity(),
            self.get_scan_batch_size(),
        );

        self
    }

    // Accessors returning the effective value (with fallback defaults)
    // for configs that were never auto-tuned.

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(64)
    }

    pub fn get_scan_batch_size(&self) -> usize {
        self.scan_batch_size.unwrap_or(500)
    }

    pub fn get_domain_concurrency(&self) -> usize {
        self.domain_concurrency.unwrap_or(1)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "catalog_migrate".to_string()
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from("plans")
}

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_lock_poll_ms() -> u64 {
    500
}

fn default_lock_resource() -> String {
    "catalog-migrate/run".to_string()
}
