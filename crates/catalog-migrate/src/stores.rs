//! Backend wiring.

use std::sync::Arc;
use tracing::info;

use crate::config::{BackendKind, Config, PostgresConfig, StoreConfig};
use crate::error::{MigrateError, Result};
use crate::lock::{LocalRunLock, PgAdvisoryLock, RunLock};
use crate::plan::{FilePlanStore, MemoryPlanStore, PlanStore};
use crate::source::{SourceProbe, StaticSourceProbe};
use crate::target::{DbTargetStore, MemoryTargetStore, TargetStore};
use crate::tracking::{DbTrackingStore, MemoryTrackingStore, TrackingStore};

/// The collaborators a run coordinator works against.
#[derive(Clone)]
pub struct Stores {
    pub tracking: Arc<dyn TrackingStore>,
    pub target: Arc<dyn TargetStore>,
    pub source: Arc<dyn SourceProbe>,
    pub plans: Arc<dyn PlanStore>,
    pub lock: Arc<dyn RunLock>,
}

impl Stores {
    /// All-memory stores with an empty plan store and source probe.
    pub fn in_memory() -> Self {
        Self {
            tracking: Arc::new(MemoryTrackingStore::new()),
            target: Arc::new(MemoryTargetStore::new()),
            source: Arc::new(StaticSourceProbe::default()),
            plans: Arc::new(MemoryPlanStore::new()),
            lock: Arc::new(LocalRunLock::new()),
        }
    }

    /// Build backends from configuration.
    ///
    /// A postgres tracking store also provides the run lock, so runs in
    /// different processes against the same store exclude each other.
    pub async fn from_config(config: &Config) -> Result<Self> {
        // One extra connection stays checked out by the run lock
        let max_conns = config.migration.get_workers() * 2 + 1;

        let (tracking, lock): (Arc<dyn TrackingStore>, Arc<dyn RunLock>) =
            match config.tracking.backend {
                BackendKind::Memory => (
                    Arc::new(MemoryTrackingStore::new()),
                    Arc::new(LocalRunLock::new()),
                ),
                BackendKind::Postgres => {
                    let pg = postgres_settings(&config.tracking, "tracking")?;
                    let pool = pg.create_pool(max_conns).await?;
                    (
                        Arc::new(DbTrackingStore::new(pool.clone(), &pg.schema)),
                        Arc::new(PgAdvisoryLock::new(pool)),
                    )
                }
            };

        let target: Arc<dyn TargetStore> = match config.target.backend {
            BackendKind::Memory => Arc::new(MemoryTargetStore::new()),
            BackendKind::Postgres => {
                let pg = postgres_settings(&config.target, "target")?;
                let pool = pg.create_pool(max_conns).await?;
                Arc::new(DbTargetStore::new(pool, &pg.schema))
            }
        };

        info!(
            "Stores: tracking={}, target={}, lock={}, plans={}",
            tracking.backend_type(),
            target.backend_type(),
            lock.backend_type(),
            config.plans.dir.display()
        );

        Ok(Self {
            tracking,
            target,
            source: Arc::new(StaticSourceProbe::new(
                config.source.installed_collections.iter().cloned(),
            )),
            plans: Arc::new(FilePlanStore::new(&config.plans.dir)),
            lock,
        })
    }

    pub fn with_tracking(mut self, tracking: Arc<dyn TrackingStore>) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_target(mut self, target: Arc<dyn TargetStore>) -> Self {
        self.target = target;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SourceProbe>) -> Self {
        self.source = source;
        self
    }

    pub fn with_plans(mut self, plans: Arc<dyn PlanStore>) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn RunLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Create tracking and target tables. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        self.tracking.init_schema().await?;
        self.target.init_schema().await?;
        Ok(())
    }
}

fn postgres_settings<'a>(store: &'a StoreConfig, section: &str) -> Result<&'a PostgresConfig> {
    store.postgres.as_ref().ok_or_else(|| {
        MigrateError::Config(format!(
            "{section}.postgres is required when {section}.backend is postgres"
        ))
    })
}
