//! Run coordinator: executes a migration plan under the global run lock.

mod dispatch;
mod result;

pub use dispatch::{RunDispatcher, RunHandle, RunPhase};
pub use result::{
    DomainError, DomainErrorKind, DomainOutcome, DomainStatus, EntryCheck, RunResult, RunStatus,
    ValidationReport,
};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::lock;
use crate::migrator::{ImporterStats, MigrationContext};
use crate::pipeline::PipelineConfig;
use crate::plan::{MigrationPlan, PlanEntry};
use crate::registry::MigratorRegistry;
use crate::stores::Stores;

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub plan_id: String,

    /// Check every entry and report, without migrating anything.
    #[serde(default)]
    pub validate: bool,

    /// Convert and validate entities without writing them.
    #[serde(default)]
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            validate: false,
            dry_run: false,
        }
    }

    pub fn validate_only(mut self) -> Self {
        self.validate = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Executes migration plans.
pub struct RunCoordinator {
    registry: Arc<MigratorRegistry>,
    stores: Stores,
    config: MigrationConfig,
}

impl RunCoordinator {
    pub fn new(registry: Arc<MigratorRegistry>, stores: Stores, config: MigrationConfig) -> Self {
        Self {
            registry,
            stores,
            config,
        }
    }

    pub fn registry(&self) -> &MigratorRegistry {
        &self.registry
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run a plan to completion.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a plan, stopping between records once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run_with_id(run_id, request, cancel, || {}).await
    }

    /// `on_locked` is called once the run lock is held, before any work.
    pub(crate) async fn run_with_id(
        &self,
        run_id: String,
        request: RunRequest,
        cancel: CancellationToken,
        on_locked: impl FnOnce() + Send,
    ) -> Result<RunResult> {
        info!(
            "Starting migration run {} (plan {}{}{})",
            run_id,
            request.plan_id,
            if request.validate { ", validate" } else { "" },
            if request.dry_run { ", dry-run" } else { "" }
        );

        info!("Phase 1: Acquiring run lock");
        let guard = lock::acquire(self.stores.lock.as_ref(), &self.config.lock).await?;
        on_locked();

        let result = self.run_locked(run_id, &request, &cancel).await;

        if let Err(e) = guard.release().await {
            error!("Failed to release run lock: {}", e);
        }

        match &result {
            Ok(r) => info!(
                "Run {} {} in {:.1}s: {} migrated, {} failed",
                r.run_id,
                r.status,
                r.duration_seconds,
                r.total_migrated(),
                r.total_failed()
            ),
            Err(e) => error!("Run failed: {}", e),
        }
        result
    }

    async fn run_locked(
        &self,
        run_id: String,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let started_at = Utc::now();

        info!("Phase 2: Loading plan {}", request.plan_id);
        let plan = self.stores.plans.get(&request.plan_id).await?;
        // Validate mode reports structural problems instead of failing on them
        let plan_problem = match plan.validate() {
            Ok(()) => None,
            Err(MigrateError::Config(message)) if request.validate => Some(message),
            Err(e) => return Err(e),
        };
        let plan_digest = plan.digest();

        let (status, domains, validation) = if request.validate {
            info!("Phase 3: Validating {} entries", plan.entries.len());
            let mut report = self.validate(&plan).await;
            report.plan_problems.extend(plan_problem);
            for problem in report.problems() {
                warn!("{}", problem);
            }
            let status = if report.is_ok() {
                RunStatus::Validated
            } else {
                RunStatus::ValidationFailed
            };
            (status, Vec::new(), Some(report))
        } else {
            let concurrency = self.config.get_domain_concurrency().max(1);
            info!(
                "Phase 3: Migrating {} entries (domain concurrency {})",
                plan.entries.len(),
                concurrency
            );

            // join_all keeps outcomes in plan order
            let semaphore = Semaphore::new(concurrency);
            let domains: Vec<DomainOutcome> = join_all(plan.entries.iter().map(|entry| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    self.migrate_entry(entry, request.dry_run, cancel).await
                }
            }))
            .await;

            let status = RunResult::summarize(&domains, cancel.is_cancelled());
            (status, domains, None)
        };

        let completed_at = Utc::now();
        Ok(RunResult {
            run_id,
            plan_id: plan.id,
            plan_digest,
            status,
            dry_run: request.dry_run,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            domains,
            validation,
        })
    }

    /// Check every plan entry without side effects.
    pub async fn validate(&self, plan: &MigrationPlan) -> ValidationReport {
        let mut report = ValidationReport::default();
        for entry in &plan.entries {
            report.entries.push(self.check_entry(entry).await);
        }
        report
    }

    async fn check_entry(&self, entry: &PlanEntry) -> EntryCheck {
        let mut check = EntryCheck {
            domain: entry.domain.clone(),
            registered: false,
            installed: false,
            problems: Vec::new(),
        };

        let migrator = match self.registry.lookup(&entry.domain) {
            Ok(migrator) => migrator,
            Err(e) => {
                check.problems.push(e.to_string());
                return check;
            }
        };
        check.registered = true;

        match self
            .stores
            .source
            .collection_has_documents(migrator.source_collection())
            .await
        {
            Ok(true) => check.installed = true,
            Ok(false) => check.problems.push(format!(
                "not installed (source collection '{}' is empty)",
                migrator.source_collection()
            )),
            Err(e) => check.problems.push(format!("source probe failed: {}", e)),
        }

        if let Err(e) = check_content_types(entry, migrator.content_type_map()) {
            check.problems.push(e);
        }

        for importer in &entry.importers {
            if !migrator.importer_map().contains_key(&importer.importer_type) {
                check.problems.push(
                    MigrateError::UnknownImporterType {
                        domain: entry.domain.clone(),
                        importer_type: importer.importer_type.clone(),
                    }
                    .to_string(),
                );
            }
        }

        check
    }

    /// Migrate one plan entry. Never fails the run: problems become the
    /// entry's outcome.
    async fn migrate_entry(
        &self,
        entry: &PlanEntry,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> DomainOutcome {
        let domain = entry.domain.as_str();
        let start = Instant::now();

        if cancel.is_cancelled() {
            return DomainOutcome::cancelled(domain);
        }

        let migrator = match self.registry.lookup(domain) {
            Ok(migrator) => migrator,
            Err(e) => {
                warn!("{}", e);
                return DomainOutcome::not_run(
                    domain,
                    DomainStatus::Failed,
                    DomainErrorKind::DomainNotSupported,
                    e.to_string(),
                );
            }
        };

        match self
            .registry
            .is_installed(domain, self.stores.source.as_ref())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!("{}: not installed in the source system, skipping", domain);
                return DomainOutcome::not_run(
                    domain,
                    DomainStatus::Skipped,
                    DomainErrorKind::NotInstalled,
                    format!(
                        "source collection '{}' has no documents",
                        migrator.source_collection()
                    ),
                );
            }
            Err(e) => {
                warn!("{}: source probe failed: {}", domain, e);
                return DomainOutcome::not_run(
                    domain,
                    DomainStatus::Failed,
                    DomainErrorKind::PipelineFailed,
                    e.to_string(),
                );
            }
        }

        if let Err(message) = check_content_types(entry, migrator.content_type_map()) {
            warn!("{}: {}", domain, message);
            return DomainOutcome::not_run(
                domain,
                DomainStatus::Failed,
                DomainErrorKind::InvalidOptions,
                message,
            );
        }

        let ctx = MigrationContext {
            tracking: self.stores.tracking.clone(),
            target: self.stores.target.clone(),
            pipeline: PipelineConfig::from(&self.config),
            dry_run,
            content_types: entry.content_types.clone(),
            cancel: cancel.clone(),
        };

        let stats = match migrator.migrate_content(&ctx).await {
            Ok(stats) => stats,
            Err(e) => {
                error!("{}: content migration failed: {}", domain, e);
                let mut outcome = DomainOutcome::not_run(
                    domain,
                    DomainStatus::Failed,
                    DomainErrorKind::PipelineFailed,
                    e.to_string(),
                );
                outcome.elapsed = start.elapsed();
                return outcome;
            }
        };

        let importers = if !stats.is_complete() || entry.importers.is_empty() {
            ImporterStats::default()
        } else {
            migrator.migrate_importers(&ctx, &entry.importers).await
        };

        let mut outcome = DomainOutcome::from_stats(domain, stats, importers);
        outcome.elapsed = start.elapsed();
        outcome
    }
}

/// Every restricted content type must exist in the domain's map.
fn check_content_types(
    entry: &PlanEntry,
    map: &crate::migrator::ContentTypeMap,
) -> std::result::Result<(), String> {
    let Some(types) = &entry.content_types else {
        return Ok(());
    };
    let unknown: Vec<&str> = types
        .iter()
        .filter(|t| !map.contains_key(t.as_str()))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "content_types not handled by '{}': {}",
            entry.domain,
            unknown.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_builder() {
        let request = RunRequest::new("nightly").dry_run();
        assert!(request.dry_run);
        assert!(!request.validate);

        let json: RunRequest = serde_json::from_str(r#"{"plan_id": "p", "validate": true}"#).unwrap();
        assert!(json.validate);
        assert!(!json.dry_run);
    }

    #[test]
    fn test_check_content_types() {
        let migrator = crate::plugins::DockerMigrator::new();
        let map = crate::migrator::Migrator::content_type_map(&migrator);

        let mut entry = PlanEntry::new("docker");
        assert!(check_content_types(&entry, map).is_ok());

        entry.content_types = Some(vec!["docker_tag".into(), "rpm".into()]);
        let err = check_content_types(&entry, map).unwrap_err();
        assert!(err.ends_with(": rpm"));
    }
}
