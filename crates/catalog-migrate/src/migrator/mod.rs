//! Per-domain migrator contract.
//!
//! A domain (content plugin) contributes one [`Migrator`]: its name, the
//! source collection that signals it is installed, the target plugin it
//! migrates into, and two maps from source type tags to converters. The
//! maps are the only domain-specific logic; everything else is shared.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::pipeline::{
    DeclarativeMigration, PipelineConfig, PipelineStats, RecordError, RecordErrorKind,
};
use crate::plan::ImporterPlan;
use crate::target::{TargetEntity, TargetStore};
use crate::tracking::{RecordKey, TrackingRecord, TrackingStore};

/// Converts tracking records of one source content type into target entities.
pub trait ContentConverter: Send + Sync {
    /// Target model produced, e.g. `file.file`.
    fn target_type(&self) -> &str;

    /// Build the intended entity. Must not touch any store.
    fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity>;
}

/// Converts one importer (sync source) configuration into a target remote.
pub trait ImporterConverter: Send + Sync {
    fn target_type(&self) -> &str;

    fn convert(&self, name: &str, config: &Value) -> Result<TargetEntity>;
}

/// Source content type tag -> converter.
pub type ContentTypeMap = BTreeMap<String, Arc<dyn ContentConverter>>;

/// Source importer type tag -> converter.
pub type ImporterMap = BTreeMap<String, Arc<dyn ImporterConverter>>;

/// Everything a migrator needs to run one plan entry.
#[derive(Clone)]
pub struct MigrationContext {
    pub tracking: Arc<dyn TrackingStore>,
    pub target: Arc<dyn TargetStore>,
    pub pipeline: PipelineConfig,
    pub dry_run: bool,
    /// Restrict content migration to these source types.
    pub content_types: Option<Vec<String>>,
    pub cancel: CancellationToken,
}

/// Outcome of migrating a plan entry's importers.
#[derive(Debug, Clone, Default)]
pub struct ImporterStats {
    pub migrated: u64,
    pub validated: u64,
    pub failed: u64,
    pub errors: Vec<RecordError>,
}

/// Descriptor of one migratable domain.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Unique domain name used in migration plans.
    fn domain_name(&self) -> &str;

    /// Source collection whose documents indicate the domain is installed.
    fn source_collection(&self) -> &str;

    /// Target plugin the domain migrates into.
    fn target_plugin(&self) -> &str;

    fn content_type_map(&self) -> &ContentTypeMap;

    fn importer_map(&self) -> &ImporterMap;

    /// Migrate the domain's unmigrated content through the declarative
    /// pipeline.
    async fn migrate_content(&self, ctx: &MigrationContext) -> Result<PipelineStats> {
        DeclarativeMigration::new(
            self.domain_name(),
            self.content_type_map().clone(),
            ctx.tracking.clone(),
            ctx.target.clone(),
            ctx.pipeline.clone(),
        )
        .with_content_types(ctx.content_types.clone())
        .with_dry_run(ctx.dry_run)
        .run(&ctx.cancel)
        .await
    }

    /// Migrate the plan entry's importers into target remotes.
    async fn migrate_importers(
        &self,
        ctx: &MigrationContext,
        importers: &[ImporterPlan],
    ) -> ImporterStats {
        migrate_importers(self.domain_name(), self.importer_map(), ctx, importers).await
    }
}

/// Convert and persist importers one at a time.
///
/// Importers are few per plan entry; failures are recorded per importer.
pub async fn migrate_importers(
    domain: &str,
    converters: &ImporterMap,
    ctx: &MigrationContext,
    importers: &[ImporterPlan],
) -> ImporterStats {
    let mut stats = ImporterStats::default();

    for importer in importers {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let key = RecordKey::new(&importer.importer_type, &importer.name);
        let Some(converter) = converters.get(&importer.importer_type) else {
            let err = MigrateError::UnknownImporterType {
                domain: domain.to_string(),
                importer_type: importer.importer_type.clone(),
            };
            warn!("{}: {}", domain, err);
            stats.failed += 1;
            stats.errors.push(RecordError::new(
                &key,
                RecordErrorKind::UnknownImporterType,
                err.to_string(),
            ));
            continue;
        };

        let entity = match converter.convert(&importer.name, &importer.config) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("{}: importer {}: {}", domain, importer.name, e);
                stats.failed += 1;
                stats
                    .errors
                    .push(RecordError::new(&key, RecordErrorKind::ConversionFailed, e.to_string()));
                continue;
            }
        };

        if ctx.dry_run {
            match ctx.target.validate(&entity).await {
                Ok(()) => stats.validated += 1,
                Err(msg) => {
                    stats.failed += 1;
                    stats
                        .errors
                        .push(RecordError::new(&key, RecordErrorKind::InvalidEntity, msg));
                }
            }
            continue;
        }

        match ctx.target.create_or_get(&entity).await {
            Ok(target_ref) => {
                info!("{}: importer {} -> {}", domain, importer.name, target_ref);
                stats.migrated += 1;
            }
            Err(e) => {
                warn!("{}: importer {}: {}", domain, importer.name, e);
                stats.failed += 1;
                stats.errors.push(RecordError::new(
                    &key,
                    RecordErrorKind::TargetCreationFailed,
                    e.to_string(),
                ));
            }
        }
    }

    stats
}

/// Read a required string attribute, or fail with `InvalidEntity`.
pub fn required_str<'a>(record: &'a TrackingRecord, name: &str) -> Result<&'a str> {
    record
        .attr_str(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            MigrateError::invalid_entity(
                &record.source_id,
                format!("{} record is missing '{}'", record.source_type, name),
            )
        })
}

/// Read a required string from an importer config, or fail with `InvalidEntity`.
pub fn required_config_str<'a>(importer: &str, config: &'a Value, name: &str) -> Result<&'a str> {
    config
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            MigrateError::invalid_entity(importer, format!("importer config is missing '{}'", name))
        })
}
