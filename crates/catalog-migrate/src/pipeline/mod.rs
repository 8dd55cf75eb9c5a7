//! Two-stage declarative content migration pipeline.
//!
//! - [`ContentMigrationFirstStage`]: scans unmigrated tracking records of one
//!   domain and turns each into a [`DeclarativeContent`] unit
//! - [`Materializer`]: persists units into the target catalog and marks the
//!   originating tracking record as migrated
//! - [`DeclarativeMigration`]: wires the two together
//!
//! # Architecture
//!
//! Stage 1 and stage 2 run concurrently, connected by a bounded queue. Stage 2
//! is a pool of workers pulling from that queue, so a slow target write holds
//! back the scan instead of growing memory.
//!
//! ```text
//! tracking store ──scan──> first stage ──queue(N)──> worker 1..W ──> target store
//!                                                        └──set target_ref──> tracking store
//! ```

mod declarative;
mod first_stage;
mod materialize;

pub use declarative::DeclarativeMigration;
pub use first_stage::ContentMigrationFirstStage;
pub use materialize::{Materialized, Materializer};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{FailurePolicy, MigrationConfig};
use crate::target::TargetEntity;
use crate::tracking::RecordKey;

/// An intended target entity plus the tracking record it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarativeContent {
    pub record: RecordKey,
    pub entity: TargetEntity,
}

/// Configuration for pipeline behavior.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stage 2 workers.
    pub workers: usize,

    /// Units buffered between stage 1 and stage 2.
    pub queue_capacity: usize,

    /// Tracking records fetched per scan.
    pub scan_batch_size: usize,

    /// What to do when a target write fails.
    pub on_target_failure: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            scan_batch_size: 500,
            on_target_failure: FailurePolicy::Skip,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, size: usize) -> Self {
        self.queue_capacity = size.max(1);
        self
    }

    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_target_failure = policy;
        self
    }
}

impl From<&MigrationConfig> for PipelineConfig {
    fn from(config: &MigrationConfig) -> Self {
        Self::new()
            .with_workers(config.get_workers())
            .with_queue_capacity(config.get_queue_capacity())
            .with_scan_batch_size(config.get_scan_batch_size())
            .with_failure_policy(config.on_target_failure)
    }
}

/// Why a single record (or importer) was not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    /// The record's type has no converter in its domain.
    UnknownContentType,
    /// The converter rejected the record's attributes.
    ConversionFailed,
    /// Dry-run validation rejected the entity.
    InvalidEntity,
    /// The target write failed.
    TargetCreationFailed,
    /// The target entity exists but `target_ref` could not be recorded.
    TrackingUpdateFailed,
    /// A plan importer names an importer type the domain cannot convert.
    UnknownImporterType,
}

/// A per-record failure, reported in the run result instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub source_type: String,
    pub source_id: String,
    pub kind: RecordErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(key: &RecordKey, kind: RecordErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_type: key.source_type.clone(),
            source_id: key.source_id.clone(),
            kind,
            message: message.into(),
        }
    }
}

/// Statistics collected during one domain's pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Unmigrated records read by stage 1.
    pub scanned: u64,

    /// Records whose `target_ref` was set by this run.
    pub migrated: u64,

    /// Dry-run units that passed validation.
    pub validated: u64,

    /// Records another writer migrated first.
    pub skipped: u64,

    /// Records that failed; details in `errors`.
    pub failed: u64,

    pub errors: Vec<RecordError>,

    /// Stopped early by the `abort_domain` policy.
    pub aborted: bool,

    /// Stopped early by cancellation.
    pub cancelled: bool,

    /// Stage 1 stopped because a scan query failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,

    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, error: RecordError) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Merge another stats instance into this one.
    pub fn merge(&mut self, other: PipelineStats) {
        self.scanned += other.scanned;
        self.migrated += other.migrated;
        self.validated += other.validated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.aborted |= other.aborted;
        self.cancelled |= other.cancelled;
        if self.scan_error.is_none() {
            self.scan_error = other.scan_error;
        }
    }

    /// Whether every unmigrated record was offered to stage 2.
    pub fn is_complete(&self) -> bool {
        !self.aborted && !self.cancelled && self.scan_error.is_none()
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "scanned {}, migrated {}, validated {}, skipped {}, failed {} in {:.1}s",
            self.scanned,
            self.migrated,
            self.validated,
            self.skipped,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_builder_clamps() {
        let config = PipelineConfig::new()
            .with_workers(0)
            .with_queue_capacity(0)
            .with_scan_batch_size(25);
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.scan_batch_size, 25);
    }

    #[test]
    fn test_pipeline_config_from_migration_config() {
        let migration = MigrationConfig {
            workers: Some(12),
            on_target_failure: FailurePolicy::AbortDomain,
            ..Default::default()
        };
        let config = PipelineConfig::from(&migration);
        assert_eq!(config.workers, 12);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.on_target_failure, FailurePolicy::AbortDomain);
    }

    #[test]
    fn test_pipeline_stats_merge() {
        let mut a = PipelineStats {
            migrated: 3,
            ..Default::default()
        };
        let mut b = PipelineStats::new();
        b.migrated = 2;
        b.record_failure(RecordError::new(
            &RecordKey::new("iso", "x"),
            RecordErrorKind::TargetCreationFailed,
            "connection reset",
        ));
        b.aborted = true;
        b.scan_error = Some("connection lost".into());

        a.merge(b);
        assert_eq!(a.migrated, 5);
        assert_eq!(a.failed, 1);
        assert_eq!(a.errors.len(), 1);
        assert!(a.aborted);
        assert!(!a.cancelled);
        assert_eq!(a.scan_error.as_deref(), Some("connection lost"));
        assert!(!a.is_complete());
    }

    #[test]
    fn test_record_error_serializes_kind_snake_case() {
        let err = RecordError::new(
            &RecordKey::new("bogus", "1"),
            RecordErrorKind::UnknownContentType,
            "no converter",
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unknown_content_type");
        assert_eq!(json["source_type"], "bogus");
    }
}
