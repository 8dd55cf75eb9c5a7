//! Stage 2: persist declarative content and record the target reference.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DeclarativeContent, PipelineStats, RecordError, RecordErrorKind};
use crate::config::FailurePolicy;
use crate::target::TargetStore;
use crate::tracking::{TargetRef, TrackingStore};

/// Result of materializing one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// Entity created (or found) and `target_ref` set by this call.
    Migrated(TargetRef),
    /// Another writer set `target_ref` first; the stored value was kept.
    AlreadyMigrated,
    /// Dry-run: the entity passed validation, nothing was written.
    Validated,
}

/// Writes units to the target catalog.
///
/// The target entity is created (or found) before `target_ref` is set, and
/// `target_ref` is only set if still unset. A crash between the two steps
/// leaves the record unmigrated; the next run finds the existing entity
/// through its natural key instead of creating a duplicate.
pub struct Materializer {
    tracking: Arc<dyn TrackingStore>,
    target: Arc<dyn TargetStore>,
    dry_run: bool,
}

impl Materializer {
    pub fn new(tracking: Arc<dyn TrackingStore>, target: Arc<dyn TargetStore>) -> Self {
        Self {
            tracking,
            target,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn materialize(
        &self,
        unit: &DeclarativeContent,
    ) -> std::result::Result<Materialized, RecordError> {
        if self.dry_run {
            return match self.target.validate(&unit.entity).await {
                Ok(()) => Ok(Materialized::Validated),
                Err(msg) => Err(RecordError::new(
                    &unit.record,
                    RecordErrorKind::InvalidEntity,
                    msg,
                )),
            };
        }

        let target_ref = self.target.create_or_get(&unit.entity).await.map_err(|e| {
            RecordError::new(&unit.record, RecordErrorKind::TargetCreationFailed, e.to_string())
        })?;

        match self.tracking.set_target_ref(&unit.record, target_ref).await {
            Ok(true) => Ok(Materialized::Migrated(target_ref)),
            Ok(false) => Ok(Materialized::AlreadyMigrated),
            Err(e) => Err(RecordError::new(
                &unit.record,
                RecordErrorKind::TrackingUpdateFailed,
                e.to_string(),
            )),
        }
    }

    /// Worker loop: materialize units until the queue closes or `stop` fires.
    ///
    /// Under [`FailurePolicy::AbortDomain`] the first target write failure
    /// cancels `stop`, which halts stage 1 and every other worker.
    pub async fn run_worker(
        &self,
        worker_id: usize,
        rx: async_channel::Receiver<DeclarativeContent>,
        policy: FailurePolicy,
        stop: CancellationToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::new();

        loop {
            let unit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(unit) => unit,
                    Err(_) => break,
                },
            };

            match self.materialize(&unit).await {
                Ok(Materialized::Migrated(target_ref)) => {
                    stats.migrated += 1;
                    debug!("Worker {}: {} -> {}", worker_id, unit.record, target_ref);
                }
                Ok(Materialized::AlreadyMigrated) => {
                    stats.skipped += 1;
                    debug!("Worker {}: {} already migrated", worker_id, unit.record);
                }
                Ok(Materialized::Validated) => stats.validated += 1,
                Err(err) => {
                    warn!("Worker {}: {}: {}", worker_id, unit.record, err.message);
                    let abort = policy == FailurePolicy::AbortDomain
                        && err.kind == RecordErrorKind::TargetCreationFailed;
                    stats.record_failure(err);
                    if abort {
                        stats.aborted = true;
                        stop.cancel();
                        break;
                    }
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{MemoryTargetStore, TargetEntity};
    use crate::tracking::{MemoryTrackingStore, RecordKey, TrackingRecord};
    use chrono::Utc;

    fn setup() -> (Arc<MemoryTrackingStore>, Arc<MemoryTargetStore>, DeclarativeContent) {
        let tracking = Arc::new(MemoryTrackingStore::with_records(vec![TrackingRecord::new(
            "iso",
            "iso",
            "u1",
            Utc::now(),
        )]));
        let target = Arc::new(MemoryTargetStore::new());
        let unit = DeclarativeContent {
            record: RecordKey::new("iso", "u1"),
            entity: TargetEntity::new("file.file", "a.iso"),
        };
        (tracking, target, unit)
    }

    #[tokio::test]
    async fn test_materialize_sets_target_ref_once() {
        let (tracking, target, unit) = setup();
        let materializer = Materializer::new(tracking.clone(), target.clone());

        let first = materializer.materialize(&unit).await.unwrap();
        let Materialized::Migrated(target_ref) = first else {
            panic!("expected Migrated, got {first:?}");
        };
        assert_eq!(
            materializer.materialize(&unit).await.unwrap(),
            Materialized::AlreadyMigrated
        );

        let record = tracking.get(&unit.record).await.unwrap().unwrap();
        assert_eq!(record.target_ref, Some(target_ref));
        assert_eq!(target.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (tracking, target, unit) = setup();
        let materializer = Materializer::new(tracking.clone(), target.clone()).with_dry_run(true);

        assert_eq!(
            materializer.materialize(&unit).await.unwrap(),
            Materialized::Validated
        );
        assert_eq!(target.count().await.unwrap(), 0);
        assert!(!tracking.get(&unit.record).await.unwrap().unwrap().is_migrated());
    }

    #[tokio::test]
    async fn test_dry_run_reports_invalid_entity() {
        let (tracking, target, mut unit) = setup();
        unit.entity.natural_key.clear();
        let materializer = Materializer::new(tracking, target).with_dry_run(true);

        let err = materializer.materialize(&unit).await.unwrap_err();
        assert_eq!(err.kind, RecordErrorKind::InvalidEntity);
    }

    #[tokio::test]
    async fn test_worker_aborts_domain_on_target_failure() {
        let (tracking, target, mut unit) = setup();
        unit.entity.entity_type = "nodot".to_string();
        let materializer = Materializer::new(tracking, target);

        let (tx, rx) = async_channel::bounded(4);
        tx.send(unit.clone()).await.unwrap();
        tx.send(unit).await.unwrap();
        drop(tx);

        let stop = CancellationToken::new();
        let stats = materializer
            .run_worker(0, rx, FailurePolicy::AbortDomain, stop.clone())
            .await;
        assert!(stats.aborted);
        assert_eq!(stats.failed, 1);
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_worker_skips_failures_by_default() {
        let (tracking, target, mut unit) = setup();
        unit.entity.entity_type = "nodot".to_string();
        let materializer = Materializer::new(tracking, target);

        let (tx, rx) = async_channel::bounded(4);
        tx.send(unit.clone()).await.unwrap();
        tx.send(unit).await.unwrap();
        drop(tx);

        let stats = materializer
            .run_worker(0, rx, FailurePolicy::Skip, CancellationToken::new())
            .await;
        assert!(!stats.aborted);
        assert_eq!(stats.failed, 2);
    }
}
