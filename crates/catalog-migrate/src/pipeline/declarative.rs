//! Runs stage 1 and a stage 2 worker pool for one domain.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ContentMigrationFirstStage, Materializer, PipelineConfig, PipelineStats};
use crate::error::{MigrateError, Result};
use crate::migrator::ContentTypeMap;
use crate::target::TargetStore;
use crate::tracking::TrackingStore;

/// Declarative content migration for a single domain.
pub struct DeclarativeMigration {
    domain: String,
    first_stage: ContentMigrationFirstStage,
    tracking: Arc<dyn TrackingStore>,
    target: Arc<dyn TargetStore>,
    dry_run: bool,
    config: PipelineConfig,
}

impl DeclarativeMigration {
    pub fn new(
        domain: impl Into<String>,
        converters: ContentTypeMap,
        tracking: Arc<dyn TrackingStore>,
        target: Arc<dyn TargetStore>,
        config: PipelineConfig,
    ) -> Self {
        let domain = domain.into();
        let first_stage = ContentMigrationFirstStage::new(&domain, converters, tracking.clone())
            .with_batch_size(config.scan_batch_size);
        Self {
            domain,
            first_stage,
            tracking,
            target,
            dry_run: false,
            config,
        }
    }

    /// Restrict the scan to a subset of the domain's content types.
    pub fn with_content_types(mut self, content_types: Option<Vec<String>>) -> Self {
        self.first_stage = self.first_stage.with_content_types(content_types);
        self
    }

    /// Validate entities instead of writing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the pipeline to completion, cancellation, or domain abort.
    ///
    /// Per-record failures end up in the returned stats, and so does a failed
    /// scan (`scan_error`), together with the work finished before it. An
    /// error is only returned when a worker task dies.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineStats> {
        let start = Instant::now();
        let stop = cancel.child_token();
        let workers = self.config.workers.max(1);

        info!(
            "{}: migrating content with {} workers (queue {}){}",
            self.domain,
            workers,
            self.config.queue_capacity,
            if self.dry_run { " [dry-run]" } else { "" }
        );

        let (tx, rx) = async_channel::bounded(self.config.queue_capacity.max(1));
        let materializer = Arc::new(
            Materializer::new(self.tracking.clone(), self.target.clone())
                .with_dry_run(self.dry_run),
        );

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let materializer = materializer.clone();
            let policy = self.config.on_target_failure;
            let stop = stop.clone();
            handles.push(tokio::spawn(async move {
                materializer.run_worker(worker_id, rx, policy, stop).await
            }));
        }

        // Channel closes once every worker has exited
        drop(rx);

        // `tx` is moved in and dropped when the scan ends, which drains the
        // workers. After a failed scan they still finish the queued units.
        let scan = self.first_stage.run(tx, &stop).await;

        let mut stats = PipelineStats::new();
        let mut task_failure = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => {
                    warn!("{}: worker task failed: {}", self.domain, e);
                    task_failure = Some(e.to_string());
                }
            }
        }

        stats.merge(scan);
        if let Some(message) = task_failure {
            return Err(MigrateError::Task(format!(
                "{}: worker task failed: {}",
                self.domain, message
            )));
        }

        stats.cancelled = cancel.is_cancelled();
        stats.elapsed = start.elapsed();

        info!("{}: {}", self.domain, stats.summary());
        if let Some(e) = &stats.scan_error {
            warn!("{}: scan failed, remaining records left unmigrated: {}", self.domain, e);
        }
        if stats.aborted {
            warn!("{}: aborted after target write failure", self.domain);
        }

        Ok(stats)
    }
}
