//! Stage 1: tracking records to declarative content.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DeclarativeContent, PipelineStats, RecordError, RecordErrorKind};
use crate::error::MigrateError;
use crate::migrator::ContentTypeMap;
use crate::tracking::{RecordKey, TrackingRecord, TrackingStore};

/// Scans a domain's unmigrated records page by page and emits one
/// [`DeclarativeContent`] per record it can convert.
///
/// Records are read with a keyset cursor, so units migrated by stage 2 while
/// the scan is in progress never shift the remaining pages.
pub struct ContentMigrationFirstStage {
    domain: String,
    converters: ContentTypeMap,
    restrict: Option<Vec<String>>,
    tracking: Arc<dyn TrackingStore>,
    batch_size: usize,
}

impl ContentMigrationFirstStage {
    pub fn new(
        domain: impl Into<String>,
        converters: ContentTypeMap,
        tracking: Arc<dyn TrackingStore>,
    ) -> Self {
        Self {
            domain: domain.into(),
            converters,
            restrict: None,
            tracking,
            batch_size: 500,
        }
    }

    /// Only scan these source content types.
    pub fn with_content_types(mut self, content_types: Option<Vec<String>>) -> Self {
        self.restrict = content_types;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Convert one record with its content type's converter.
    pub fn convert(
        &self,
        record: &TrackingRecord,
    ) -> std::result::Result<DeclarativeContent, RecordError> {
        let key = record.key();
        let converter = self.converters.get(&record.source_type).ok_or_else(|| {
            let err = MigrateError::UnknownContentType {
                content_type: record.source_type.clone(),
                source_id: record.source_id.clone(),
            };
            RecordError::new(&key, RecordErrorKind::UnknownContentType, err.to_string())
        })?;

        let entity = converter
            .convert(record)
            .map_err(|e| RecordError::new(&key, RecordErrorKind::ConversionFailed, e.to_string()))?;

        Ok(DeclarativeContent { record: key, entity })
    }

    /// Scan until exhausted, stopped, or every receiver is gone.
    ///
    /// Per-record conversion failures are counted in the returned stats. A
    /// failing scan query ends the scan and is kept in `scan_error`, along
    /// with whatever was counted before it.
    pub async fn run(
        &self,
        tx: async_channel::Sender<DeclarativeContent>,
        stop: &CancellationToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::new();
        let mut after: Option<RecordKey> = None;

        'scan: loop {
            if stop.is_cancelled() {
                break;
            }

            let page = match self
                .tracking
                .scan_unmigrated(
                    &self.domain,
                    self.restrict.as_deref(),
                    after.as_ref(),
                    self.batch_size,
                )
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("{}: scan failed after {} records: {}", self.domain, stats.scanned, e);
                    stats.scan_error = Some(e.to_string());
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            after = page.last().map(TrackingRecord::key);
            debug!("{}: scanned page of {} records", self.domain, page_len);

            for record in page {
                stats.scanned += 1;

                let unit = match self.convert(&record) {
                    Ok(unit) => unit,
                    Err(err) => {
                        warn!("{}: {}", self.domain, err.message);
                        stats.record_failure(err);
                        continue;
                    }
                };

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break 'scan,
                    sent = tx.send(unit) => {
                        if sent.is_err() {
                            debug!("{}: all workers stopped, ending scan", self.domain);
                            break 'scan;
                        }
                    }
                }
            }

            if page_len < self.batch_size {
                break;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::migrator::ContentConverter;
    use crate::target::TargetEntity;
    use crate::tracking::MemoryTrackingStore;
    use chrono::Utc;
    use serde_json::json;

    struct NameConverter;

    impl ContentConverter for NameConverter {
        fn target_type(&self) -> &str {
            "test.thing"
        }

        fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity> {
            let name = record
                .attr_str("name")
                .ok_or_else(|| MigrateError::invalid_entity(&record.source_id, "missing name"))?;
            Ok(TargetEntity::new(self.target_type(), name))
        }
    }

    fn converters() -> ContentTypeMap {
        let mut map = ContentTypeMap::new();
        map.insert("thing".to_string(), Arc::new(NameConverter) as _);
        map
    }

    fn record(source_type: &str, id: &str) -> TrackingRecord {
        TrackingRecord::new("test", source_type, id, Utc::now()).with_attributes(json!({"name": id}))
    }

    #[tokio::test]
    async fn test_unknown_type_is_reported_not_emitted() {
        let tracking = Arc::new(MemoryTrackingStore::with_records(vec![
            record("thing", "a"),
            record("gadget", "b"),
        ]));
        let stage = ContentMigrationFirstStage::new("test", converters(), tracking);

        let (tx, rx) = async_channel::bounded(10);
        let stats = stage.run(tx, &CancellationToken::new()).await;

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors[0].kind, RecordErrorKind::UnknownContentType);
        assert_eq!(stats.errors[0].source_id, "b");

        let unit = rx.recv().await.unwrap();
        assert_eq!(unit.entity.natural_key, "a");
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_pages_through_all_records() {
        let records: Vec<_> = (0..7).map(|i| record("thing", &format!("r{i}"))).collect();
        let tracking = Arc::new(MemoryTrackingStore::with_records(records));
        let stage = ContentMigrationFirstStage::new("test", converters(), tracking).with_batch_size(3);

        let (tx, rx) = async_channel::bounded(10);
        let stats = stage.run(tx, &CancellationToken::new()).await;

        assert_eq!(stats.scanned, 7);
        assert_eq!(rx.len(), 7);
    }

    #[tokio::test]
    async fn test_conversion_failure_is_reported() {
        let bad = TrackingRecord::new("test", "thing", "x", Utc::now());
        let tracking = Arc::new(MemoryTrackingStore::with_records(vec![bad]));
        let stage = ContentMigrationFirstStage::new("test", converters(), tracking);

        let (tx, _rx) = async_channel::bounded(10);
        let stats = stage.run(tx, &CancellationToken::new()).await;
        assert_eq!(stats.errors[0].kind, RecordErrorKind::ConversionFailed);
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let tracking = Arc::new(MemoryTrackingStore::with_records(vec![record("thing", "a")]));
        let stage = ContentMigrationFirstStage::new("test", converters(), tracking);
        let stop = CancellationToken::new();
        stop.cancel();

        let (tx, rx) = async_channel::bounded(10);
        let stats = stage.run(tx, &stop).await;
        assert_eq!(stats.scanned, 0);
        assert!(rx.is_empty());
    }
}
