//! In-memory tracking store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

use super::{RecordKey, TargetRef, TrackingFilter, TrackingRecord, TrackingStore, TrackingSummary};
use crate::error::Result;

/// Tracking store held in process memory.
///
/// Records are kept in a `BTreeMap` so scans come back in key order,
/// matching the ordering of the database backend.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    records: RwLock<BTreeMap<RecordKey, TrackingRecord>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = TrackingRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_discovered(&self, record: TrackingRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.key()) {
            Some(existing) => {
                existing.domain = record.domain;
                existing.source_last_updated = record.source_last_updated;
                existing.attributes = record.attributes;
            }
            None => {
                let mut record = record;
                record.target_ref = None;
                records.insert(record.key(), record);
            }
        }
        Ok(())
    }

    async fn scan_unmigrated(
        &self,
        domain: &str,
        content_types: Option<&[String]>,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Vec<TrackingRecord>> {
        let records = self.records.read().await;
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        let page = records
            .range((lower, Bound::Unbounded))
            .map(|(_, r)| r)
            .filter(|r| r.domain == domain && !r.is_migrated())
            .filter(|r| content_types.map_or(true, |types| types.contains(&r.source_type)))
            .take(limit)
            .cloned()
            .collect();

        Ok(page)
    }

    async fn set_target_ref(&self, key: &RecordKey, target: TargetRef) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) if record.target_ref.is_none() => {
                record.target_ref = Some(target);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TrackingRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn query(&self, filter: &TrackingFilter) -> Result<Vec<TrackingRecord>> {
        let records = self.records.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn summary(&self) -> Result<TrackingSummary> {
        let records = self.records.read().await;
        let mut summary = TrackingSummary::default();
        for record in records.values() {
            summary.record(&record.source_type, record.is_migrated());
        }
        Ok(summary)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(domain: &str, source_type: &str, id: &str) -> TrackingRecord {
        TrackingRecord::new(domain, source_type, id, Utc::now())
    }

    #[tokio::test]
    async fn test_set_target_ref_only_once() {
        let store = MemoryTrackingStore::with_records([record("iso", "iso", "1")]);
        let key = RecordKey::new("iso", "1");

        let first = TargetRef::new();
        assert!(store.set_target_ref(&key, first).await.unwrap());
        assert!(!store.set_target_ref(&key, TargetRef::new()).await.unwrap());

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.target_ref, Some(first));
    }

    #[tokio::test]
    async fn test_set_target_ref_missing_record() {
        let store = MemoryTrackingStore::new();
        let key = RecordKey::new("iso", "missing");
        assert!(!store.set_target_ref(&key, TargetRef::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pages_in_key_order() {
        let store = MemoryTrackingStore::with_records(
            ["c", "a", "b", "d"].iter().map(|id| record("iso", "iso", id)),
        );

        let first = store.scan_unmigrated("iso", None, None, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let cursor = first.last().unwrap().key();
        let second = store
            .scan_unmigrated("iso", None, Some(&cursor), 2)
            .await
            .unwrap();
        let ids: Vec<_> = second.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_first_page_includes_empty_key() {
        let store =
            MemoryTrackingStore::with_records([record("iso", "", ""), record("iso", "iso", "a")]);
        let page = store.scan_unmigrated("iso", None, None, 10).await.unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec![RecordKey::new("", ""), RecordKey::new("iso", "a")]);
    }

    #[tokio::test]
    async fn test_scan_skips_migrated_and_other_domains() {
        let mut done = record("iso", "iso", "done");
        done.target_ref = Some(TargetRef::new());
        let store = MemoryTrackingStore::with_records([
            done,
            record("iso", "iso", "pending"),
            record("docker", "docker_tag", "tag"),
        ]);

        let page = store.scan_unmigrated("iso", None, None, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].source_id, "pending");
    }

    #[tokio::test]
    async fn test_scan_content_type_restriction() {
        let store = MemoryTrackingStore::with_records([
            record("docker", "docker_tag", "t"),
            record("docker", "docker_blob", "b"),
        ]);
        let types = vec!["docker_blob".to_string()];
        let page = store
            .scan_unmigrated("docker", Some(&types), None, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].source_type, "docker_blob");
    }

    #[tokio::test]
    async fn test_upsert_discovered_preserves_target_ref() {
        let store = MemoryTrackingStore::new();
        store.upsert_discovered(record("iso", "iso", "1")).await.unwrap();
        let key = RecordKey::new("iso", "1");
        let target = TargetRef::new();
        store.set_target_ref(&key, target).await.unwrap();

        let refreshed = record("iso", "iso", "1").with_attributes(serde_json::json!({"name": "x"}));
        store.upsert_discovered(refreshed).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.target_ref, Some(target));
        assert_eq!(stored.attr_str("name"), Some("x"));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let mut done = record("iso", "iso", "done");
        done.target_ref = Some(TargetRef::new());
        let store = MemoryTrackingStore::with_records([done, record("iso", "iso", "pending")]);

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.migrated(), 1);
        assert_eq!(summary.unmigrated(), 1);
    }
}
