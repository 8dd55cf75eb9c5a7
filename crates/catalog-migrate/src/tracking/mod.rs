//! Tracking records correlating source units with migrated target entities.
//!
//! A [`TrackingRecord`] is written by the pre-migration step when a source
//! unit is first discovered. The engine only ever mutates one field of it:
//! `target_ref`, which moves from unset to set exactly once, through
//! [`TrackingStore::set_target_ref`].
//!
//! Backends:
//!
//! - **Memory**: [`MemoryTrackingStore`] for tests and single-process runs
//! - **PostgreSQL**: [`DbTrackingStore`] in `db.rs`

mod db;
mod memory;

pub use db::DbTrackingStore;
pub use memory::MemoryTrackingStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Stable reference to an entity in the target catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRef(pub Uuid);

impl TargetRef {
    /// Allocate a fresh reference.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a tracking record: source ids are unique per content type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source_type: String,
    pub source_id: String,
}

impl RecordKey {
    pub fn new(source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source_id)
    }
}

/// One source unit known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Domain the pre-migration step discovered this unit under.
    pub domain: String,

    /// Identifier in the source system.
    pub source_id: String,

    /// Source content-type tag.
    pub source_type: String,

    /// Last-modified marker from the source system.
    pub source_last_updated: DateTime<Utc>,

    /// Detail payload captured by the pre-migration step.
    #[serde(default)]
    pub attributes: serde_json::Value,

    /// Created target entity; `None` until migrated.
    #[serde(default)]
    pub target_ref: Option<TargetRef>,
}

impl TrackingRecord {
    /// Create an unmigrated record.
    pub fn new(
        domain: impl Into<String>,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        source_last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            source_id: source_id.into(),
            source_type: source_type.into(),
            source_last_updated,
            attributes: serde_json::Value::Object(Default::default()),
            target_ref: None,
        }
    }

    /// Attach the pre-migrated detail payload.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.source_type, &self.source_id)
    }

    pub fn is_migrated(&self) -> bool {
        self.target_ref.is_some()
    }

    /// Read a string attribute from the detail payload.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    /// Read an integer attribute from the detail payload.
    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(|v| v.as_i64())
    }
}

/// Read-only query over tracking records, used for progress reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingFilter {
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub last_updated_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated_before: Option<DateTime<Utc>>,
    /// `Some(true)` selects migrated records, `Some(false)` unmigrated ones.
    #[serde(default)]
    pub migrated: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TrackingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_types.push(source_type.into());
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.push(source_id.into());
        self
    }

    pub fn with_migrated(mut self, migrated: bool) -> Self {
        self.migrated = Some(migrated);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every set criterion.
    pub fn matches(&self, record: &TrackingRecord) -> bool {
        if !self.source_ids.is_empty() && !self.source_ids.contains(&record.source_id) {
            return false;
        }
        if !self.source_types.is_empty() && !self.source_types.contains(&record.source_type) {
            return false;
        }
        if let Some(after) = self.last_updated_after {
            if record.source_last_updated < after {
                return false;
            }
        }
        if let Some(before) = self.last_updated_before {
            if record.source_last_updated >= before {
                return false;
            }
        }
        match self.migrated {
            Some(migrated) => record.is_migrated() == migrated,
            None => true,
        }
    }
}

/// Migrated/unmigrated counts for one content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProgress {
    pub migrated: u64,
    pub unmigrated: u64,
}

/// Progress summary across the whole tracking store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub by_type: BTreeMap<String, TypeProgress>,
}

impl TrackingSummary {
    pub fn record(&mut self, source_type: &str, migrated: bool) {
        let entry = self.by_type.entry(source_type.to_string()).or_default();
        if migrated {
            entry.migrated += 1;
        } else {
            entry.unmigrated += 1;
        }
    }

    pub fn migrated(&self) -> u64 {
        self.by_type.values().map(|p| p.migrated).sum()
    }

    pub fn unmigrated(&self) -> u64 {
        self.by_type.values().map(|p| p.unmigrated).sum()
    }

    pub fn total(&self) -> u64 {
        self.migrated() + self.unmigrated()
    }
}

/// Storage contract for tracking records.
///
/// Implementations must be `Send + Sync` to allow sharing across the
/// pipeline's worker tasks.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create tables/indexes. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Insert or refresh a record discovered by the pre-migration step.
    ///
    /// An existing record keeps its `target_ref`; only the source-side
    /// fields are refreshed.
    async fn upsert_discovered(&self, record: TrackingRecord) -> Result<()>;

    /// Fetch a page of unmigrated records for a domain in key order.
    ///
    /// `content_types` restricts the scan when set; `after` is the last key
    /// of the previous page.
    async fn scan_unmigrated(
        &self,
        domain: &str,
        content_types: Option<&[String]>,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Vec<TrackingRecord>>;

    /// Set `target_ref` if and only if it is still unset.
    ///
    /// Returns `false` when the record was already migrated (or is missing);
    /// the stored reference is never overwritten.
    async fn set_target_ref(&self, key: &RecordKey, target: TargetRef) -> Result<bool>;

    /// Look up one record.
    async fn get(&self, key: &RecordKey) -> Result<Option<TrackingRecord>>;

    /// List records matching a filter, in key order.
    async fn query(&self, filter: &TrackingFilter) -> Result<Vec<TrackingRecord>>;

    /// Per-type progress counts.
    async fn summary(&self) -> Result<TrackingSummary>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}
