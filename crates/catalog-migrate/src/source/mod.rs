//! Source system probe.
//!
//! The engine never reads source documents directly; the pre-migration step
//! has already copied what it needs into tracking records. The only question
//! asked of the source system is whether a domain's collection has documents.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;

/// Existence probe against the source system.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// Does `collection` hold at least one document?
    async fn collection_has_documents(&self, collection: &str) -> Result<bool>;
}

/// Probe answered from a fixed set of non-empty collections.
///
/// Built from `source.installed_collections`; it stands in for a live
/// existence query against the source system.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceProbe {
    collections: HashSet<String>,
}

impl StaticSourceProbe {
    pub fn new<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collections: collections.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SourceProbe for StaticSourceProbe {
    async fn collection_has_documents(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.contains(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_probe() {
        let probe = StaticSourceProbe::new(["units_iso"]);
        assert!(probe.collection_has_documents("units_iso").await.unwrap());
        assert!(!probe.collection_has_documents("units_rpm").await.unwrap());
    }
}
