//! ISO file domain, migrated into the `file` plugin.
//!
//! Tracking attributes for an `iso` record: `name` (relative path),
//! `checksum` (sha256 hex) and `size` (bytes).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::migrator::{
    required_config_str, required_str, ContentConverter, ContentTypeMap, ImporterConverter,
    ImporterMap, Migrator,
};
use crate::target::TargetEntity;
use crate::tracking::TrackingRecord;

pub const DOMAIN: &str = "iso";
pub const COLLECTION: &str = "units_iso";
pub const TARGET_PLUGIN: &str = "file";

/// Manifest file every file-plugin remote points at.
const MANIFEST_NAME: &str = "PULP_MANIFEST";

pub struct IsoMigrator {
    content_types: ContentTypeMap,
    importers: ImporterMap,
}

impl IsoMigrator {
    pub fn new() -> Self {
        let mut content_types = ContentTypeMap::new();
        content_types.insert("iso".to_string(), Arc::new(IsoContent) as _);

        let mut importers = ImporterMap::new();
        importers.insert("iso_importer".to_string(), Arc::new(IsoImporter) as _);

        Self {
            content_types,
            importers,
        }
    }
}

impl Default for IsoMigrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Migrator for IsoMigrator {
    fn domain_name(&self) -> &str {
        DOMAIN
    }

    fn source_collection(&self) -> &str {
        COLLECTION
    }

    fn target_plugin(&self) -> &str {
        TARGET_PLUGIN
    }

    fn content_type_map(&self) -> &ContentTypeMap {
        &self.content_types
    }

    fn importer_map(&self) -> &ImporterMap {
        &self.importers
    }
}

struct IsoContent;

impl ContentConverter for IsoContent {
    fn target_type(&self) -> &str {
        "file.file"
    }

    fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity> {
        let relative_path = required_str(record, "name")?;
        let digest = required_str(record, "checksum")?;

        let mut entity = TargetEntity::new(self.target_type(), format!("{relative_path}:{digest}"))
            .with_field("relative_path", relative_path)
            .with_field("digest", digest);
        if let Some(size) = record.attr_i64("size") {
            entity = entity.with_field("size", size);
        }
        Ok(entity)
    }
}

struct IsoImporter;

impl ImporterConverter for IsoImporter {
    fn target_type(&self) -> &str {
        "file.remote"
    }

    fn convert(&self, name: &str, config: &Value) -> Result<TargetEntity> {
        let feed = required_config_str(name, config, "feed")?;
        let url = if feed.ends_with(MANIFEST_NAME) {
            feed.to_string()
        } else {
            format!("{}/{}", feed.trim_end_matches('/'), MANIFEST_NAME)
        };

        let mut entity = TargetEntity::new(self.target_type(), name)
            .with_field("name", name)
            .with_field("url", url);
        for key in ["ssl_validation", "proxy_url", "download_policy"] {
            if let Some(value) = config.get(key) {
                entity = entity.with_field(key, value.clone());
            }
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_iso_content_natural_key() {
        let record = TrackingRecord::new(DOMAIN, "iso", "u1", Utc::now())
            .with_attributes(json!({"name": "disk1.iso", "checksum": "abc123", "size": 2048}));
        let entity = IsoContent.convert(&record).unwrap();

        assert_eq!(entity.entity_type, "file.file");
        assert_eq!(entity.natural_key, "disk1.iso:abc123");
        assert_eq!(entity.fields["size"], 2048);
    }

    #[test]
    fn test_iso_content_requires_checksum() {
        let record = TrackingRecord::new(DOMAIN, "iso", "u1", Utc::now())
            .with_attributes(json!({"name": "disk1.iso"}));
        assert!(matches!(
            IsoContent.convert(&record),
            Err(MigrateError::InvalidEntity { .. })
        ));
    }

    #[test]
    fn test_iso_importer_appends_manifest() {
        let entity = IsoImporter
            .convert("mirror", &json!({"feed": "https://example.com/isos/", "ssl_validation": false}))
            .unwrap();
        assert_eq!(entity.fields["url"], "https://example.com/isos/PULP_MANIFEST");
        assert_eq!(entity.fields["ssl_validation"], false);

        let entity = IsoImporter
            .convert("m2", &json!({"feed": "https://example.com/PULP_MANIFEST"}))
            .unwrap();
        assert_eq!(entity.fields["url"], "https://example.com/PULP_MANIFEST");
    }

    #[test]
    fn test_descriptor() {
        let migrator = IsoMigrator::new();
        assert_eq!(migrator.domain_name(), "iso");
        assert_eq!(migrator.source_collection(), "units_iso");
        assert!(migrator.content_type_map().contains_key("iso"));
        assert!(migrator.importer_map().contains_key("iso_importer"));
    }
}
