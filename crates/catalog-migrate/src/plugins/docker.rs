//! Docker domain, migrated into the `container` plugin.

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

pub const DOMAIN: &str = "docker";
pub const COLLECTION: &str = "units_docker_manifest";
pub const TARGET_PLUGIN: &str = "container";

const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

pub struct DockerMigrator {
    content_types: ContentTypeMap,
    importers: ImporterMap,
}

impl DockerMigrator {
    pub fn new() -> Self {
        let mut content_types = ContentTypeMap::new();
        content_types.insert("docker_blob".to_string(), Arc::new(BlobContent) as _);
        content_types.insert(
            "docker_manifest".to_string(),
            Arc::new(ManifestContent { list: false }) as _,
        );
        content_types.insert(
            "docker_manifest_list".to_string(),
            Arc::new(ManifestContent { list: true }) as _,
        );
        content_types.insert("docker_tag".to_string(), Arc::new(TagContent) as _);

        let mut importers = ImporterMap::new();
        importers.insert("docker_importer".to_string(), Arc::new(DockerImporter) as _);

        Self {
            content_types,
            importers,
        }
    }
}

impl Default for DockerMigrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Migrator for DockerMigrator {
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

struct BlobContent;

impl ContentConverter for BlobContent {
    fn target_type(&self) -> &str {
        "container.blob"
    }

    fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity> {
        let digest = required_str(record, "digest")?;
        Ok(TargetEntity::new(self.target_type(), digest).with_field("digest", digest))
    }
}

/// Image manifests and manifest lists share one target model and differ
/// only in media type.
struct ManifestContent {
    list: bool,
}

impl ContentConverter for ManifestContent {
    fn target_type(&self) -> &str {
        "container.manifest"
    }

    fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity> {
        let digest = required_str(record, "digest")?;
        let schema_version = record.attr_i64("schema_version").unwrap_or(2);
        let media_type = match (self.list, schema_version) {
            (true, _) => MANIFEST_LIST,
            (false, 1) => MANIFEST_V1,
            (false, _) => MANIFEST_V2,
        };

        Ok(TargetEntity::new(self.target_type(), digest)
            .with_field("digest", digest)
            .with_field("schema_version", schema_version)
            .with_field("media_type", media_type))
    }
}

struct TagContent;

impl ContentConverter for TagContent {
    fn target_type(&self) -> &str {
        "container.tag"
    }

    fn convert(&self, record: &TrackingRecord) -> Result<TargetEntity> {
        let name = required_str(record, "name")?;
        let manifest_digest = required_str(record, "manifest_digest")?;

        Ok(
            TargetEntity::new(self.target_type(), format!("{name}:{manifest_digest}"))
                .with_field("name", name)
                .with_field("tagged_manifest", manifest_digest),
        )
    }
}

struct DockerImporter;

impl ImporterConverter for DockerImporter {
    fn target_type(&self) -> &str {
        "container.remote"
    }

    fn convert(&self, name: &str, config: &Value) -> Result<TargetEntity> {
        let url = required_config_str(name, config, "feed")?;
        let upstream_name = required_config_str(name, config, "upstream_name")?;

        let mut entity = TargetEntity::new(self.target_type(), name)
            .with_field("name", name)
            .with_field("url", url)
            .with_field("upstream_name", upstream_name);
        if let Some(tags) = config.get("tags") {
            entity = entity.with_field("include_tags", tags.clone());
        }
        if let Some(value) = config.get("ssl_validation") {
            entity = entity.with_field("tls_validation", value.clone());
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(source_type: &str, attributes: Value) -> TrackingRecord {
        TrackingRecord::new(DOMAIN, source_type, "u1", Utc::now()).with_attributes(attributes)
    }

    #[test]
    fn test_manifest_media_types() {
        let migrator = DockerMigrator::new();
        let map = migrator.content_type_map();

        let v1 = map["docker_manifest"]
            .convert(&record("docker_manifest", json!({"digest": "sha256:a", "schema_version": 1})))
            .unwrap();
        assert_eq!(v1.fields["media_type"], MANIFEST_V1);

        let list = map["docker_manifest_list"]
            .convert(&record("docker_manifest_list", json!({"digest": "sha256:b"})))
            .unwrap();
        assert_eq!(list.entity_type, "container.manifest");
        assert_eq!(list.fields["media_type"], MANIFEST_LIST);
    }

    #[test]
    fn test_tag_natural_key() {
        let tag = TagContent
            .convert(&record(
                "docker_tag",
                json!({"name": "latest", "manifest_digest": "sha256:c"}),
            ))
            .unwrap();
        assert_eq!(tag.natural_key, "latest:sha256:c");
        assert_eq!(tag.fields["tagged_manifest"], "sha256:c");
    }

    #[test]
    fn test_blob_requires_digest() {
        assert!(BlobContent.convert(&record("docker_blob", json!({}))).is_err());
    }

    #[test]
    fn test_importer_requires_upstream_name() {
        assert!(DockerImporter
            .convert("hub", &json!({"feed": "https://registry-1.docker.io"}))
            .is_err());

        let remote = DockerImporter
            .convert(
                "hub",
                &json!({
                    "feed": "https://registry-1.docker.io",
                    "upstream_name": "library/busybox",
                    "tags": ["latest"]
                }),
            )
            .unwrap();
        assert_eq!(remote.fields["upstream_name"], "library/busybox");
        assert_eq!(remote.fields["include_tags"], json!(["latest"]));
    }
}
