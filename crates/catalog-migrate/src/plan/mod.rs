//! Migration plans: which domains a run migrates, in what order.
//!
//! A plan is an immutable YAML document:
//!
//! ```yaml
//! id: nightly
//! description: ISO and container content
//! entries:
//!   - domain: iso
//!     importers:
//!       - name: mirror
//!         importer_type: iso_importer
//!         config:
//!           feed: https://example.com/isos/
//!   - domain: docker
//!     content_types: [docker_manifest, docker_tag]
//! ```

mod store;

pub use store::{FilePlanStore, MemoryPlanStore, PlanStore};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{MigrateError, Result};

/// An importer (sync source) to migrate alongside a domain's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImporterPlan {
    pub name: String,
    pub importer_type: String,
    #[serde(default)]
    pub config: Value,
}

/// One domain in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub domain: String,

    /// Restrict content migration to these source types (default: all).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub importers: Vec<ImporterPlan>,
}

impl PlanEntry {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            content_types: None,
            importers: Vec::new(),
        }
    }
}

/// Ordered list of domains to migrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

impl MigrationPlan {
    pub fn new(id: impl Into<String>, entries: Vec<PlanEntry>) -> Self {
        Self {
            id: id.into(),
            description: None,
            entries,
        }
    }

    /// Load a plan from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a plan from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Structural checks that need no registry.
    pub fn validate(&self) -> Result<()> {
        if !is_plan_id(&self.id) {
            return Err(MigrateError::Config(format!(
                "invalid plan id '{}': use letters, digits, '-', '_' or '.'",
                self.id
            )));
        }
        if self.entries.is_empty() {
            return Err(MigrateError::Config(format!(
                "plan '{}' has no entries",
                self.id
            )));
        }

        let mut domains = HashSet::new();
        for entry in &self.entries {
            if entry.domain.trim().is_empty() {
                return Err(MigrateError::Config(format!(
                    "plan '{}' has an entry without a domain",
                    self.id
                )));
            }
            if !domains.insert(entry.domain.as_str()) {
                return Err(MigrateError::Config(format!(
                    "plan '{}' lists domain '{}' more than once",
                    self.id, entry.domain
                )));
            }
            if matches!(&entry.content_types, Some(types) if types.is_empty()) {
                return Err(MigrateError::Config(format!(
                    "plan '{}': content_types for '{}' is empty",
                    self.id, entry.domain
                )));
            }

            let mut importers = HashSet::new();
            for importer in &entry.importers {
                if !importers.insert(importer.name.as_str()) {
                    return Err(MigrateError::Config(format!(
                        "plan '{}': importer '{}' appears twice under '{}'",
                        self.id, importer.name, entry.domain
                    )));
                }
            }
        }

        Ok(())
    }

    /// Domain names in plan order.
    pub fn domains(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.domain.as_str()).collect()
    }

    /// SHA-256 of the canonical JSON form, reported with each run.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }
}

/// Plan ids double as file names.
pub(crate) fn is_plan_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
id: nightly
entries:
  - domain: iso
    importers:
      - name: mirror
        importer_type: iso_importer
        config:
          feed: https://example.com/isos/
  - domain: docker
    content_types: [docker_manifest, docker_tag]
"#;

    #[test]
    fn test_parse_plan() {
        let plan = MigrationPlan::from_yaml(PLAN).unwrap();
        assert_eq!(plan.id, "nightly");
        assert_eq!(plan.domains(), vec!["iso", "docker"]);
        assert_eq!(plan.entries[0].importers[0].config["feed"], "https://example.com/isos/");
        assert_eq!(
            plan.entries[1].content_types.as_deref(),
            Some(&["docker_manifest".to_string(), "docker_tag".to_string()][..])
        );
        plan.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_domain() {
        let plan = MigrationPlan::new("p", vec![PlanEntry::new("iso"), PlanEntry::new("iso")]);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_empty_plan_and_bad_id() {
        assert!(MigrationPlan::new("p", vec![]).validate().is_err());
        assert!(MigrationPlan::new("../etc", vec![PlanEntry::new("iso")])
            .validate()
            .is_err());
        assert!(MigrationPlan::new("", vec![PlanEntry::new("iso")])
            .validate()
            .is_err());
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = MigrationPlan::new("p", vec![PlanEntry::new("iso")]);
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);

        b.entries.push(PlanEntry::new("docker"));
        assert_ne!(a.digest(), b.digest());
    }
}
