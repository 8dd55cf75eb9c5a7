//! Plan storage backends.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::{is_plan_id, MigrationPlan};
use crate::error::{MigrateError, Result};

/// Read access to stored migration plans.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Fetch a plan, or `PlanNotFound`.
    async fn get(&self, id: &str) -> Result<MigrationPlan>;

    /// Stored plan ids, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Plans stored as `<dir>/<id>.yaml`.
#[derive(Debug, Clone)]
pub struct FilePlanStore {
    dir: PathBuf,
}

impl FilePlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }
}

#[async_trait]
impl PlanStore for FilePlanStore {
    async fn get(&self, id: &str) -> Result<MigrationPlan> {
        if !is_plan_id(id) {
            return Err(MigrateError::PlanNotFound(id.to_string()));
        }

        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MigrateError::PlanNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded plan {} from {}", id, path.display());

        let mut plan = MigrationPlan::from_yaml(&content)?;
        if plan.id.is_empty() {
            plan.id = id.to_string();
        } else if plan.id != id {
            return Err(MigrateError::Config(format!(
                "{} declares id '{}'",
                path.display(),
                plan.id
            )));
        }
        Ok(plan)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_plan_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Plans held in memory.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    plans: RwLock<BTreeMap<String, MigrationPlan>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: impl IntoIterator<Item = MigrationPlan>) -> Self {
        Self {
            plans: RwLock::new(plans.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }

    /// Add or replace a plan.
    pub async fn insert(&self, plan: MigrationPlan) {
        self.plans.write().await.insert(plan.id.clone(), plan);
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn get(&self, id: &str) -> Result<MigrationPlan> {
        self.plans
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MigrateError::PlanNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.plans.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanEntry;

    #[tokio::test]
    async fn test_file_store_reads_plan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nightly.yaml"),
            "entries:\n  - domain: iso\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = FilePlanStore::new(dir.path());
        let plan = store.get("nightly").await.unwrap();
        assert_eq!(plan.id, "nightly");
        assert_eq!(plan.domains(), vec!["iso"]);
        assert_eq!(store.list().await.unwrap(), vec!["nightly"]);
    }

    #[tokio::test]
    async fn test_file_store_missing_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());

        assert!(matches!(
            store.get("absent").await,
            Err(MigrateError::PlanNotFound(_))
        ));
        assert!(matches!(
            store.get("../escape").await,
            Err(MigrateError::PlanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_mismatched_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "id: b\nentries:\n  - domain: iso\n",
        )
        .unwrap();

        let store = FilePlanStore::new(dir.path());
        assert!(matches!(store.get("a").await, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPlanStore::new();
        store
            .insert(MigrationPlan::new("p1", vec![PlanEntry::new("iso")]))
            .await;

        assert_eq!(store.get("p1").await.unwrap().entries.len(), 1);
        assert!(store.get("p2").await.is_err());
        assert_eq!(store.list().await.unwrap(), vec!["p1"]);
    }
}
