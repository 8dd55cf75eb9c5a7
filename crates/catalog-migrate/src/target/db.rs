//! PostgreSQL target catalog.
//!
//! Entities live in a single table keyed by `(entity_type, natural_key)`.
//! `create_or_get` relies on `ON CONFLICT ... DO UPDATE ... RETURNING id` so
//! the existing row's id comes back when the entity was already created.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use tracing::debug;

use super::{TargetEntity, TargetStore};
use crate::error::{MigrateError, Result};
use crate::tracking::TargetRef;

/// PostgreSQL target store.
pub struct DbTargetStore {
    pool: Pool,
    schema: String,
}

impl DbTargetStore {
    /// Create a new target store. `schema` must be a validated identifier.
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.target_entities", self.schema)
    }
}

#[async_trait]
impl TargetStore for DbTargetStore {
    async fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    entity_type TEXT NOT NULL,
                    natural_key TEXT NOT NULL,
                    fields JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (entity_type, natural_key)
                )",
                self.table()
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    async fn create_or_get(&self, entity: &TargetEntity) -> Result<TargetRef> {
        entity
            .check_constraints()
            .map_err(|msg| MigrateError::target_creation(&entity.natural_key, msg))?;

        let conn = self.pool.get().await?;
        let candidate = TargetRef::new();
        let fields = Value::Object(entity.fields.clone());

        // The no-op update makes RETURNING yield the existing row on conflict
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO {} (id, entity_type, natural_key, fields)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (entity_type, natural_key)
                     DO UPDATE SET entity_type = EXCLUDED.entity_type
                     RETURNING id",
                    self.table()
                ),
                &[&candidate.0, &entity.entity_type, &entity.natural_key, &fields],
            )
            .await
            .map_err(|e| MigrateError::target_creation(&entity.natural_key, e.to_string()))?;

        let id: uuid::Uuid = row.get("id");
        if id != candidate.0 {
            debug!(
                "{} {} already existed as {}",
                entity.entity_type, entity.natural_key, id
            );
        }
        Ok(TargetRef(id))
    }

    async fn find(&self, entity_type: &str, natural_key: &str) -> Result<Option<TargetRef>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT id FROM {} WHERE entity_type = $1 AND natural_key = $2",
                    self.table()
                ),
                &[&entity_type, &natural_key],
            )
            .await?;
        Ok(row.map(|r| TargetRef(r.get("id"))))
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(&format!("SELECT COUNT(*) AS n FROM {}", self.table()), &[])
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
