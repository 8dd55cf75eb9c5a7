//! Database-backed tracking store.
//!
//! Stores tracking records in PostgreSQL within the configured schema.
//! `target_ref` is set with a conditional `UPDATE ... WHERE target_ref IS NULL`,
//! so concurrent writers can never overwrite an existing reference.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;

use super::{RecordKey, TargetRef, TrackingFilter, TrackingRecord, TrackingStore, TrackingSummary, TypeProgress};
use crate::error::Result;

const COLUMNS: &str =
    "domain, source_type, source_id, source_last_updated, attributes, target_ref";

/// PostgreSQL tracking store.
pub struct DbTrackingStore {
    pool: Pool,
    schema: String,
}

impl DbTrackingStore {
    /// Create a new database tracking store. `schema` must be a validated identifier.
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.tracking_records", self.schema)
    }
}

fn row_to_record(row: &Row) -> TrackingRecord {
    TrackingRecord {
        domain: row.get("domain"),
        source_type: row.get("source_type"),
        source_id: row.get("source_id"),
        source_last_updated: row.get("source_last_updated"),
        attributes: row.get("attributes"),
        target_ref: row.get::<_, Option<uuid::Uuid>>("target_ref").map(TargetRef),
    }
}

#[async_trait]
impl TrackingStore for DbTrackingStore {
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
                    source_type TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    domain TEXT NOT NULL,
                    source_last_updated TIMESTAMPTZ NOT NULL,
                    attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    target_ref UUID,
                    migrated_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (source_type, source_id)
                )",
                self.table()
            ),
            &[],
        )
        .await?;

        // Stage 1 scans only unmigrated rows of one domain
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_tracking_unmigrated
                    ON {}(domain, source_type, source_id)
                    WHERE target_ref IS NULL",
                self.table()
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    async fn upsert_discovered(&self, record: TrackingRecord) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO {} (domain, source_type, source_id, source_last_updated, attributes)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (source_type, source_id) DO UPDATE SET
                    domain = EXCLUDED.domain,
                    source_last_updated = EXCLUDED.source_last_updated,
                    attributes = EXCLUDED.attributes",
                self.table()
            ),
            &[
                &record.domain,
                &record.source_type,
                &record.source_id,
                &record.source_last_updated,
                &record.attributes,
            ],
        )
        .await?;
        Ok(())
    }

    async fn scan_unmigrated(
        &self,
        domain: &str,
        content_types: Option<&[String]>,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Vec<TrackingRecord>> {
        let conn = self.pool.get().await?;
        let types: Option<Vec<String>> = content_types.map(|t| t.to_vec());
        let (after_type, after_id) = keyset_cursor(after);
        let limit = limit as i64;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM {}
                     WHERE domain = $1
                       AND target_ref IS NULL
                       AND ($2::text[] IS NULL OR source_type = ANY($2))
                       AND ($3::text IS NULL OR (source_type, source_id) > ($3, $4::text))
                     ORDER BY source_type, source_id
                     LIMIT $5",
                    COLUMNS,
                    self.table()
                ),
                &[&domain, &types, &after_type, &after_id, &limit],
            )
            .await?;

        debug!("Scanned {} unmigrated {} records", rows.len(), domain);
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn set_target_ref(&self, key: &RecordKey, target: TargetRef) -> Result<bool> {
        let conn = self.pool.get().await?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET target_ref = $3, migrated_at = NOW()
                     WHERE source_type = $1 AND source_id = $2 AND target_ref IS NULL",
                    self.table()
                ),
                &[&key.source_type, &key.source_id, &target.0],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TrackingRecord>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE source_type = $1 AND source_id = $2",
                    COLUMNS,
                    self.table()
                ),
                &[&key.source_type, &key.source_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn query(&self, filter: &TrackingFilter) -> Result<Vec<TrackingRecord>> {
        let conn = self.pool.get().await?;

        let limit = filter.limit.map(|l| l as i64);
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if !filter.source_ids.is_empty() {
            params.push(&filter.source_ids);
            clauses.push(format!("source_id = ANY(${})", params.len()));
        }
        if !filter.source_types.is_empty() {
            params.push(&filter.source_types);
            clauses.push(format!("source_type = ANY(${})", params.len()));
        }
        if let Some(after) = &filter.last_updated_after {
            params.push(after);
            clauses.push(format!("source_last_updated >= ${}", params.len()));
        }
        if let Some(before) = &filter.last_updated_before {
            params.push(before);
            clauses.push(format!("source_last_updated < ${}", params.len()));
        }
        match filter.migrated {
            Some(true) => clauses.push("target_ref IS NOT NULL".to_string()),
            Some(false) => clauses.push("target_ref IS NULL".to_string()),
            None => {}
        }

        let mut sql = format!("SELECT {} FROM {}", COLUMNS, self.table());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY source_type, source_id");
        if let Some(limit) = &limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let rows = conn.query(&sql, &params).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn summary(&self) -> Result<TrackingSummary> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT source_type,
                            COUNT(*) FILTER (WHERE target_ref IS NOT NULL) AS migrated,
                            COUNT(*) FILTER (WHERE target_ref IS NULL) AS unmigrated
                     FROM {}
                     GROUP BY source_type",
                    self.table()
                ),
                &[],
            )
            .await?;

        let mut summary = TrackingSummary::default();
        for row in rows {
            let migrated: i64 = row.get("migrated");
            let unmigrated: i64 = row.get("unmigrated");
            summary.by_type.insert(
                row.get("source_type"),
                TypeProgress {
                    migrated: migrated as u64,
                    unmigrated: unmigrated as u64,
                },
            );
        }
        Ok(summary)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

/// Keyset cursor parameters. The first page binds NULLs so that no key,
/// including `('', '')`, is excluded.
fn keyset_cursor(after: Option<&RecordKey>) -> (Option<&str>, Option<&str>) {
    match after {
        Some(key) => (Some(key.source_type.as_str()), Some(key.source_id.as_str())),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_has_no_lower_bound() {
        assert_eq!(keyset_cursor(None), (None, None));

        let key = RecordKey::new("iso", "a");
        assert_eq!(keyset_cursor(Some(&key)), (Some("iso"), Some("a")));
    }
}
