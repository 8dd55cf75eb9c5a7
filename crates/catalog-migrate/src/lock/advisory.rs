//! PostgreSQL session advisory lock.
//!
//! The lock belongs to the database session, so the guard keeps the pooled
//! connection checked out for the whole run. Losing the session (crash,
//! network failure) frees the lock.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};

use super::{RunLock, RunLockGuard};
use crate::error::{MigrateError, Result};

/// Cross-process run lock backed by `pg_try_advisory_lock`.
pub struct PgAdvisoryLock {
    pool: Pool,
}

impl PgAdvisoryLock {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunLock for PgAdvisoryLock {
    async fn try_acquire(&self, resource: &str) -> Result<Option<RunLockGuard>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "acquiring run lock connection"))?;

        let row = conn
            .query_one(
                "SELECT pg_try_advisory_lock(hashtext($1)::bigint)",
                &[&resource],
            )
            .await?;
        let locked: bool = row.get(0);

        Ok(locked.then(|| RunLockGuard::advisory(resource, conn)))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

pub(super) async fn unlock(conn: &Object, resource: &str) -> Result<()> {
    let row = conn
        .query_one(
            "SELECT pg_advisory_unlock(hashtext($1)::bigint)",
            &[&resource],
        )
        .await?;
    let unlocked: bool = row.get(0);
    if !unlocked {
        return Err(MigrateError::pool(
            format!("advisory lock '{}' was not held by this session", resource),
            "releasing run lock",
        ));
    }
    Ok(())
}
