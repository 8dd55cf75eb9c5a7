//! Global run lock.
//!
//! At most one migration run may be active against a tracking store. The
//! coordinator takes the lock before loading the plan and releases it on
//! every exit path: explicitly through [`RunLockGuard::release`], or from
//! `Drop` if the run future is torn down.
//!
//! Backends:
//!
//! - [`LocalRunLock`]: in-process, for single-process deployments and tests
//! - [`PgAdvisoryLock`]: PostgreSQL session advisory lock, across processes

mod advisory;

pub use advisory::PgAdvisoryLock;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{LockConfig, LockPolicy};
use crate::error::{MigrateError, Result};

/// Mutual exclusion over a named resource.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// Take the lock if it is free. `None` means another holder has it.
    async fn try_acquire(&self, resource: &str) -> Result<Option<RunLockGuard>>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

enum Held {
    Local(OwnedMutexGuard<()>),
    Advisory(deadpool_postgres::Object),
}

/// Proof of holding the run lock.
pub struct RunLockGuard {
    resource: String,
    held: Option<Held>,
}

impl RunLockGuard {
    fn local(resource: &str, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            resource: resource.to_string(),
            held: Some(Held::Local(guard)),
        }
    }

    fn advisory(resource: &str, conn: deadpool_postgres::Object) -> Self {
        Self {
            resource: resource.to_string(),
            held: Some(Held::Advisory(conn)),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Release the lock.
    ///
    /// If the advisory unlock fails the connection is closed instead, which
    /// ends the session and frees the lock server-side.
    pub async fn release(mut self) -> Result<()> {
        match self.held.take() {
            Some(Held::Local(guard)) => drop(guard),
            Some(Held::Advisory(conn)) => {
                if let Err(e) = advisory::unlock(&conn, &self.resource).await {
                    drop(deadpool_postgres::Object::take(conn));
                    return Err(e);
                }
            }
            None => {}
        }
        debug!("Released run lock {}", self.resource);
        Ok(())
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Some(Held::Advisory(conn)) = self.held.take() {
            warn!(
                "Run lock {} dropped without release, closing its session",
                self.resource
            );
            drop(deadpool_postgres::Object::take(conn));
        }
    }
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard")
            .field("resource", &self.resource)
            .field("held", &self.held.is_some())
            .finish()
    }
}

/// Acquire the run lock according to `config.policy`.
///
/// `fail_fast` gives up on the first busy attempt; `wait` retries every
/// `poll_interval` until `timeout`. Both end in `LockConflict`.
pub async fn acquire(lock: &dyn RunLock, config: &LockConfig) -> Result<RunLockGuard> {
    let deadline = Instant::now() + config.timeout();
    let mut announced = false;

    loop {
        if let Some(guard) = lock.try_acquire(&config.resource).await? {
            debug!(
                "Acquired run lock {} ({})",
                config.resource,
                lock.backend_type()
            );
            return Ok(guard);
        }

        let now = Instant::now();
        if config.policy == LockPolicy::FailFast || now >= deadline {
            return Err(MigrateError::LockConflict {
                resource: config.resource.clone(),
            });
        }

        if !announced {
            info!(
                "Run lock {} is held by another run, waiting up to {}s",
                config.resource, config.timeout_secs
            );
            announced = true;
        }
        tokio::time::sleep(config.poll_interval().min(deadline - now)).await;
    }
}

/// In-process run lock keyed by resource name.
#[derive(Debug, Default)]
pub struct LocalRunLock {
    resources: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self, resource: &str) -> Result<Option<RunLockGuard>> {
        let mutex = self
            .resources
            .lock()
            .await
            .entry(resource.to_string())
            .or_default()
            .clone();

        Ok(mutex
            .try_lock_owned()
            .ok()
            .map(|guard| RunLockGuard::local(resource, guard)))
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
