//! BugVersionCache: process-local bug-version overrides.
//!
//! Readers take a snapshot of an immutable table; a rebuild swaps in a new
//! table and never edits the current one. Manifests of every package named
//! in the old or the new table are invalidated after the swap, since they
//! were rendered with the old overrides.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::domain::{BugVersionOverride, BugVersionTable, SyncError};
use crate::ports::{BugVersionSource, ManifestCache};

pub struct BugVersionCache {
    table: RwLock<Arc<BugVersionTable>>,
    source: Arc<dyn BugVersionSource>,
    manifests: Arc<dyn ManifestCache>,
}

impl BugVersionCache {
    pub fn new(source: Arc<dyn BugVersionSource>, manifests: Arc<dyn ManifestCache>) -> Self {
        Self {
            table: RwLock::new(Arc::new(BugVersionTable::default())),
            source,
            manifests,
        }
    }

    /// Current table. Never blocks on a rebuild in progress beyond the
    /// pointer swap.
    pub fn snapshot(&self) -> Arc<BugVersionTable> {
        Arc::clone(&self.table.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get_override(&self, package: &str, version: &str) -> Option<BugVersionOverride> {
        self.snapshot().get(package, version).cloned()
    }

    /// Replaces the table wholesale and invalidates the manifests of every
    /// package in the old or new table. Returns the invalidated names.
    pub async fn rebuild(&self, next: BugVersionTable) -> Result<Vec<String>, SyncError> {
        let next = Arc::new(next);
        let previous = {
            let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *table, Arc::clone(&next))
        };

        let affected: Vec<String> = BugVersionTable::affected_packages(&previous, &next)
            .into_iter()
            .collect();
        let mut first_err = None;
        for package in &affected {
            if let Err(err) = self.manifests.invalidate(package).await {
                warn!(package = %package, error = %err, "manifest invalidation failed");
                first_err.get_or_insert(err);
            }
        }

        info!(overrides = next.len(), invalidated = affected.len(), "rebuilt bug-version table");
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(affected),
        }
    }

    /// Reloads the authoritative config. Returns false when it did not
    /// change.
    pub async fn refresh(&self) -> Result<bool, SyncError> {
        let loaded = self.source.load().await?;
        if *self.snapshot() == loaded {
            return Ok(false);
        }
        self.rebuild(loaded).await?;
        Ok(true)
    }
}
