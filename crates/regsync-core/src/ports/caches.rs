//! Read-side caches and the package catalogue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{BugVersionTable, ProxyCacheEntry, ProxyCacheFileType, SourceError, StoreError};

/// Proxied artifacts under freshness tracking.
#[async_trait]
pub trait ProxyCacheStore: Send + Sync {
    /// Stable page ordered by `(fullname, file_type, version)`.
    async fn list_entries(&self, offset: usize, limit: usize) -> Result<Vec<ProxyCacheEntry>, StoreError>;

    async fn find_entries(&self, fullname: &str) -> Result<Vec<ProxyCacheEntry>, StoreError>;

    async fn upsert(&self, entry: ProxyCacheEntry) -> Result<(), StoreError>;

    /// Records a successful revalidation that started at `started_at`.
    /// The invalidation mark is cleared only if it is not newer than
    /// `started_at`; a later signal still forces another check.
    async fn mark_checked(
        &self,
        fullname: &str,
        file_type: ProxyCacheFileType,
        version: Option<&str>,
        started_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Flags every entry of `fullname` stale. Returns how many were flagged.
    async fn mark_invalidated(&self, fullname: &str, at: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Per-package derived documents served to readers.
#[async_trait]
pub trait ManifestCache: Send + Sync {
    async fn invalidate(&self, fullname: &str) -> Result<(), StoreError>;
}

/// Authoritative bug-version configuration.
#[async_trait]
pub trait BugVersionSource: Send + Sync {
    async fn load(&self) -> Result<BugVersionTable, SourceError>;
}

/// Packages already present locally.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    async fn contains(&self, fullname: &str) -> Result<bool, StoreError>;
}
