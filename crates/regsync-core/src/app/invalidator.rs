//! CacheInvalidator: keeps read-side caches in step with completed syncs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::bug_versions::BugVersionCache;
use crate::domain::{SyncError, Task, TaskType};
use crate::ports::{Clock, ManifestCache, ProxyCacheStore, TaskObserver};
use crate::typed::{SyncPackagePayload, UpdateProxyCachePayload};

pub struct CacheInvalidator {
    manifests: Arc<dyn ManifestCache>,
    proxy_entries: Arc<dyn ProxyCacheStore>,
    bug_versions: Option<(Arc<BugVersionCache>, String)>,
    clock: Arc<dyn Clock>,
}

impl CacheInvalidator {
    pub fn new(
        manifests: Arc<dyn ManifestCache>,
        proxy_entries: Arc<dyn ProxyCacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manifests,
            proxy_entries,
            bug_versions: None,
            clock,
        }
    }

    /// Reload `cache` whenever `config_package` is synced.
    pub fn with_bug_versions(mut self, cache: Arc<BugVersionCache>, config_package: impl Into<String>) -> Self {
        self.bug_versions = Some((cache, config_package.into()));
        self
    }

    async fn package_synced(&self, fullname: &str) -> Result<(), SyncError> {
        self.manifests.invalidate(fullname).await?;
        let flagged = self.proxy_entries.mark_invalidated(fullname, self.clock.now()).await?;
        debug!(%fullname, proxy_entries = flagged, "invalidated caches after sync");

        if let Some((cache, package)) = &self.bug_versions
            && package == fullname
        {
            cache.refresh().await?;
        }
        Ok(())
    }

    async fn proxy_checked(&self, task: &Task, payload: UpdateProxyCachePayload) -> Result<(), SyncError> {
        let now = self.clock.now();
        self.proxy_entries
            .mark_checked(
                &payload.fullname,
                payload.file_type,
                payload.version.as_deref(),
                task.started_at.unwrap_or(task.created_at),
                now,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskObserver for CacheInvalidator {
    async fn on_success(&self, task: &Task) -> Result<(), SyncError> {
        match task.task_type {
            TaskType::SyncPackage => {
                let payload: SyncPackagePayload = task.decode_payload().map_err(SyncError::from)?;
                self.package_synced(&payload.fullname).await
            }
            TaskType::UpdateProxyCache => {
                let payload: UpdateProxyCachePayload = task.decode_payload().map_err(SyncError::from)?;
                self.proxy_checked(task, payload).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BugVersionTable, NewTask, ProxyCacheEntry, ProxyCacheFileType, TaskId};
    use crate::impls::{InMemoryManifestCache, InMemoryProxyCacheStore, StaticBugVersionSource};
    use crate::ports::FixedClock;
    use crate::typed::TaskPayload;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;
    use ulid::Ulid;

    struct Harness {
        clock: Arc<FixedClock>,
        manifests: Arc<InMemoryManifestCache>,
        entries: Arc<InMemoryProxyCacheStore>,
        source: Arc<StaticBugVersionSource>,
        bug_versions: Arc<BugVersionCache>,
        invalidator: CacheInvalidator,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let manifests = Arc::new(InMemoryManifestCache::new());
        let entries = Arc::new(InMemoryProxyCacheStore::new());
        let source = Arc::new(StaticBugVersionSource::default());
        let bug_versions = Arc::new(BugVersionCache::new(source.clone(), manifests.clone()));
        let invalidator = CacheInvalidator::new(manifests.clone(), entries.clone(), clock.clone())
            .with_bug_versions(bug_versions.clone(), "bug-versions");
        Harness {
            clock,
            manifests,
            entries,
            source,
            bug_versions,
            invalidator,
        }
    }

    fn completed<P: TaskPayload>(target: &str, payload: P) -> Task {
        let request: NewTask = payload.into_new_task(target).unwrap();
        Task::from_request(TaskId::from_ulid(Ulid::new()), request, Utc::now())
    }

    #[tokio::test]
    async fn package_sync_invalidates_manifest_and_proxy_entries() {
        let h = harness();
        let now = h.clock.now();
        h.manifests.put("foo", json!({"name": "foo"})).await;
        h.entries
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::Manifest, now))
            .await
            .unwrap();

        h.invalidator
            .on_success(&completed("foo", SyncPackagePayload::new("foo", "npm")))
            .await
            .unwrap();

        assert!(h.manifests.get("foo").await.is_none());
        let entry = &h.entries.find_entries("foo").await.unwrap()[0];
        assert!(entry.is_stale(now, Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn syncing_the_config_package_reloads_bug_versions() {
        let h = harness();
        h.source
            .set(BugVersionTable::from_json(json!({"pkgA": {"1.0.0": {"version": "1.0.1", "reason": "x"}}})).unwrap())
            .await;

        h.invalidator
            .on_success(&completed("other", SyncPackagePayload::new("other", "npm")))
            .await
            .unwrap();
        assert!(h.bug_versions.get_override("pkgA", "1.0.0").is_none());

        h.invalidator
            .on_success(&completed("bug-versions", SyncPackagePayload::new("bug-versions", "npm")))
            .await
            .unwrap();
        assert!(h.bug_versions.get_override("pkgA", "1.0.0").is_some());
        assert_eq!(h.manifests.invalidation_count("pkgA").await, 1);
    }

    #[tokio::test]
    async fn proxy_check_clears_invalidation() {
        let h = harness();
        let start = h.clock.now();
        h.entries
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::Tarball, start).with_version("1.0.0"))
            .await
            .unwrap();
        h.entries.mark_invalidated("foo", start).await.unwrap();

        h.clock.advance(Duration::from_secs(10));
        let payload = UpdateProxyCachePayload {
            fullname: "foo".into(),
            file_type: ProxyCacheFileType::Tarball,
            version: Some("1.0.0".into()),
        };
        let mut task = completed("foo/tarball/1.0.0", payload);
        task.started_at = Some(start + chrono::Duration::seconds(1));
        h.invalidator.on_success(&task).await.unwrap();

        let entry = &h.entries.find_entries("foo").await.unwrap()[0];
        assert_eq!(entry.invalidated_at, None);
        assert_eq!(entry.last_checked_at, h.clock.now());
    }

    #[tokio::test]
    async fn invalidation_during_a_check_survives_it() {
        let h = harness();
        let start = h.clock.now();
        h.entries
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::Manifest, start))
            .await
            .unwrap();

        let payload = UpdateProxyCachePayload {
            fullname: "foo".into(),
            file_type: ProxyCacheFileType::Manifest,
            version: None,
        };
        let mut task = completed("foo/manifest", payload);
        task.started_at = Some(start);

        // A sync lands while the check is still fetching.
        h.clock.advance(Duration::from_secs(5));
        h.invalidator
            .on_success(&completed("foo", SyncPackagePayload::new("foo", "npm")))
            .await
            .unwrap();
        let signalled = h.clock.now();

        h.clock.advance(Duration::from_secs(5));
        h.invalidator.on_success(&task).await.unwrap();

        let entry = &h.entries.find_entries("foo").await.unwrap()[0];
        assert_eq!(entry.invalidated_at, Some(signalled));
        assert!(entry.is_stale(h.clock.now(), Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn other_task_types_are_ignored() {
        let h = harness();
        let task = completed(
            "npm_WORKER",
            crate::typed::ChangesStreamPayload {
                registry_name: "npm".into(),
            },
        );
        h.invalidator.on_success(&task).await.unwrap();
    }
}
