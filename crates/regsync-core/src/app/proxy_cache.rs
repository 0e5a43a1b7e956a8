//! ProxyCacheRefresher: schedules revalidation of proxied artifacts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::service::TaskService;
use super::worker::PeriodicJob;
use crate::config::ProxyCacheConfig;
use crate::domain::SyncError;
use crate::ports::{Clock, ProxyCacheStore};
use crate::typed::UpdateProxyCachePayload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub scanned: usize,
    pub stale: usize,
    pub created: usize,
}

pub struct ProxyCacheRefresher {
    entries: Arc<dyn ProxyCacheStore>,
    service: Arc<TaskService>,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    page_size: usize,
}

impl ProxyCacheRefresher {
    pub fn new(
        entries: Arc<dyn ProxyCacheStore>,
        service: Arc<TaskService>,
        clock: Arc<dyn Clock>,
        config: &ProxyCacheConfig,
    ) -> Self {
        Self {
            entries,
            service,
            clock,
            check_interval: config.check_interval(),
            page_size: config.page_size.max(1),
        }
    }

    /// Pages through every entry and creates an UpdateProxyCache task for
    /// each stale one. Entries with an active task are absorbed by the
    /// task store.
    pub async fn run_once(&self) -> Result<RefreshReport, SyncError> {
        let now = self.clock.now();
        let mut report = RefreshReport::default();
        let mut offset = 0;

        loop {
            let page = self.entries.list_entries(offset, self.page_size).await?;
            let page_len = page.len();
            report.scanned += page_len;

            for entry in page.into_iter().filter(|e| e.is_stale(now, self.check_interval)) {
                report.stale += 1;
                let target = entry.target_name();
                let payload = UpdateProxyCachePayload {
                    fullname: entry.fullname,
                    file_type: entry.file_type,
                    version: entry.version,
                };
                if self.service.create(&target, payload).await?.is_created() {
                    debug!(%target, "scheduled proxy cache check");
                    report.created += 1;
                }
            }

            if page_len < self.page_size {
                break;
            }
            offset += page_len;
        }

        if report.created > 0 {
            info!(
                scanned = report.scanned,
                stale = report.stale,
                created = report.created,
                "proxy cache refresh"
            );
        }
        Ok(report)
    }

    /// Flags every cached artifact of `fullname` stale, so the next scan
    /// rechecks it regardless of age.
    pub async fn invalidate(&self, fullname: &str) -> Result<usize, SyncError> {
        Ok(self.entries.mark_invalidated(fullname, self.clock.now()).await?)
    }
}

#[async_trait]
impl PeriodicJob for ProxyCacheRefresher {
    fn name(&self) -> &'static str {
        "proxy_cache_refresh"
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        ProxyCacheRefresher::run_once(self).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProxyCacheEntry, ProxyCacheFileType, TaskType};
    use crate::impls::{InMemoryDedupQueue, InMemoryProxyCacheStore, InMemoryTaskStore, RecordingEventSink};
    use crate::ports::{FixedClock, TaskStore, UlidGenerator};
    use chrono::{TimeZone, Utc};

    struct Harness {
        clock: Arc<FixedClock>,
        entries: Arc<InMemoryProxyCacheStore>,
        service: Arc<TaskService>,
        refresher: ProxyCacheRefresher,
    }

    fn harness(page_size: usize) -> Harness {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let entries = Arc::new(InMemoryProxyCacheStore::new());
        let service = Arc::new(TaskService::new(
            Arc::new(InMemoryTaskStore::new(clock.clone())),
            Arc::new(InMemoryDedupQueue::new()),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            Arc::new(RecordingEventSink::new()),
        ));
        let config = ProxyCacheConfig {
            check_interval_secs: 3600,
            page_size,
            ..ProxyCacheConfig::default()
        };
        let refresher = ProxyCacheRefresher::new(entries.clone(), service.clone(), clock.clone(), &config);
        Harness {
            clock,
            entries,
            service,
            refresher,
        }
    }

    #[tokio::test]
    async fn schedules_checks_for_old_entries_across_pages() {
        let h = harness(2);
        let checked_at = h.clock.now();
        for name in ["a", "b", "c"] {
            h.entries
                .upsert(ProxyCacheEntry::new(name, ProxyCacheFileType::Manifest, checked_at))
                .await
                .unwrap();
        }

        assert_eq!(h.refresher.run_once().await.unwrap().stale, 0);

        h.clock.advance(Duration::from_secs(3601));
        let report = h.refresher.run_once().await.unwrap();
        assert_eq!(
            report,
            RefreshReport {
                scanned: 3,
                stale: 3,
                created: 3
            }
        );

        let task = h
            .service
            .store()
            .find_active_task(TaskType::UpdateProxyCache, "c/manifest")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.payload["file_type"], "manifest");

        // Pending checks absorb the next scan.
        assert_eq!(h.refresher.run_once().await.unwrap().created, 0);
    }

    #[tokio::test]
    async fn invalidation_makes_fresh_entries_stale() {
        let h = harness(100);
        let now = h.clock.now();
        h.entries
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::AbbreviatedManifest, now))
            .await
            .unwrap();
        h.entries
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::VersionManifest, now).with_version("1.0.0"))
            .await
            .unwrap();

        assert_eq!(h.refresher.invalidate("foo").await.unwrap(), 2);
        let report = h.refresher.run_once().await.unwrap();
        assert_eq!(report.created, 2);
        assert!(h
            .service
            .store()
            .find_active_task(TaskType::UpdateProxyCache, "foo/version_manifest/1.0.0")
            .await
            .unwrap()
            .is_some());
    }
}
