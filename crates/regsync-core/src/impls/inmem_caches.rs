//! In-memory read-side caches and catalogue.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::domain::{BugVersionTable, ProxyCacheEntry, ProxyCacheFileType, SourceError, StoreError};
use crate::ports::{BugVersionSource, ManifestCache, PackageIndex, ProxyCacheStore};

type EntryKey = (String, ProxyCacheFileType, Option<String>);

fn key_of(entry: &ProxyCacheEntry) -> EntryKey {
    (entry.fullname.clone(), entry.file_type, entry.version.clone())
}

#[derive(Default)]
pub struct InMemoryProxyCacheStore {
    entries: Mutex<BTreeMap<EntryKey, ProxyCacheEntry>>,
}

impl InMemoryProxyCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProxyCacheStore for InMemoryProxyCacheStore {
    async fn list_entries(&self, offset: usize, limit: usize) -> Result<Vec<ProxyCacheEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.values().skip(offset).take(limit).cloned().collect())
    }

    async fn find_entries(&self, fullname: &str) -> Result<Vec<ProxyCacheEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.values().filter(|e| e.fullname == fullname).cloned().collect())
    }

    async fn upsert(&self, entry: ProxyCacheEntry) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key_of(&entry), entry);
        Ok(())
    }

    async fn mark_checked(
        &self,
        fullname: &str,
        file_type: ProxyCacheFileType,
        version: Option<&str>,
        started_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = (fullname.to_string(), file_type, version.map(str::to_string));
        if let Some(entry) = self.entries.lock().await.get_mut(&key) {
            entry.last_checked_at = at;
            if entry.invalidated_at.is_some_and(|signalled| signalled <= started_at) {
                entry.invalidated_at = None;
            }
        }
        Ok(())
    }

    async fn mark_invalidated(&self, fullname: &str, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let mut flagged = 0;
        for entry in entries.values_mut().filter(|e| e.fullname == fullname) {
            entry.invalidated_at = Some(at);
            flagged += 1;
        }
        Ok(flagged)
    }
}

/// Manifest documents keyed by package name.
#[derive(Default)]
pub struct InMemoryManifestCache {
    documents: Mutex<HashMap<String, serde_json::Value>>,
    invalidations: Mutex<HashMap<String, usize>>,
}

impl InMemoryManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, fullname: &str, document: serde_json::Value) {
        self.documents.lock().await.insert(fullname.to_string(), document);
    }

    pub async fn get(&self, fullname: &str) -> Option<serde_json::Value> {
        self.documents.lock().await.get(fullname).cloned()
    }

    /// How many times `fullname` has been invalidated.
    pub async fn invalidation_count(&self, fullname: &str) -> usize {
        self.invalidations.lock().await.get(fullname).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ManifestCache for InMemoryManifestCache {
    async fn invalidate(&self, fullname: &str) -> Result<(), StoreError> {
        self.documents.lock().await.remove(fullname);
        *self.invalidations.lock().await.entry(fullname.to_string()).or_default() += 1;
        Ok(())
    }
}

/// Bug-version config held in memory; `set` stands in for an edit of the
/// authoritative config.
#[derive(Default)]
pub struct StaticBugVersionSource {
    table: RwLock<BugVersionTable>,
}

impl StaticBugVersionSource {
    pub fn new(table: BugVersionTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    pub async fn set(&self, table: BugVersionTable) {
        *self.table.write().await = table;
    }
}

#[async_trait]
impl BugVersionSource for StaticBugVersionSource {
    async fn load(&self) -> Result<BugVersionTable, SourceError> {
        Ok(self.table.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryPackageIndex {
    names: RwLock<HashSet<String>>,
}

impl InMemoryPackageIndex {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn insert(&self, fullname: &str) {
        self.names.write().await.insert(fullname.to_string());
    }
}

#[async_trait]
impl PackageIndex for InMemoryPackageIndex {
    async fn contains(&self, fullname: &str) -> Result<bool, StoreError> {
        Ok(self.names.read().await.contains(fullname))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn invalidate_then_check_clears_flag() {
        let store = InMemoryProxyCacheStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

        store.upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::Manifest, t0)).await.unwrap();
        store
            .upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::VersionManifest, t0).with_version("1.0.0"))
            .await
            .unwrap();
        store.upsert(ProxyCacheEntry::new("bar", ProxyCacheFileType::Manifest, t0)).await.unwrap();

        assert_eq!(store.mark_invalidated("foo", t1).await.unwrap(), 2);
        let foo = store.find_entries("foo").await.unwrap();
        assert!(foo.iter().all(|e| e.invalidated_at == Some(t1)));

        store
            .mark_checked("foo", ProxyCacheFileType::VersionManifest, Some("1.0.0"), t1, t1)
            .await
            .unwrap();
        let foo = store.find_entries("foo").await.unwrap();
        let version = foo.iter().find(|e| e.version.is_some()).unwrap();
        assert_eq!(version.invalidated_at, None);
        assert_eq!(version.last_checked_at, t1);
    }

    #[tokio::test]
    async fn check_started_before_invalidation_keeps_the_flag() {
        let store = InMemoryProxyCacheStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let signalled = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let finished = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 9).unwrap();

        store.upsert(ProxyCacheEntry::new("foo", ProxyCacheFileType::Manifest, t0)).await.unwrap();
        store.mark_invalidated("foo", signalled).await.unwrap();
        store
            .mark_checked("foo", ProxyCacheFileType::Manifest, None, t0, finished)
            .await
            .unwrap();

        let entry = &store.find_entries("foo").await.unwrap()[0];
        assert_eq!(entry.last_checked_at, finished);
        assert_eq!(entry.invalidated_at, Some(signalled));
    }

    #[tokio::test]
    async fn entries_page_in_stable_order() {
        let store = InMemoryProxyCacheStore::new();
        let now = Utc::now();
        for name in ["c", "a", "b"] {
            store.upsert(ProxyCacheEntry::new(name, ProxyCacheFileType::Manifest, now)).await.unwrap();
        }
        let first = store.list_entries(0, 2).await.unwrap();
        let rest = store.list_entries(2, 2).await.unwrap();
        let names: Vec<_> = first.iter().chain(&rest).map(|e| e.fullname.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn manifest_invalidation_drops_document() {
        let cache = InMemoryManifestCache::new();
        cache.put("foo", serde_json::json!({"name": "foo"})).await;
        cache.invalidate("foo").await.unwrap();
        assert!(cache.get("foo").await.is_none());
        assert_eq!(cache.invalidation_count("foo").await, 1);
        assert_eq!(cache.invalidation_count("bar").await, 0);
    }
}
