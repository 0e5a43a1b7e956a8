//! Proxied upstream artifacts that need periodic revalidation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyCacheFileType {
    /// Full package document.
    Manifest,
    /// Abbreviated (install-only) package document.
    AbbreviatedManifest,
    /// Single-version document.
    VersionManifest,
    /// Single-version abbreviated document.
    AbbreviatedVersionManifest,
    Tarball,
}

impl ProxyCacheFileType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyCacheFileType::Manifest => "manifest",
            ProxyCacheFileType::AbbreviatedManifest => "abbreviated_manifest",
            ProxyCacheFileType::VersionManifest => "version_manifest",
            ProxyCacheFileType::AbbreviatedVersionManifest => "abbreviated_version_manifest",
            ProxyCacheFileType::Tarball => "tarball",
        }
    }
}

impl fmt::Display for ProxyCacheFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCacheEntry {
    pub fullname: String,
    pub file_type: ProxyCacheFileType,
    /// Set for per-version artifacts.
    pub version: Option<String>,
    pub last_checked_at: DateTime<Utc>,
    /// Set by an explicit invalidation; cleared by a successful check that
    /// started after it.
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl ProxyCacheEntry {
    pub fn new(fullname: impl Into<String>, file_type: ProxyCacheFileType, now: DateTime<Utc>) -> Self {
        Self {
            fullname: fullname.into(),
            file_type,
            version: None,
            last_checked_at: now,
            invalidated_at: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Refresh-task target. Includes the file type (and version) so each
    /// artifact gets its own active-task slot.
    pub fn target_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{}/{}", self.fullname, self.file_type, version),
            None => format!("{}/{}", self.fullname, self.file_type),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, check_interval: Duration) -> bool {
        if self.invalidated_at.is_some() {
            return true;
        }
        let age = now.signed_duration_since(self.last_checked_at);
        age.to_std().is_ok_and(|age| age >= check_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn stale_after_interval_or_invalidation() {
        let now = Utc::now();
        let interval = Duration::from_secs(300);
        let mut entry = ProxyCacheEntry::new("lodash", ProxyCacheFileType::Manifest, now);

        assert!(!entry.is_stale(now, interval));
        assert!(!entry.is_stale(now + ChronoDuration::seconds(299), interval));
        assert!(entry.is_stale(now + ChronoDuration::seconds(300), interval));

        entry.invalidated_at = Some(now);
        assert!(entry.is_stale(now, interval));
    }

    #[test]
    fn clock_going_backwards_is_not_stale() {
        let now = Utc::now();
        let entry = ProxyCacheEntry::new("lodash", ProxyCacheFileType::Manifest, now);
        assert!(!entry.is_stale(now - ChronoDuration::seconds(60), Duration::from_secs(1)));
    }

    #[test]
    fn target_name_distinguishes_artifacts() {
        let now = Utc::now();
        let full = ProxyCacheEntry::new("@a/b", ProxyCacheFileType::Manifest, now);
        let version = ProxyCacheEntry::new("@a/b", ProxyCacheFileType::VersionManifest, now).with_version("1.0.0");
        assert_eq!(full.target_name(), "@a/b/manifest");
        assert_eq!(version.target_name(), "@a/b/version_manifest/1.0.0");
    }
}
