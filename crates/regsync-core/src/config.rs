//! Engine configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a working
//! single-process setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{RetryPolicy, TaskType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub worker: WorkerConfig,
    pub lock: LockConfig,
    pub retry: RetryConfig,
    pub changes_stream: ChangesStreamConfig,
    pub proxy_cache: ProxyCacheConfig,
    pub bug_versions: BugVersionsConfig,
    pub reconcile: ReconcileConfig,
    /// Single global change stream of older deployments. Converted into a
    /// registry once at startup.
    pub legacy: Option<LegacyConfig>,
}

/// How a coordinator picks between its task types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeOrdering {
    /// Rotate the starting type on every iteration.
    #[default]
    RoundRobin,
    /// Always try types in configured order.
    Priority,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Task types this worker runs, in priority order.
    pub task_types: Vec<TaskType>,
    pub ordering: TypeOrdering,
    /// Coordinator loops per process.
    pub concurrency: usize,
    /// Sleep when an iteration found nothing to do.
    pub idle_interval_ms: u64,
    /// How often an idle coordinator falls back to scanning the store.
    pub store_scan_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_types: vec![TaskType::ChangesStream, TaskType::SyncPackage, TaskType::UpdateProxyCache],
            ordering: TypeOrdering::RoundRobin,
            concurrency: 2,
            idle_interval_ms: 500,
            store_scan_interval_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn store_scan_interval(&self) -> Duration {
        Duration::from_secs(self.store_scan_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lock TTL and execution deadline.
    pub execution_timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 600,
        }
    }
}

impl LockConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Executions per retry chain, first run included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_multiplier: 2.0,
            backoff_max_secs: 30,
        }
    }
}

impl RetryConfig {
    /// Backoff for infrastructure failures.
    pub fn backoff(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_multiplier,
            Duration::from_secs(self.backoff_max_secs),
        )
    }
}

/// Which changes become sync tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Every change routed to the registry.
    #[default]
    All,
    /// Only packages that already exist locally.
    Exist,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChangesStreamConfig {
    pub enabled: bool,
    pub batch_size: usize,
    /// Persist the cursor after this many enqueued records.
    pub commit_every: usize,
    pub max_batches_per_run: usize,
    /// How often stream tasks are (re)scheduled.
    pub poll_interval_secs: u64,
    pub sync_mode: SyncMode,
}

impl Default for ChangesStreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            commit_every: 20,
            max_batches_per_run: 10,
            poll_interval_secs: 10,
            sync_mode: SyncMode::All,
        }
    }
}

impl ChangesStreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxyCacheConfig {
    pub enabled: bool,
    /// Entries not checked for this long are refreshed.
    pub check_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub page_size: usize,
}

impl Default for ProxyCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 6 * 3600,
            scan_interval_secs: 300,
            page_size: 100,
        }
    }
}

impl ProxyCacheConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BugVersionsConfig {
    pub enabled: bool,
    /// Package whose latest manifest holds the bug-version config.
    pub package: String,
}

impl Default for BugVersionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            package: "bug-versions".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Extra wait past the execution timeout before a Processing task is
    /// considered abandoned. Must exceed the clock skew between workers.
    pub stale_grace_secs: u64,
    /// Waiting tasks older than this are pushed onto their channel again.
    pub repush_after_secs: u64,
    pub batch_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_grace_secs: 30,
            repush_after_secs: 60,
            batch_limit: 100,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn repush_after(&self) -> Duration {
        Duration::from_secs(self.repush_after_secs)
    }
}

/// Transport of the legacy change stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegacyStreamMode {
    #[default]
    Json,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyConfig {
    #[serde(default = "default_legacy_registry_name")]
    pub registry_name: String,
    pub source_registry: String,
    pub changes_stream_url: String,
    #[serde(default)]
    pub mode: LegacyStreamMode,
    /// Whether the source is another instance of this mirror.
    #[serde(default)]
    pub source_is_cnpm: bool,
    /// Cursor of the global stream, carried over to the new registry.
    #[serde(default)]
    pub since: Option<String>,
}

fn default_legacy_registry_name() -> String {
    "default".to_string()
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.worker.task_types.is_empty() {
            return invalid("worker.task_types must not be empty");
        }
        let mut seen = HashSet::new();
        for task_type in &self.worker.task_types {
            if !seen.insert(task_type) {
                return Err(ConfigError::Invalid(format!("worker.task_types lists {task_type} twice")));
            }
        }
        if self.worker.concurrency == 0 {
            return invalid("worker.concurrency must be at least 1");
        }
        if self.lock.execution_timeout_secs == 0 {
            return invalid("lock.execution_timeout_secs must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }
        if self.changes_stream.batch_size == 0 || self.changes_stream.commit_every == 0 {
            return invalid("changes_stream.batch_size and commit_every must be positive");
        }
        if self.changes_stream.max_batches_per_run == 0 {
            return invalid("changes_stream.max_batches_per_run must be positive");
        }
        if self.proxy_cache.page_size == 0 {
            return invalid("proxy_cache.page_size must be positive");
        }
        if self.reconcile.batch_limit == 0 {
            return invalid("reconcile.batch_limit must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_file_is_valid() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.lock.execution_timeout(), Duration::from_secs(600));
        assert!(config.legacy.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = SyncConfig::from_toml_str(
            r#"
            [worker]
            task_types = ["sync_package", "changes_stream"]
            ordering = "priority"
            concurrency = 4

            [retry]
            max_attempts = 5

            [changes_stream]
            sync_mode = "exist"
            commit_every = 7

            [legacy]
            source_registry = "https://registry.npmjs.org"
            changes_stream_url = "https://replicate.npmjs.com/_changes"
            mode = "streaming"
            since = "9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.task_types, vec![TaskType::SyncPackage, TaskType::ChangesStream]);
        assert_eq!(config.worker.ordering, TypeOrdering::Priority);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.changes_stream.sync_mode, SyncMode::Exist);
        assert_eq!(config.changes_stream.commit_every, 7);
        assert_eq!(config.changes_stream.batch_size, 100);

        let legacy = config.legacy.unwrap();
        assert_eq!(legacy.registry_name, "default");
        assert_eq!(legacy.mode, LegacyStreamMode::Streaming);
        assert!(!legacy.source_is_cnpm);
        assert_eq!(legacy.since.as_deref(), Some("9000"));
    }

    #[rstest]
    #[case::no_types("[worker]\ntask_types = []")]
    #[case::duplicate_type("[worker]\ntask_types = [\"sync_package\", \"sync_package\"]")]
    #[case::unknown_type("[worker]\ntask_types = [\"sync_everything\"]")]
    #[case::zero_timeout("[lock]\nexecution_timeout_secs = 0")]
    #[case::zero_attempts("[retry]\nmax_attempts = 0")]
    #[case::zero_batch("[changes_stream]\nbatch_size = 0")]
    #[case::bad_ordering("[worker]\nordering = \"random\"")]
    fn rejects_bad_config(#[case] raw: &str) {
        assert!(SyncConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = SyncConfig::load(Path::new("/definitely/not/here/regsync.toml")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }
}
