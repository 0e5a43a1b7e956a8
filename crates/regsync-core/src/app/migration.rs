//! One-time conversion of the single global change-stream settings into a
//! registry record.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{LegacyConfig, LegacyStreamMode};
use crate::domain::{ChangeFeedCursor, Registry, RegistryType, SinceToken, StoreError, SyncError};
use crate::ports::{CursorStore, RegistryStore};

#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
    Created(Registry),
    /// A registry for the legacy source existed already.
    AlreadyMigrated(Registry),
}

impl Migration {
    pub fn registry(&self) -> &Registry {
        match self {
            Migration::Created(r) | Migration::AlreadyMigrated(r) => r,
        }
    }
}

fn registry_type(legacy: &LegacyConfig) -> RegistryType {
    if legacy.mode == LegacyStreamMode::Streaming {
        RegistryType::NpmStyle
    } else if legacy.source_is_cnpm {
        RegistryType::SelfHosted
    } else {
        RegistryType::Legacy
    }
}

fn registry_from(legacy: &LegacyConfig, now: DateTime<Utc>) -> Registry {
    let host = legacy.source_registry.trim_end_matches('/').to_string();
    let change_stream_url = if legacy.changes_stream_url.is_empty() {
        format!("{host}/_changes")
    } else {
        legacy.changes_stream_url.clone()
    };
    Registry {
        name: legacy.registry_name.clone(),
        user_prefix: format!("{}:", legacy.registry_name),
        host,
        change_stream_url,
        registry_type: registry_type(legacy),
        scopes: Default::default(),
        created_at: now,
    }
}

/// Creates the registry described by `legacy` unless one already exists for
/// its host. Safe to run on every start, from every process.
///
/// The legacy cursor, if any, seeds the registry's cursor only when the
/// registry has none yet.
pub async fn migrate_legacy(
    registries: &dyn RegistryStore,
    cursors: &dyn CursorStore,
    legacy: &LegacyConfig,
    now: DateTime<Utc>,
) -> Result<Migration, SyncError> {
    let wanted = registry_from(legacy, now);

    let migration = match registries.find_registry_by_host(&wanted.host).await? {
        Some(existing) => Migration::AlreadyMigrated(existing),
        None => match registries.create_registry(wanted.clone()).await {
            Ok(created) => {
                info!(
                    registry = %created.name,
                    host = %created.host,
                    registry_type = ?created.registry_type,
                    "migrated legacy change stream settings"
                );
                Migration::Created(created)
            }
            // Another process won the race.
            Err(StoreError::Conflict(_)) => {
                let existing = match registries.find_registry_by_host(&wanted.host).await? {
                    Some(existing) => existing,
                    None => registries
                        .find_registry(&wanted.name)
                        .await?
                        .ok_or_else(|| SyncError::RegistryNotFound(wanted.name.clone()))?,
                };
                Migration::AlreadyMigrated(existing)
            }
            Err(err) => return Err(err.into()),
        },
    };

    if let Some(since) = legacy.since.as_deref().filter(|s| !s.is_empty()) {
        let name = &migration.registry().name;
        if cursors.load_cursor(name).await?.is_none() {
            cursors
                .save_cursor(&ChangeFeedCursor::new(name, SinceToken::new(since), now))
                .await?;
            info!(registry = %name, since, "seeded cursor from legacy settings");
        }
    }
    Ok(migration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryRegistryStore;
    use async_trait::async_trait;
    use rstest::rstest;

    fn legacy(mode: LegacyStreamMode, source_is_cnpm: bool) -> LegacyConfig {
        LegacyConfig {
            registry_name: "default".into(),
            source_registry: "https://registry.npmjs.org/".into(),
            changes_stream_url: "https://replicate.npmjs.com/_changes".into(),
            mode,
            source_is_cnpm,
            since: Some("9527".into()),
        }
    }

    #[rstest]
    #[case(LegacyStreamMode::Streaming, false, RegistryType::NpmStyle)]
    #[case(LegacyStreamMode::Streaming, true, RegistryType::NpmStyle)]
    #[case(LegacyStreamMode::Json, true, RegistryType::SelfHosted)]
    #[case(LegacyStreamMode::Json, false, RegistryType::Legacy)]
    fn picks_dialect_from_legacy_settings(
        #[case] mode: LegacyStreamMode,
        #[case] cnpm: bool,
        #[case] expected: RegistryType,
    ) {
        assert_eq!(registry_type(&legacy(mode, cnpm)), expected);
    }

    #[tokio::test]
    async fn migrates_once_and_seeds_cursor() {
        let store = InMemoryRegistryStore::new();
        let config = legacy(LegacyStreamMode::Streaming, false);
        let now = Utc::now();

        let first = migrate_legacy(&store, &store, &config, now).await.unwrap();
        assert!(matches!(first, Migration::Created(_)));
        assert_eq!(first.registry().host, "https://registry.npmjs.org");

        let cursor = store.load_cursor("default").await.unwrap().unwrap();
        assert_eq!(cursor.since, SinceToken::from(9527u64));

        // The cursor has moved on since; a second run must not reset it.
        store
            .save_cursor(&ChangeFeedCursor::new("default", SinceToken::from(10_000u64), now))
            .await
            .unwrap();
        let second = migrate_legacy(&store, &store, &config, now).await.unwrap();
        assert!(matches!(second, Migration::AlreadyMigrated(_)));
        assert_eq!(store.list_registries().await.unwrap().len(), 1);
        assert_eq!(
            store.load_cursor("default").await.unwrap().unwrap().since,
            SinceToken::from(10_000u64)
        );
    }

    /// A store where another process creates the registry between our
    /// lookup and our insert.
    struct Racing {
        inner: InMemoryRegistryStore,
    }

    #[async_trait]
    impl RegistryStore for Racing {
        async fn list_registries(&self) -> Result<Vec<Registry>, StoreError> {
            self.inner.list_registries().await
        }
        async fn find_registry(&self, name: &str) -> Result<Option<Registry>, StoreError> {
            self.inner.find_registry(name).await
        }
        async fn find_registry_by_host(&self, host: &str) -> Result<Option<Registry>, StoreError> {
            // The first lookup misses, as it would before the other insert.
            let found = self.inner.find_registry_by_host(host).await?;
            if self.inner.list_registries().await?.len() == 1 && found.is_some() {
                Ok(found)
            } else {
                Ok(None)
            }
        }
        async fn create_registry(&self, registry: Registry) -> Result<Registry, StoreError> {
            self.inner.create_registry(registry.clone()).await?;
            Err(StoreError::Conflict(format!("registry {} exists", registry.name)))
        }
    }

    #[tokio::test]
    async fn concurrent_creation_counts_as_migrated() {
        let store = Racing {
            inner: InMemoryRegistryStore::new(),
        };
        let cursors = InMemoryRegistryStore::new();
        let config = legacy(LegacyStreamMode::Json, false);

        let migration = migrate_legacy(&store, &cursors, &config, Utc::now()).await.unwrap();
        assert!(matches!(migration, Migration::AlreadyMigrated(ref r) if r.name == "default"));
        assert_eq!(migration.registry().registry_type, RegistryType::Legacy);
    }
}
