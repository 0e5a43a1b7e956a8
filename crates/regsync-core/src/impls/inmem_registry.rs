//! In-memory registry configuration and cursor storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ChangeFeedCursor, Registry, StoreError};
use crate::ports::{CursorStore, RegistryStore};

#[derive(Default)]
struct Tables {
    registries: Vec<Registry>,
    cursors: HashMap<String, ChangeFeedCursor>,
}

/// Registries and their cursors, kept together the way a single database
/// would hold them.
#[derive(Default)]
pub struct InMemoryRegistryStore {
    tables: Mutex<Tables>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registries(registries: Vec<Registry>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                registries,
                cursors: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn list_registries(&self) -> Result<Vec<Registry>, StoreError> {
        Ok(self.tables.lock().await.registries.clone())
    }

    async fn find_registry(&self, name: &str) -> Result<Option<Registry>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.registries.iter().find(|r| r.name == name).cloned())
    }

    async fn find_registry_by_host(&self, host: &str) -> Result<Option<Registry>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.registries.iter().find(|r| r.host == host).cloned())
    }

    async fn create_registry(&self, registry: Registry) -> Result<Registry, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .registries
            .iter()
            .find(|r| r.name == registry.name || r.host == registry.host)
        {
            return Err(StoreError::Conflict(format!(
                "registry {} ({}) already exists",
                existing.name, existing.host
            )));
        }
        tables.registries.push(registry.clone());
        Ok(registry)
    }
}

#[async_trait]
impl CursorStore for InMemoryRegistryStore {
    async fn load_cursor(&self, registry_name: &str) -> Result<Option<ChangeFeedCursor>, StoreError> {
        Ok(self.tables.lock().await.cursors.get(registry_name).cloned())
    }

    async fn save_cursor(&self, cursor: &ChangeFeedCursor) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .cursors
            .insert(cursor.registry_name.clone(), cursor.clone());
        Ok(())
    }
}
