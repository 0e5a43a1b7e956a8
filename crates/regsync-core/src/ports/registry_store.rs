//! Registry configuration and change-feed cursor storage.

use async_trait::async_trait;

use crate::domain::{ChangeFeedCursor, Registry, StoreError};

#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn list_registries(&self) -> Result<Vec<Registry>, StoreError>;

    async fn find_registry(&self, name: &str) -> Result<Option<Registry>, StoreError>;

    async fn find_registry_by_host(&self, host: &str) -> Result<Option<Registry>, StoreError>;

    /// Fails with `StoreError::Conflict` when the name or host is taken.
    async fn create_registry(&self, registry: Registry) -> Result<Registry, StoreError>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, registry_name: &str) -> Result<Option<ChangeFeedCursor>, StoreError>;

    /// Durable once this returns.
    async fn save_cursor(&self, cursor: &ChangeFeedCursor) -> Result<(), StoreError>;
}
