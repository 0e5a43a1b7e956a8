//! Upstream change feeds.

use async_trait::async_trait;

use crate::domain::{Registry, SinceToken, SourceError};

/// One entry of a change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub seq: SinceToken,
    pub fullname: String,
    pub metadata: serde_json::Value,
}

impl ChangeRecord {
    pub fn new(seq: impl Into<SinceToken>, fullname: impl Into<String>) -> Self {
        Self {
            seq: seq.into(),
            fullname: fullname.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Ordered, resumable change feed of one registry.
///
/// Fetching from a token that was already returned must yield the same or
/// later records; replays are fine, gaps are not.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Where a registry with no stored cursor starts.
    async fn initial_since(&self, registry: &Registry) -> Result<SinceToken, SourceError>;

    /// Up to `limit` records after `since`, in feed order.
    async fn fetch_changes(
        &self,
        registry: &Registry,
        since: &SinceToken,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError>;
}

/// Minimal HTTP transport used by the feed adapters.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, SourceError>;
}
