use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{initial_seq, results, seq_token};
use crate::domain::{Registry, SinceToken, SourceError};
use crate::ports::{ChangeRecord, ChangeSource, HttpClient};

/// Feed published by another instance of this mirror. Changes are typed
/// (`PACKAGE_VERSION_ADDED`, `PACKAGE_TAG_CHANGED`, ...); every type maps to
/// a package sync.
pub struct SelfHostedChangeSource {
    http: Arc<dyn HttpClient>,
}

impl SelfHostedChangeSource {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChangeSource for SelfHostedChangeSource {
    async fn initial_since(&self, registry: &Registry) -> Result<SinceToken, SourceError> {
        let body = self.http.get_json(&registry.host).await?;
        initial_seq(&body, &registry.host)
    }

    async fn fetch_changes(
        &self,
        registry: &Registry,
        since: &SinceToken,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        // The peer decides the page size itself.
        let url = format!("{}?since={}", registry.change_stream_url, since);
        let body = self.http.get_json(&url).await?;

        let mut records = Vec::new();
        for change in results(&body, &url)? {
            let (Some(seq), Some(id)) = (seq_token(change.get("seq")), change.get("id").and_then(Value::as_str)) else {
                continue;
            };
            let change_type = change.get("type").cloned().unwrap_or(Value::Null);
            records.push(ChangeRecord::new(seq, id).with_metadata(serde_json::json!({ "type": change_type })));
            if records.len() == limit {
                break;
            }
        }
        Ok(records)
    }
}
