use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use super::results;
use crate::domain::{Registry, SinceToken, SourceError};
use crate::ports::{ChangeRecord, ChangeSource, Clock, HttpClient};

/// Timestamp-keyed feed of the previous-generation mirror. The token is the
/// `gmt_modified` of the last change in epoch milliseconds.
pub struct LegacyChangeSource {
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl LegacyChangeSource {
    pub fn new(http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self { http, clock }
    }
}

fn modified_ms(change: &Value) -> Option<u64> {
    let raw = change.get("gmt_modified")?;
    let ms = match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.timestamp_millis(),
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    u64::try_from(ms).ok()
}

#[async_trait]
impl ChangeSource for LegacyChangeSource {
    /// The feed has no head document; a fresh registry starts now.
    async fn initial_since(&self, _registry: &Registry) -> Result<SinceToken, SourceError> {
        let now_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ok(SinceToken::from(now_ms))
    }

    async fn fetch_changes(
        &self,
        registry: &Registry,
        since: &SinceToken,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let url = format!("{}?since={}&limit={}", registry.change_stream_url, since, limit);
        let body = self.http.get_json(&url).await?;

        let mut records = Vec::new();
        for change in results(&body, &url)? {
            let (Some(ms), Some(id)) = (modified_ms(change), change.get("id").and_then(Value::as_str)) else {
                continue;
            };
            let change_type = change.get("type").cloned().unwrap_or(Value::Null);
            records.push(ChangeRecord::new(ms, id).with_metadata(serde_json::json!({ "type": change_type })));
        }
        records.truncate(limit);
        Ok(records)
    }
}
