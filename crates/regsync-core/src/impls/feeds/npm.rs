use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{initial_seq, results, seq_token};
use crate::domain::{Registry, SinceToken, SourceError};
use crate::ports::{ChangeRecord, ChangeSource, HttpClient};

/// CouchDB-style `_changes` feed (the public npm registry and its
/// replicas).
pub struct NpmChangeSource {
    http: Arc<dyn HttpClient>,
}

impl NpmChangeSource {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChangeSource for NpmChangeSource {
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
        let url = format!("{}?since={}&limit={}", registry.change_stream_url, since, limit);
        let body = self.http.get_json(&url).await?;

        let mut records = Vec::new();
        for change in results(&body, &url)? {
            // Design documents and entries without a sequence are not packages.
            let Some(id) = change.get("id").and_then(Value::as_str) else {
                continue;
            };
            if id.starts_with("_design/") {
                continue;
            }
            let Some(seq) = seq_token(change.get("seq")) else {
                continue;
            };
            let deleted = change.get("deleted").and_then(Value::as_bool).unwrap_or(false);
            records.push(ChangeRecord::new(seq, id).with_metadata(serde_json::json!({ "deleted": deleted })));
        }
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RegistryType;
    use crate::impls::feeds::testing::{CannedHttp, registry};
    use serde_json::json;

    #[tokio::test]
    async fn reads_couchdb_changes() {
        let http = Arc::new(CannedHttp::default().with(
            "https://r.example/_changes?since=90&limit=3",
            json!({
                "results": [
                    {"seq": 91, "id": "lodash", "changes": [{"rev": "1-a"}]},
                    {"seq": 92, "id": "_design/app"},
                    {"seq": 93, "id": "@babel/core", "deleted": true},
                ],
                "last_seq": 93
            }),
        ));
        let source = NpmChangeSource::new(http.clone());

        let records = source
            .fetch_changes(&registry(RegistryType::NpmStyle), &SinceToken::from(90), 3)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, SinceToken::from(91));
        assert_eq!(records[0].fullname, "lodash");
        assert_eq!(records[1].fullname, "@babel/core");
        assert_eq!(records[1].metadata["deleted"], true);
    }

    #[tokio::test]
    async fn initial_since_is_head_minus_backtrack() {
        let http = Arc::new(CannedHttp::default().with("https://r.example", json!({"update_seq": 5000})));
        let source = NpmChangeSource::new(http);
        let since = source.initial_since(&registry(RegistryType::NpmStyle)).await.unwrap();
        assert_eq!(since, SinceToken::from(4990));
    }

    #[tokio::test]
    async fn missing_results_is_malformed() {
        let http = Arc::new(
            CannedHttp::default().with("https://r.example/_changes?since=1&limit=10", json!({"error": "nope"})),
        );
        let source = NpmChangeSource::new(http);
        let err = source
            .fetch_changes(&registry(RegistryType::NpmStyle), &SinceToken::from(1), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }
}
