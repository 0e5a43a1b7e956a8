use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Registry, SinceToken, SourceError};
use crate::ports::{ChangeRecord, ChangeSource};

#[derive(Default)]
struct Feed {
    records: Vec<ChangeRecord>,
    /// Failures to return before serving records again.
    failures: usize,
}

/// In-memory change log per registry name, with numeric sequences.
///
/// Serves records whose sequence is greater than `since`, so fetching from
/// an old token replays exactly like a real feed.
pub struct ScriptedChangeSource {
    initial: SinceToken,
    feeds: Mutex<HashMap<String, Feed>>,
}

impl ScriptedChangeSource {
    pub fn new(initial: impl Into<SinceToken>) -> Self {
        Self {
            initial: initial.into(),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub async fn append(&self, registry_name: &str, records: impl IntoIterator<Item = ChangeRecord>) {
        let mut feeds = self.feeds.lock().await;
        feeds.entry(registry_name.to_string()).or_default().records.extend(records);
    }

    /// Makes the next `n` fetches for `registry_name` fail with a request
    /// error.
    pub async fn fail_next(&self, registry_name: &str, n: usize) {
        let mut feeds = self.feeds.lock().await;
        feeds.entry(registry_name.to_string()).or_default().failures = n;
    }
}

#[async_trait]
impl ChangeSource for ScriptedChangeSource {
    async fn initial_since(&self, _registry: &Registry) -> Result<SinceToken, SourceError> {
        Ok(self.initial.clone())
    }

    async fn fetch_changes(
        &self,
        registry: &Registry,
        since: &SinceToken,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let mut feeds = self.feeds.lock().await;
        let Some(feed) = feeds.get_mut(&registry.name) else {
            return Ok(Vec::new());
        };
        if feed.failures > 0 {
            feed.failures -= 1;
            return Err(SourceError::request(&registry.change_stream_url, "scripted failure"));
        }
        let since = since
            .as_number()
            .ok_or_else(|| SourceError::Malformed(format!("non-numeric since {since}")))?;
        Ok(feed
            .records
            .iter()
            .filter(|r| r.seq.as_number().is_some_and(|seq| seq > since))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RegistryType;
    use crate::impls::feeds::testing::registry;

    #[tokio::test]
    async fn serves_records_after_since_and_replays() {
        let source = ScriptedChangeSource::new(0u64);
        let registry = registry(RegistryType::NpmStyle);
        source
            .append(
                &registry.name,
                (1u64..=5).map(|seq| ChangeRecord::new(seq, format!("pkg-{seq}"))),
            )
            .await;

        let first = source.fetch_changes(&registry, &SinceToken::from(0), 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.fullname.as_str()).collect::<Vec<_>>(), ["pkg-1", "pkg-2"]);

        let replay = source.fetch_changes(&registry, &SinceToken::from(0), 2).await.unwrap();
        assert_eq!(replay, first);

        let rest = source.fetch_changes(&registry, &SinceToken::from(2), 10).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let source = ScriptedChangeSource::new(0u64);
        let registry = registry(RegistryType::NpmStyle);
        source.append(&registry.name, [ChangeRecord::new(1u64, "a")]).await;
        source.fail_next(&registry.name, 1).await;

        assert!(source.fetch_changes(&registry, &SinceToken::from(0), 10).await.is_err());
        assert_eq!(source.fetch_changes(&registry, &SinceToken::from(0), 10).await.unwrap().len(), 1);
    }
}
