//! Change-feed adapters, one per registry dialect.

mod legacy;
mod npm;
mod scripted;
mod self_hosted;

pub use self::legacy::LegacyChangeSource;
pub use self::npm::NpmChangeSource;
pub use self::scripted::ScriptedChangeSource;
pub use self::self_hosted::SelfHostedChangeSource;

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{RegistryType, SinceToken, SourceError};
use crate::ports::{ChangeSource, Clock, HttpClient};

/// How many sequence numbers before the current head a fresh registry
/// starts at, so the newest changes are not missed.
const INITIAL_SEQ_BACKTRACK: u64 = 10;

/// One adapter per [`RegistryType`].
#[derive(Clone)]
pub struct ChangeSources {
    npm: Arc<dyn ChangeSource>,
    self_hosted: Arc<dyn ChangeSource>,
    legacy: Arc<dyn ChangeSource>,
}

impl ChangeSources {
    pub fn new(
        npm: Arc<dyn ChangeSource>,
        self_hosted: Arc<dyn ChangeSource>,
        legacy: Arc<dyn ChangeSource>,
    ) -> Self {
        Self {
            npm,
            self_hosted,
            legacy,
        }
    }

    /// The three HTTP dialect adapters over one transport.
    pub fn from_http(http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(NpmChangeSource::new(http.clone())),
            Arc::new(SelfHostedChangeSource::new(http.clone())),
            Arc::new(LegacyChangeSource::new(http, clock)),
        )
    }

    /// Same source for every dialect.
    pub fn uniform(source: Arc<dyn ChangeSource>) -> Self {
        Self::new(source.clone(), source.clone(), source)
    }

    pub fn for_type(&self, registry_type: RegistryType) -> Arc<dyn ChangeSource> {
        match registry_type {
            RegistryType::NpmStyle => self.npm.clone(),
            RegistryType::SelfHosted => self.self_hosted.clone(),
            RegistryType::Legacy => self.legacy.clone(),
        }
    }
}

fn malformed(url: &str, what: &str) -> SourceError {
    SourceError::Malformed(format!("{url}: {what}"))
}

/// `results` array of a feed response.
fn results<'a>(body: &'a Value, url: &str) -> Result<&'a [Value], SourceError> {
    body.get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(url, "missing results array"))
}

/// Sequence token from a number or an opaque string.
fn seq_token(value: Option<&Value>) -> Option<SinceToken> {
    match value? {
        Value::Number(n) => n.as_u64().map(SinceToken::from),
        Value::String(s) if !s.is_empty() => Some(SinceToken::new(s.clone())),
        _ => None,
    }
}

/// `update_seq` of a registry root document, moved back a little.
fn initial_seq(body: &Value, url: &str) -> Result<SinceToken, SourceError> {
    let head = match body.get("update_seq") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.split('-').next().and_then(|n| n.parse().ok()),
        _ => None,
    }
    .ok_or_else(|| malformed(url, "missing update_seq"))?;
    Ok(SinceToken::from(head.saturating_sub(INITIAL_SEQ_BACKTRACK)))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::domain::{Registry, RegistryType, SourceError};
    use crate::ports::HttpClient;

    /// Canned responses by exact URL; records every request.
    #[derive(Default)]
    pub struct CannedHttp {
        responses: HashMap<String, Value>,
        pub requests: Mutex<Vec<String>>,
    }

    impl CannedHttp {
        pub fn with(mut self, url: &str, body: Value) -> Self {
            self.responses.insert(url.to_string(), body);
            self
        }
    }

    #[async_trait]
    impl HttpClient for CannedHttp {
        async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| SourceError::request(url, "404 not found"))
        }
    }

    pub fn registry(registry_type: RegistryType) -> Registry {
        Registry {
            name: "upstream".into(),
            host: "https://r.example".into(),
            change_stream_url: "https://r.example/_changes".into(),
            user_prefix: "upstream:".into(),
            registry_type,
            scopes: Default::default(),
            created_at: chrono::Utc::now(),
        }
    }
}
