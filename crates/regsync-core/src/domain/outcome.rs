//! What an executor reports back on success.

use serde::{Deserialize, Serialize};

/// Successful execution result. Failures are `ExecuteError`s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// One-line result summary persisted on the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Structured details for logs (counts, versions, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Outcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted() {
        let s = serde_json::to_string(&Outcome::success()).unwrap();
        assert_eq!(s, "{}");

        let o = Outcome::success()
            .with_summary("synced 3 versions")
            .with_details(serde_json::json!({"versions": 3}));
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["summary"], "synced 3 versions");
        assert_eq!(v["details"]["versions"], 3);
    }
}
