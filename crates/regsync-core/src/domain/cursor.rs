//! Change-feed cursors.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-defined sequence token. Numeric for CouchDB-style feeds and
/// timestamp feeds, opaque strings elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinceToken(String);

impl SinceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Ordering when both tokens are numeric; `None` for opaque tokens,
    /// whose order only the source knows.
    pub fn compare(&self, other: &SinceToken) -> Option<Ordering> {
        Some(self.as_number()?.cmp(&other.as_number()?))
    }
}

impl From<u64> for SinceToken {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for SinceToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SinceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable bookmark into one registry's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFeedCursor {
    pub registry_name: String,
    pub since: SinceToken,
    pub updated_at: DateTime<Utc>,
}

impl ChangeFeedCursor {
    pub fn new(registry_name: impl Into<String>, since: SinceToken, now: DateTime<Utc>) -> Self {
        Self {
            registry_name: registry_name.into(),
            since,
            updated_at: now,
        }
    }

    /// Moves the cursor to `next`. Returns false, leaving the cursor alone,
    /// when `next` is numerically behind the current position.
    pub fn advance(&mut self, next: SinceToken, now: DateTime<Utc>) -> bool {
        if self.since.compare(&next) == Some(Ordering::Greater) {
            return false;
        }
        self.since = next;
        self.updated_at = now;
        true
    }
}
