//! Bug-version overrides: known-broken versions redirected to a fixed one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugVersionOverride {
    /// Version served instead of the broken one.
    #[serde(rename = "version")]
    pub redirect_version: String,
    pub reason: String,
}

/// Immutable `package -> version -> override` table.
///
/// Deserializes from the authoritative config shape:
/// `{ "<pkg>": { "<version>": { "version": "<fixed>", "reason": "..." } } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BugVersionTable {
    packages: BTreeMap<String, BTreeMap<String, BugVersionOverride>>,
}

impl BugVersionTable {
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn get(&self, package: &str, version: &str) -> Option<&BugVersionOverride> {
        self.packages.get(package)?.get(version)
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Package names present in either table.
    pub fn affected_packages(old: &Self, new: &Self) -> BTreeSet<String> {
        old.package_names()
            .chain(new.package_names())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_config_shape() {
        let table = BugVersionTable::from_json(json!({
            "pkgA": { "1.0.0": { "version": "1.0.1", "reason": "broken postinstall" } }
        }))
        .unwrap();

        let ov = table.get("pkgA", "1.0.0").unwrap();
        assert_eq!(ov.redirect_version, "1.0.1");
        assert_eq!(ov.reason, "broken postinstall");
        assert!(table.get("pkgA", "1.0.1").is_none());
        assert!(table.get("pkgB", "1.0.0").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(BugVersionTable::from_json(json!({ "pkgA": { "1.0.0": "1.0.1" } })).is_err());
    }

    #[test]
    fn affected_packages_is_union() {
        let old = BugVersionTable::from_json(json!({
            "a": { "1.0.0": { "version": "1.0.1", "reason": "" } },
            "b": { "2.0.0": { "version": "2.0.1", "reason": "" } }
        }))
        .unwrap();
        let new = BugVersionTable::from_json(json!({
            "b": { "2.0.0": { "version": "2.0.2", "reason": "" } },
            "c": { "3.0.0": { "version": "3.0.1", "reason": "" } }
        }))
        .unwrap();

        let affected: Vec<_> = BugVersionTable::affected_packages(&old, &new).into_iter().collect();
        assert_eq!(affected, vec!["a", "b", "c"]);
    }
}
