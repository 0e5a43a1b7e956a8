//! Upstream registries and scope-based routing of package names.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change-feed dialect spoken by an upstream registry. Closed set; the
/// matching adapter is picked once when registries are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryType {
    /// CouchDB-style `_changes` feed with numeric sequences.
    NpmStyle,
    /// Another instance of this mirror.
    SelfHosted,
    /// Timestamp-keyed feed of the previous-generation mirror.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub name: String,
    pub host: String,
    pub change_stream_url: String,
    pub user_prefix: String,
    pub registry_type: RegistryType,

    /// Owned scopes (`@org`). Empty means catch-all.
    #[serde(default)]
    pub scopes: BTreeSet<String>,

    pub created_at: DateTime<Utc>,
}

impl Registry {
    pub fn is_catch_all(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Target name of this registry's change-stream task.
    pub fn stream_target(&self) -> String {
        format!("{}_WORKER", self.name)
    }
}

/// Scope prefix of a package name: `@cnpm/x` -> `@cnpm`. Unscoped names and
/// malformed scoped names (`@cnpm`) have none.
pub fn scope_of(fullname: &str) -> Option<&str> {
    if !fullname.starts_with('@') {
        return None;
    }
    match fullname.split_once('/') {
        Some((scope, rest)) if scope.len() > 1 && !rest.is_empty() => Some(scope),
        _ => None,
    }
}

/// A scope claimed by more than one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeConflict {
    pub scope: String,
    pub winner: String,
    pub loser: String,
}

/// Decides which registry owns a package name.
///
/// Scoped names go to the registry that claims their scope; everything else
/// goes to the catch-all registry. When several registries claim the same
/// scope, or several are catch-all, the earliest created one (then the
/// lowest name) wins.
#[derive(Debug, Clone)]
pub struct RegistryRouter {
    registries: Vec<Registry>,
    by_scope: HashMap<String, usize>,
    catch_all: Option<usize>,
    conflicts: Vec<ScopeConflict>,
}

impl RegistryRouter {
    pub fn new(mut registries: Vec<Registry>) -> Self {
        registries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));

        let mut by_scope: HashMap<String, usize> = HashMap::new();
        let mut catch_all = None;
        let mut conflicts = Vec::new();
        for (idx, registry) in registries.iter().enumerate() {
            if registry.is_catch_all() {
                match catch_all {
                    None => catch_all = Some(idx),
                    Some(winner) => conflicts.push(ScopeConflict {
                        scope: String::new(),
                        winner: registries[winner].name.clone(),
                        loser: registry.name.clone(),
                    }),
                }
                continue;
            }
            for scope in &registry.scopes {
                match by_scope.get(scope) {
                    None => {
                        by_scope.insert(scope.clone(), idx);
                    }
                    Some(&winner) => conflicts.push(ScopeConflict {
                        scope: scope.clone(),
                        winner: registries[winner].name.clone(),
                        loser: registry.name.clone(),
                    }),
                }
            }
        }

        Self {
            registries,
            by_scope,
            catch_all,
            conflicts,
        }
    }

    pub fn route(&self, fullname: &str) -> Option<&Registry> {
        let idx = scope_of(fullname)
            .and_then(|scope| self.by_scope.get(scope).copied())
            .or(self.catch_all)?;
        self.registries.get(idx)
    }

    /// Whether `registry` is the one that should sync `fullname`.
    pub fn needs_sync(&self, registry: &str, fullname: &str) -> bool {
        self.route(fullname).is_some_and(|r| r.name == registry)
    }

    pub fn registries(&self) -> &[Registry] {
        &self.registries
    }

    pub fn find(&self, name: &str) -> Option<&Registry> {
        self.registries.iter().find(|r| r.name == name)
    }

    pub fn conflicts(&self) -> &[ScopeConflict] {
        &self.conflicts
    }
}
