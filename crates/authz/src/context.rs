use std::collections::{BTreeMap, BTreeSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Caller-supplied facts used only to resolve `Custom` data scopes.
///
/// Maps a scope dimension (e.g. `"area"`) to the ids the principal's
/// organisation currently covers. A dimension that is absent places no
/// constraint on `Custom` grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext(BTreeMap<String, BTreeSet<String>>);

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, dimension: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(dimension.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn covered(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.0.get(dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable within a process; used as part of the cache key.
    pub fn fingerprint(&self) -> u64 {
        if self.0.is_empty() {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }
}
