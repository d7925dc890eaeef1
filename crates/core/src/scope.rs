//! Data scope: how many records an allowed action reaches.

use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Breadth of records a principal may operate on once an action is allowed.
///
/// The ordered scopes nest: `All ⊐ Area ⊐ Dept ⊐ SelfOnly`. `Custom` sits
/// outside that order; its reach is defined entirely by [`ScopeParams`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataScope {
    All,
    Area,
    Dept,
    #[serde(rename = "SELF")]
    SelfOnly,
    Custom,
}

impl DataScope {
    /// Position in the breadth order (higher is broader). `None` for `Custom`.
    pub fn breadth(&self) -> Option<u8> {
        match self {
            DataScope::All => Some(3),
            DataScope::Area => Some(2),
            DataScope::Dept => Some(1),
            DataScope::SelfOnly => Some(0),
            DataScope::Custom => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, DataScope::Custom)
    }

    /// Broader of two ordered scopes; `None` if either is `Custom`.
    pub fn wider(self, other: DataScope) -> Option<DataScope> {
        match (self.breadth(), other.breadth()) {
            (Some(a), Some(b)) => Some(if a >= b { self } else { other }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataScope::All => "ALL",
            DataScope::Area => "AREA",
            DataScope::Dept => "DEPT",
            DataScope::SelfOnly => "SELF",
            DataScope::Custom => "CUSTOM",
        }
    }
}

impl core::fmt::Display for DataScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(DataScope::All),
            "AREA" => Ok(DataScope::Area),
            "DEPT" => Ok(DataScope::Dept),
            "SELF" => Ok(DataScope::SelfOnly),
            "CUSTOM" => Ok(DataScope::Custom),
            _ => Err(ValidationError::UnknownScope(s.to_string())),
        }
    }
}

/// Explicit ids a `Custom` scope covers, keyed by dimension (e.g. `"area"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeParams(BTreeMap<String, BTreeSet<String>>);

impl ScopeParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add ids under `dimension`, merging with any already present.
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

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn ids(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.0.get(dimension)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Widen `self` by every id in `other`.
    pub fn union_with(&mut self, other: &ScopeParams) {
        for (dimension, ids) in &other.0 {
            self.0
                .entry(dimension.clone())
                .or_default()
                .extend(ids.iter().cloned());
        }
    }
}
