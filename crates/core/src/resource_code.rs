//! Resource codes (`smart:access:device`) and the patterns grants address them by.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stable identifier of a protected capability domain.
///
/// One or more non-empty segments of `[a-z0-9_-]`, separated by `:`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceCode(Cow<'static, str>);

impl ResourceCode {
    pub fn parse(code: impl Into<Cow<'static, str>>) -> Result<Self, ValidationError> {
        let code = code.into();
        if is_valid_code(&code) {
            Ok(Self(code))
        } else {
            Err(ValidationError::MalformedResourceCode(code.into_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    /// `true` if `self` equals `prefix` or lives under it (`a:b` is under `a`).
    pub fn starts_with(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches(':');
        self.0 == prefix
            || (self.0.starts_with(prefix) && self.0.as_bytes().get(prefix.len()) == Some(&b':'))
    }
}

fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.split(':').all(|seg| {
            !seg.is_empty()
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        })
}

impl core::fmt::Display for ResourceCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&'static str> for ResourceCode {
    type Error = ValidationError;

    fn try_from(value: &'static str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourceCode> for String {
    fn from(value: ResourceCode) -> Self {
        value.0.into_owned()
    }
}

/// Which resources a grant addresses.
///
/// Wire form: `"*"`, `"smart:*"`, or an exact code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourcePattern {
    Any,
    Prefix(ResourceCode),
    Exact(ResourceCode),
}

impl ResourcePattern {
    pub fn parse(pattern: &str) -> Result<Self, ValidationError> {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Ok(ResourcePattern::Any);
        }
        if let Some(prefix) = pattern.strip_suffix(":*") {
            return ResourceCode::parse(prefix.to_string())
                .map(ResourcePattern::Prefix)
                .map_err(|_| ValidationError::MalformedResourcePattern(pattern.to_string()));
        }
        ResourceCode::parse(pattern.to_string())
            .map(ResourcePattern::Exact)
            .map_err(|_| ValidationError::MalformedResourcePattern(pattern.to_string()))
    }

    pub fn matches(&self, code: &ResourceCode) -> bool {
        match self {
            ResourcePattern::Any => true,
            ResourcePattern::Prefix(prefix) => code.starts_with(prefix.as_str()),
            ResourcePattern::Exact(exact) => exact == code,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, ResourcePattern::Exact(_))
    }
}

impl From<ResourceCode> for ResourcePattern {
    fn from(value: ResourceCode) -> Self {
        ResourcePattern::Exact(value)
    }
}

impl core::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResourcePattern::Any => f.write_str("*"),
            ResourcePattern::Prefix(p) => write!(f, "{p}:*"),
            ResourcePattern::Exact(c) => write!(f, "{c}"),
        }
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePattern> for String {
    fn from(value: ResourcePattern) -> Self {
        value.to_string()
    }
}
