//! Legacy permission strings (`"smart:device:read"`, `"smart:device:read:dept"`).
//!
//! Parsed once at the boundary into a structured triple; evaluation paths only
//! ever see [`PermissionCode`].

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Action, DataScope, ResourceCode, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionCode {
    pub resource: ResourceCode,
    pub action: Action,
    /// Scope suffix, if the string carried one.
    pub scope: Option<DataScope>,
}

impl PermissionCode {
    pub fn new(resource: ResourceCode, action: Action) -> Self {
        Self {
            resource,
            action,
            scope: None,
        }
    }

    /// The action is the last segment that names an [`Action`]; at most one
    /// segment may follow it, and it must name a [`DataScope`].
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let malformed = || ValidationError::MalformedPermissionCode(code.to_string());

        let segments: Vec<&str> = code.trim().split(':').collect();
        let action_idx = segments
            .iter()
            .rposition(|seg| seg.parse::<Action>().is_ok())
            .filter(|idx| *idx > 0)
            .ok_or_else(malformed)?;

        let action = segments[action_idx].parse::<Action>().map_err(|_| malformed())?;
        let resource = ResourceCode::parse(segments[..action_idx].join(":")).map_err(|_| malformed())?;

        let scope = match &segments[action_idx + 1..] {
            [] => None,
            [scope] => Some(scope.parse::<DataScope>().map_err(|_| malformed())?),
            _ => return Err(malformed()),
        };

        Ok(Self {
            resource,
            action,
            scope,
        })
    }
}

impl FromStr for PermissionCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action.as_str().to_ascii_lowercase())?;
        if let Some(scope) = self.scope {
            write!(f, ":{}", scope.as_str().to_ascii_lowercase())?;
        }
        Ok(())
    }
}
