use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The kind of operation being gated.
///
/// Closed set; anything else is rejected when parsed at the boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Read,
    Write,
    Delete,
    Approve,
    Manage,
    Config,
    Export,
    Import,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Read,
        Action::Write,
        Action::Delete,
        Action::Approve,
        Action::Manage,
        Action::Config,
        Action::Export,
        Action::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Write => "WRITE",
            Action::Delete => "DELETE",
            Action::Approve => "APPROVE",
            Action::Manage => "MANAGE",
            Action::Config => "CONFIG",
            Action::Export => "EXPORT",
            Action::Import => "IMPORT",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}
