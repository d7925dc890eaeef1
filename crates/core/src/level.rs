use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Clearance of a principal, and the minimum clearance a resource requires.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "LOW",
            SecurityLevel::Medium => "MEDIUM",
            SecurityLevel::High => "HIGH",
            SecurityLevel::Critical => "CRITICAL",
        }
    }

    /// Whether a principal at `self` may address something requiring `required`.
    pub fn satisfies(&self, required: SecurityLevel) -> bool {
        *self >= required
    }
}

impl core::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(SecurityLevel::Low),
            "MEDIUM" => Ok(SecurityLevel::Medium),
            "HIGH" => Ok(SecurityLevel::High),
            "CRITICAL" => Ok(SecurityLevel::Critical),
            _ => Err(ValidationError::UnknownSecurityLevel(s.to_string())),
        }
    }
}
