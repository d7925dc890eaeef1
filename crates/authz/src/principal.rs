use std::borrow::Cow;
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use gatehouse_core::{PrincipalId, ResourceCode, SecurityLevel};

use crate::grant::Grant;

/// Role identifier (e.g. `"guard"`, `"canteen-admin"`).
///
/// Opaque at this layer; the grant store maps roles to grants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for RoleCode {
    fn from(code: &'static str) -> Self {
        Self::new(code)
    }
}

impl From<String> for RoleCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated actor a decision is evaluated for.
///
/// Built once per session from external identity data and treated as
/// immutable for the duration of every decision made on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    #[serde(default)]
    pub roles: BTreeSet<RoleCode>,
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Grants attached to the session itself rather than to a role.
    #[serde(default)]
    pub direct_grants: Vec<Grant>,
}

impl Principal {
    pub fn new(id: PrincipalId, security_level: SecurityLevel) -> Self {
        Self {
            id,
            roles: BTreeSet::new(),
            security_level,
            direct_grants: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<Cow<'static, str>>) -> Self {
        self.roles.insert(RoleCode::new(role));
        self
    }

    pub fn with_direct_grant(mut self, grant: Grant) -> Self {
        self.direct_grants.push(grant);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }

    /// Hash of everything on the principal that feeds a grant fetch or a
    /// decision: roles and direct grants. Independent of grant order; stable
    /// within a process.
    pub fn fingerprint(&self) -> u64 {
        let mut grants: Vec<u64> = self
            .direct_grants
            .iter()
            .map(|grant| {
                let mut hasher = DefaultHasher::new();
                grant.hash(&mut hasher);
                hasher.finish()
            })
            .collect();
        grants.sort_unstable();

        let mut hasher = DefaultHasher::new();
        self.roles.hash(&mut hasher);
        grants.hash(&mut hasher);
        hasher.finish()
    }

    /// Direct grants whose pattern addresses `resource`.
    pub fn direct_grants_for<'a>(
        &'a self,
        resource: &'a ResourceCode,
    ) -> impl Iterator<Item = &'a Grant> + 'a {
        self.direct_grants.iter().filter(move |g| g.addresses(resource))
    }
}
