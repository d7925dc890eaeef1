//! Grant model: what a principal has been given, via a role or directly.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{Action, DataScope, GrantId, ResourceCode, ResourcePattern, ScopeParams};

use crate::principal::RoleCode;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Allow,
    Deny,
}

/// Where a grant came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Role(RoleCode),
    #[default]
    Direct,
}

/// An issued permission record.
///
/// Immutable once fetched from the grant store. A grant stops counting either
/// when `expires_at` passes or when the store revokes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default)]
    pub id: GrantId,
    #[serde(default)]
    pub source: GrantSource,
    pub resource: ResourcePattern,
    pub actions: BTreeSet<Action>,
    pub effect: Effect,
    pub scope: DataScope,
    #[serde(default, skip_serializing_if = "ScopeParams::is_empty")]
    pub scope_params: ScopeParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Grant {
    pub fn allow(
        resource: ResourcePattern,
        actions: impl IntoIterator<Item = Action>,
        scope: DataScope,
    ) -> Self {
        Self {
            id: GrantId::new(),
            source: GrantSource::Direct,
            resource,
            actions: actions.into_iter().collect(),
            effect: Effect::Allow,
            scope,
            scope_params: ScopeParams::new(),
            expires_at: None,
        }
    }

    /// Deny grants carry no meaningful scope; `SelfOnly` is recorded.
    pub fn deny(resource: ResourcePattern, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(resource, actions, DataScope::SelfOnly)
        }
    }

    /// `Custom`-scoped allow grant over explicit ids.
    pub fn allow_custom(
        resource: ResourcePattern,
        actions: impl IntoIterator<Item = Action>,
        params: ScopeParams,
    ) -> Self {
        Self {
            scope_params: params,
            ..Self::allow(resource, actions, DataScope::Custom)
        }
    }

    pub fn from_role(mut self, role: RoleCode) -> Self {
        self.source = GrantSource::Role(role);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn covers(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    pub fn addresses(&self, resource: &ResourceCode) -> bool {
        self.resource.matches(resource)
    }

    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub fn is_deny(&self) -> bool {
        self.effect == Effect::Deny
    }
}
