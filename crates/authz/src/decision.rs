use chrono::{DateTime, Utc};
use serde::Serialize;

use gatehouse_core::{DataScope, ScopeParams};

/// Why a decision came out the way it did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// Unknown resource, or no grant addresses this resource/action.
    NotFound,
    /// Matching grants existed but every one had expired.
    Expired,
    /// The principal's security level is below the resource minimum.
    Insufficient,
    /// Only `Custom` grants matched and none resolved against the context.
    InvalidScope,
    /// An explicit DENY grant matched.
    Denied,
    /// The grant store failed or timed out.
    Error,
}

impl DecisionReason {
    pub const ALL: [DecisionReason; 6] = [
        DecisionReason::NotFound,
        DecisionReason::Expired,
        DecisionReason::Insufficient,
        DecisionReason::InvalidScope,
        DecisionReason::Denied,
        DecisionReason::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::NotFound => "NOT_FOUND",
            DecisionReason::Expired => "EXPIRED",
            DecisionReason::Insufficient => "INSUFFICIENT",
            DecisionReason::InvalidScope => "INVALID_SCOPE",
            DecisionReason::Denied => "DENIED",
            DecisionReason::Error => "ERROR",
        }
    }
}

impl core::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one evaluation.
///
/// # Invariants
/// - allowed ⇒ `effective_scope` is present
/// - denied ⇒ `reason` is present
///
/// Both hold by construction: the only way to build a `Decision` is through
/// [`Decision::allow`], [`Decision::deny`] and the crate-internal fallback.
/// Decisions are never patched; a new evaluation produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    allowed: bool,
    reason: Option<DecisionReason>,
    effective_scope: Option<DataScope>,
    #[serde(skip_serializing_if = "ScopeParams::is_empty")]
    scope_params: ScopeParams,
    evaluated_at: DateTime<Utc>,
    version: u64,
    /// Some `Custom` grant was dropped during scope resolution.
    scope_warning: bool,
}

impl Decision {
    pub fn allow(
        scope: DataScope,
        params: ScopeParams,
        version: u64,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            allowed: true,
            reason: None,
            effective_scope: Some(scope),
            scope_params: params,
            evaluated_at,
            version,
            scope_warning: false,
        }
    }

    pub fn deny(reason: DecisionReason, version: u64, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            effective_scope: None,
            scope_params: ScopeParams::new(),
            evaluated_at,
            version,
            scope_warning: false,
        }
    }

    /// Fail-open result for a store failure: allowed, narrowest scope,
    /// `reason = Error` so audit can tell it apart.
    pub(crate) fn fail_open(version: u64, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            reason: Some(DecisionReason::Error),
            ..Self::allow(DataScope::SelfOnly, ScopeParams::new(), version, evaluated_at)
        }
    }

    pub(crate) fn with_scope_warning(mut self) -> Self {
        self.scope_warning = true;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> Option<DecisionReason> {
        self.reason
    }

    pub fn effective_scope(&self) -> Option<DataScope> {
        self.effective_scope
    }

    pub fn scope_params(&self) -> &ScopeParams {
        &self.scope_params
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_scope_warning(&self) -> bool {
        self.scope_warning
    }

    /// Same outcome as `other`, ignoring when and at which version it was made.
    pub fn same_outcome(&self, other: &Decision) -> bool {
        self.allowed == other.allowed
            && self.reason == other.reason
            && self.effective_scope == other.effective_scope
            && self.scope_params == other.scope_params
            && self.scope_warning == other.scope_warning
    }

    /// Whether an allowed decision reaches at least as far as `requested`.
    ///
    /// `All` covers everything; otherwise ordered scopes compare by breadth
    /// and `Custom` only covers `Custom`.
    pub fn covers_scope(&self, requested: DataScope) -> bool {
        let Some(effective) = self.effective_scope.filter(|_| self.allowed) else {
            return false;
        };
        if effective == DataScope::All || effective == requested {
            return true;
        }
        match (effective.breadth(), requested.breadth()) {
            (Some(have), Some(want)) => have >= want,
            _ => false,
        }
    }
}
