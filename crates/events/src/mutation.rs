//! Grant-mutation notifications published by the grant store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{GrantId, PrincipalId};

use crate::Event;

/// Something changed what a principal, or every holder of a role, may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantMutation {
    /// A direct grant was issued to a principal.
    Granted {
        principal_id: PrincipalId,
        grant_id: GrantId,
        occurred_at: DateTime<Utc>,
    },
    /// A direct grant was revoked from a principal.
    Revoked {
        principal_id: PrincipalId,
        grant_id: GrantId,
        occurred_at: DateTime<Utc>,
    },
    /// A principal's role membership changed.
    RoleChanged {
        principal_id: PrincipalId,
        role: String,
        occurred_at: DateTime<Utc>,
    },
    /// The grant set attached to a role changed; affects every holder.
    RoleGrantsChanged {
        role: String,
        occurred_at: DateTime<Utc>,
    },
}

impl GrantMutation {
    /// The single principal affected, or `None` for role-wide changes.
    pub fn principal_id(&self) -> Option<PrincipalId> {
        match self {
            GrantMutation::Granted { principal_id, .. }
            | GrantMutation::Revoked { principal_id, .. }
            | GrantMutation::RoleChanged { principal_id, .. } => Some(*principal_id),
            GrantMutation::RoleGrantsChanged { .. } => None,
        }
    }
}

impl Event for GrantMutation {
    fn event_type(&self) -> &'static str {
        match self {
            GrantMutation::Granted { .. } => "grant.granted",
            GrantMutation::Revoked { .. } => "grant.revoked",
            GrantMutation::RoleChanged { .. } => "grant.role_changed",
            GrantMutation::RoleGrantsChanged { .. } => "grant.role_grants_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GrantMutation::Granted { occurred_at, .. }
            | GrantMutation::Revoked { occurred_at, .. }
            | GrantMutation::RoleChanged { occurred_at, .. }
            | GrantMutation::RoleGrantsChanged { occurred_at, .. } => *occurred_at,
        }
    }
}
