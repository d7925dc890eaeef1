//! Data scope resolution across every ALLOW grant that matched a request.
//!
//! A principal gets the best of every grant that lets it in: the broadest
//! ordered scope wins, and the ids of all resolvable `Custom` grants are
//! unioned on top. `All` subsumes everything, so no ids are carried with it.

use thiserror::Error;

use gatehouse_core::{DataScope, GrantId, ScopeParams};

use crate::context::EvaluationContext;
use crate::grant::Grant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeResolution {
    pub scope: DataScope,
    /// Union of resolvable `Custom` params; empty under `All`.
    pub params: ScopeParams,
    /// `Custom` grants left out because their params did not resolve. Sorted.
    pub rejected: Vec<GrantId>,
}

impl ScopeResolution {
    pub fn has_rejections(&self) -> bool {
        !self.rejected.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("no grants to resolve")]
    NoGrants,

    #[error("no grant resolved against the context ({} rejected)", rejected.len())]
    Unresolvable { rejected: Vec<GrantId> },
}

/// Resolve the effective scope of `grants` (assumed to be live ALLOW grants
/// for the same resource and action). Order of `grants` does not matter.
pub fn resolve<'a, I>(grants: I, context: &EvaluationContext) -> Result<ScopeResolution, ScopeError>
where
    I: IntoIterator<Item = &'a Grant>,
{
    let mut seen_any = false;
    let mut widest: Option<DataScope> = None;
    let mut custom: Option<ScopeParams> = None;
    let mut rejected = Vec::new();

    for grant in grants {
        seen_any = true;

        if grant.scope.is_custom() {
            if custom_resolves(&grant.scope_params, context) {
                custom
                    .get_or_insert_with(ScopeParams::new)
                    .union_with(&grant.scope_params);
            } else {
                rejected.push(grant.id);
            }
            continue;
        }

        widest = Some(match widest {
            Some(current) => current.wider(grant.scope).unwrap_or(current),
            None => grant.scope,
        });
    }

    if !seen_any {
        return Err(ScopeError::NoGrants);
    }
    rejected.sort();

    match (widest, custom) {
        (Some(DataScope::All), _) => Ok(ScopeResolution {
            scope: DataScope::All,
            params: ScopeParams::new(),
            rejected,
        }),
        (Some(scope), params) => Ok(ScopeResolution {
            scope,
            params: params.unwrap_or_default(),
            rejected,
        }),
        (None, Some(params)) => Ok(ScopeResolution {
            scope: DataScope::Custom,
            params,
            rejected,
        }),
        (None, None) => Err(ScopeError::Unresolvable { rejected }),
    }
}

/// Every dimension the grant names must be within what the context covers,
/// when the context speaks about that dimension at all.
fn custom_resolves(params: &ScopeParams, context: &EvaluationContext) -> bool {
    if params.is_empty() {
        return false;
    }
    params.dimensions().all(|(dimension, ids)| match context.covered(dimension) {
        Some(covered) => ids.is_subset(covered),
        None => true,
    })
}
