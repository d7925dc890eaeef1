//! Batch evaluation.
//!
//! A batch goes through the same steps as a single evaluation, but identical
//! requests are evaluated once, cache hits are served before anything is
//! fetched, and the grants for all missing resources are fetched together:
//! in one bulk call when the store supports it, otherwise concurrently up to
//! `batch_concurrency` at a time. Dropping the future abandons outstanding
//! fetches; anything already cached stays valid.
//!
//! [`DecisionEngine::evaluate_conditions`] combines a batch under AND/OR
//! logic.

use std::collections::HashMap;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use gatehouse_core::{Action, PermissionCode, ResourceCode, ValidationError};

use crate::context::EvaluationContext;
use crate::decision::Decision;
use crate::engine::{DecisionEngine, Precheck};
use crate::error::AuthzError;
use crate::grant::Grant;
use crate::principal::Principal;
use crate::store::GrantStoreError;

/// One `(resource, action, context)` check inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub resource: ResourceCode,
    pub action: Action,
    #[serde(default, skip_serializing_if = "EvaluationContext::is_empty")]
    pub context: EvaluationContext,
}

impl EvaluationRequest {
    pub fn new(resource: ResourceCode, action: Action) -> Self {
        Self {
            resource,
            action,
            context: EvaluationContext::new(),
        }
    }

    pub fn with_context(mut self, context: EvaluationContext) -> Self {
        self.context = context;
        self
    }

    /// Parse a resource code and an action name from untrusted input.
    pub fn parse(resource: &str, action: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(
            ResourceCode::parse(resource.to_string())?,
            action.parse()?,
        ))
    }

    /// Parse a permission code such as `"smart:device:read"`.
    pub fn from_code(code: &str) -> Result<Self, ValidationError> {
        let code = PermissionCode::parse(code)?;
        Ok(Self::new(code.resource, code.action))
    }
}

/// How the decisions of a composite check are combined.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicOperator {
    /// Every condition must be allowed.
    #[default]
    All,
    /// At least one condition must be allowed.
    Any,
}

impl LogicOperator {
    pub fn combine<'a>(&self, decisions: impl IntoIterator<Item = &'a Decision>) -> bool {
        let mut decisions = decisions.into_iter();
        match self {
            LogicOperator::All => decisions.all(Decision::is_allowed),
            LogicOperator::Any => decisions.any(Decision::is_allowed),
        }
    }
}

/// Result of a composite check: the combined verdict plus one decision per
/// condition, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionOutcome {
    pub operator: LogicOperator,
    pub satisfied: bool,
    pub decisions: Vec<Decision>,
}

impl DecisionEngine {
    /// Evaluate several conditions as one batch and combine them under
    /// `operator`. An empty condition list is rejected rather than read as
    /// vacuously true.
    pub async fn evaluate_conditions(
        &self,
        principal: &Principal,
        conditions: &[EvaluationRequest],
        operator: LogicOperator,
    ) -> Result<ConditionOutcome, AuthzError> {
        if conditions.is_empty() {
            return Err(ValidationError::EmptyConditions.into());
        }

        let decisions = self.evaluate_batch(principal, conditions).await?;
        let satisfied = operator.combine(&decisions);
        debug!(
            principal_id = %principal.id,
            conditions = conditions.len(),
            ?operator,
            satisfied,
            "composite check"
        );

        Ok(ConditionOutcome {
            operator,
            satisfied,
            decisions,
        })
    }

    /// Evaluate `requests` for one principal. The result has one decision per
    /// request, in input order, each equal in outcome to what
    /// [`DecisionEngine::evaluate`] would return under the same state.
    ///
    /// Fails only when the batch exceeds `max_batch_size`, before anything
    /// is looked up.
    pub async fn evaluate_batch(
        &self,
        principal: &Principal,
        requests: &[EvaluationRequest],
    ) -> Result<Vec<Decision>, AuthzError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let limit = self.config.max_batch_size;
        if requests.len() > limit {
            return Err(ValidationError::BatchTooLarge {
                requested: requests.len(),
                limit,
            }
            .into());
        }

        let started = Instant::now();

        // Position of each distinct request, and each input's slot.
        let mut unique: Vec<&EvaluationRequest> = Vec::new();
        let mut slot_of: HashMap<&EvaluationRequest, usize> = HashMap::new();
        let slots: Vec<usize> = requests
            .iter()
            .map(|req| {
                *slot_of.entry(req).or_insert_with(|| {
                    unique.push(req);
                    unique.len() - 1
                })
            })
            .collect();

        let mut results: Vec<Option<Decision>> = vec![None; unique.len()];
        let mut misses = Vec::new();

        for (slot, req) in unique.iter().enumerate() {
            match self.precheck(principal, &req.resource, req.action, &req.context) {
                Precheck::Settled(decision) | Precheck::Cached(decision) => {
                    results[slot] = Some(decision);
                }
                Precheck::Miss {
                    key,
                    version,
                    refreshed,
                } => misses.push((slot, key, version, refreshed)),
            }
        }

        if !misses.is_empty() {
            let mut resources: Vec<ResourceCode> =
                misses.iter().map(|(_, key, _, _)| key.resource.clone()).collect();
            resources.sort();
            resources.dedup();

            debug!(
                principal_id = %principal.id,
                requests = requests.len(),
                distinct = unique.len(),
                fetch = resources.len(),
                "batch evaluation"
            );

            let fetched = self.fetch_many(principal, &resources).await;

            for (slot, key, version, refreshed) in misses {
                let grants = match &fetched {
                    Ok(map) => map.get(&key.resource).cloned().unwrap_or_else(|| Ok(Vec::new())),
                    Err(err) => Err(err.clone()),
                };
                let context = &unique[slot].context;
                results[slot] = Some(self.complete(principal, &key, context, version, refreshed, grants));
            }
        }

        // Every slot was filled by precheck or by the fetch round above.
        let resolved: Vec<Decision> = results.into_iter().flatten().collect();
        let per_request = started.elapsed() / u32::try_from(resolved.len().max(1)).unwrap_or(u32::MAX);
        for decision in &resolved {
            self.stats.record(decision, per_request);
        }

        Ok(slots.into_iter().map(|slot| resolved[slot].clone()).collect())
    }

    /// Populate the cache for `requests`; returns how many were evaluated.
    /// Larger sets are split into batches of `max_batch_size`.
    pub async fn preload(
        &self,
        principal: &Principal,
        requests: &[EvaluationRequest],
    ) -> Result<usize, AuthzError> {
        let mut evaluated = 0;
        for chunk in requests.chunks(self.config.max_batch_size) {
            evaluated += self.evaluate_batch(principal, chunk).await?.len();
        }
        debug!(principal_id = %principal.id, evaluated, "preloaded decisions");
        Ok(evaluated)
    }

    /// Grants for each of `resources`, as one bulk call or as bounded
    /// concurrent single fetches. An outer `Err` means the bulk call failed
    /// for all of them.
    async fn fetch_many(
        &self,
        principal: &Principal,
        resources: &[ResourceCode],
    ) -> Result<HashMap<ResourceCode, Result<Vec<Grant>, GrantStoreError>>, GrantStoreError> {
        if self.store.supports_bulk() {
            let timeout = self.config.check_timeout;
            let bulk = tokio::time::timeout(timeout, self.store.fetch_grants_bulk(principal, resources))
                .await
                .map_err(|_| GrantStoreError::Timeout(timeout))??;
            return Ok(bulk.into_iter().map(|(code, grants)| (code, Ok(grants))).collect());
        }

        let fetched: Vec<(ResourceCode, Result<Vec<Grant>, GrantStoreError>)> =
            stream::iter(resources)
                .map(|resource| async move {
                    (resource.clone(), self.fetch(principal, resource).await)
                })
                .buffer_unordered(self.config.batch_concurrency)
                .collect()
                .await;

        Ok(fetched.into_iter().collect())
    }
}
