//! Decision engine: the single evaluation path behind every public check.
//!
//! Order of evaluation for one request:
//!
//! 1. unknown resource → `NOT_FOUND`
//! 2. principal below the resource's minimum level → `INSUFFICIENT`
//!    (before any cache or store access, never cached)
//! 3. cache hit at the current grant version → cached decision
//! 4. read grant version, fetch grants (bounded by `check_timeout`), merge
//!    the principal's direct grants
//! 5. live DENY covering the action → `DENIED`
//! 6. no ALLOW → `NOT_FOUND`; only expired ALLOW → `EXPIRED`; otherwise the
//!    widest resolvable scope, or `INVALID_SCOPE`
//! 7. cache under the version read in step 4, audit, return
//!
//! Store failures become decisions per [`CheckMode`] and are never cached.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use gatehouse_core::{Action, PermissionCode, PrincipalId, ResourceCode};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, TracingAuditSink, emit};
use crate::batch::EvaluationRequest;
use crate::cache::{
    CacheKey, CacheLookup, CacheStats, DecisionCache, GrantVersion, InMemoryDecisionCache,
};
use crate::config::{CheckMode, EngineConfig};
use crate::context::EvaluationContext;
use crate::decision::{Decision, DecisionReason};
use crate::error::AuthzError;
use crate::grant::Grant;
use crate::invalidator::{CacheInvalidator, InvalidatorHandle};
use crate::principal::Principal;
use crate::resource::ResourceRegistry;
use crate::scope::{self, ScopeError};
use crate::stats::{StatsSnapshot, ValidationStats};
use crate::store::{GrantStore, GrantStoreError};

/// Where an evaluation stands after the steps that need no grant fetch.
#[derive(Debug)]
pub(crate) enum Precheck {
    /// Settled without grants (unknown resource, security gate).
    Settled(Decision),
    /// Served from cache.
    Cached(Decision),
    /// Needs grants. `version` is `None` when the cache could not report one,
    /// in which case the result is not cached.
    Miss {
        key: CacheKey,
        version: Option<GrantVersion>,
        refreshed: bool,
    },
}

/// Evaluates capability checks for principals against a grant store.
///
/// Cheap to share: wrap in an `Arc` and call from any number of tasks.
pub struct DecisionEngine {
    pub(crate) registry: Arc<ResourceRegistry>,
    pub(crate) store: Arc<dyn GrantStore>,
    pub(crate) cache: Arc<dyn DecisionCache>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) config: EngineConfig,
    pub(crate) stats: ValidationStats,
}

impl core::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("resources", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct DecisionEngineBuilder {
    registry: Option<Arc<ResourceRegistry>>,
    store: Option<Arc<dyn GrantStore>>,
    cache: Option<Arc<dyn DecisionCache>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: Option<EngineConfig>,
}

impl DecisionEngineBuilder {
    pub fn registry(mut self, registry: impl Into<Arc<ResourceRegistry>>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn GrantStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registry and store are required; the cache defaults to
    /// [`InMemoryDecisionCache`], audit to [`TracingAuditSink`].
    pub fn build(self) -> Result<DecisionEngine, AuthzError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(DecisionEngine {
            registry: self.registry.ok_or(AuthzError::Incomplete("resource registry"))?,
            store: self.store.ok_or(AuthzError::Incomplete("grant store"))?,
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(InMemoryDecisionCache::new())),
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            config,
            stats: ValidationStats::new(),
        })
    }
}

impl DecisionEngine {
    pub fn builder() -> DecisionEngineBuilder {
        DecisionEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Decide whether `principal` may perform `action` on `resource`.
    pub async fn evaluate(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
        action: Action,
        context: &EvaluationContext,
    ) -> Decision {
        let started = Instant::now();

        let decision = match self.precheck(principal, resource, action, context) {
            Precheck::Settled(decision) | Precheck::Cached(decision) => decision,
            Precheck::Miss {
                key,
                version,
                refreshed,
            } => {
                let fetched = self.fetch(principal, resource).await;
                self.complete(principal, &key, context, version, refreshed, fetched)
            }
        };

        self.stats.record(&decision, started.elapsed());
        decision
    }

    /// [`DecisionEngine::evaluate`] over a permission code such as
    /// `"smart:area:read"`. A trailing scope segment is ignored here; use
    /// [`Decision::covers_scope`] to compare it against the result.
    pub async fn evaluate_code(
        &self,
        principal: &Principal,
        code: &str,
        context: &EvaluationContext,
    ) -> Result<Decision, AuthzError> {
        let code = PermissionCode::parse(code)?;
        Ok(self
            .evaluate(principal, &code.resource, code.action, context)
            .await)
    }

    /// [`DecisionEngine::evaluate`] over untrusted strings. Malformed input is
    /// rejected before the cache or the store is consulted.
    pub async fn check(
        &self,
        principal: &Principal,
        resource: &str,
        action: &str,
        context: &EvaluationContext,
    ) -> Result<Decision, AuthzError> {
        let request = EvaluationRequest::parse(resource, action)?;
        Ok(self
            .evaluate(principal, &request.resource, request.action, context)
            .await)
    }

    /// Guard for rendering layers: allowed or not, no context.
    pub async fn can_render(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
        action: Action,
    ) -> bool {
        self.evaluate(principal, resource, action, &EvaluationContext::new())
            .await
            .is_allowed()
    }

    /// Invalidate one principal's cached decisions, or everyone's.
    pub fn clear_cache(&self, principal_id: Option<PrincipalId>) {
        match principal_id {
            Some(pid) => match self.cache.bump_version(pid) {
                Ok(version) => {
                    info!(principal_id = %pid, version = version.principal, "decision cache cleared for principal");
                }
                Err(err) => warn!(principal_id = %pid, error = %err, "failed to clear decision cache"),
            },
            None => {
                let cleared = self.cache.clear().and_then(|n| self.cache.bump_epoch().map(|_| n));
                match cleared {
                    Ok(n) => info!(entries = n, "decision cache cleared"),
                    Err(err) => warn!(error = %err, "failed to clear decision cache"),
                }
            }
        }
        emit(self.audit.as_ref(), AuditEvent::cache_cleared(principal_id));
    }

    /// Invalidate several principals at once.
    pub fn clear_cache_for(&self, principal_ids: impl IntoIterator<Item = PrincipalId>) {
        for pid in principal_ids {
            self.clear_cache(Some(pid));
        }
    }

    /// Invalidate one principal and evict its entries under `resource_prefix`.
    pub fn clear_cache_prefix(&self, principal_id: PrincipalId, resource_prefix: &str) {
        if let Err(err) = self.cache.invalidate(principal_id, Some(resource_prefix)) {
            warn!(principal_id = %principal_id, prefix = resource_prefix, error = %err, "failed to invalidate decision cache");
        }
        emit(self.audit.as_ref(), AuditEvent::cache_cleared(Some(principal_id)));
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidator bound to this engine's cache and audit sink.
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(Arc::clone(&self.cache), Arc::clone(&self.audit))
    }

    /// Subscribe to the grant store and run the invalidator and TTL sweeper
    /// on a background thread.
    pub fn start_invalidator(&self) -> InvalidatorHandle {
        self.invalidator()
            .spawn(self.store.subscribe(), self.config.sweep_interval)
    }

    /// Steps 1 to 3: everything that can settle a request without grants.
    pub(crate) fn precheck(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
        action: Action,
        context: &EvaluationContext,
    ) -> Precheck {
        let Some(definition) = self.registry.get(resource) else {
            let decision = Decision::deny(DecisionReason::NotFound, 0, Utc::now());
            debug!(principal_id = %principal.id, resource = %resource, "unknown resource");
            self.audit_outcome(principal.id, resource, action, &decision);
            return Precheck::Settled(decision);
        };

        if !principal.security_level.satisfies(definition.min_level) {
            let decision = Decision::deny(DecisionReason::Insufficient, 0, Utc::now());
            debug!(
                principal_id = %principal.id,
                resource = %resource,
                level = %principal.security_level,
                required = %definition.min_level,
                "security level below resource minimum"
            );
            self.audit_outcome(principal.id, resource, action, &decision);
            return Precheck::Settled(decision);
        }

        let key = CacheKey::new(
            principal.id,
            principal.fingerprint(),
            resource.clone(),
            action,
            context.fingerprint(),
        );

        let refreshed = match self.cache.get(&key) {
            Ok(CacheLookup::Hit(entry)) => {
                debug!(principal_id = %principal.id, resource = %resource, %action, "decision cache hit");
                self.stats.record_cache_hit();
                let decision = entry.decision.clone();
                emit(
                    self.audit.as_ref(),
                    AuditEvent::for_decision(
                        AuditEventType::PermissionCheck,
                        principal.id,
                        resource,
                        action,
                        &decision,
                    ),
                );
                return Precheck::Cached(decision);
            }
            Ok(CacheLookup::Stale) | Ok(CacheLookup::Expired) => true,
            Ok(CacheLookup::Miss) => false,
            Err(err) => {
                warn!(principal_id = %principal.id, resource = %resource, error = %err, "decision cache read failed; recomputing");
                false
            }
        };
        self.stats.record_cache_miss();
        debug!(principal_id = %principal.id, resource = %resource, %action, refreshed, "decision cache miss");

        // Read before fetching: a mutation landing mid-fetch makes this
        // stamp stale and the cached result unreachable.
        let version = match self.cache.current_version(principal.id) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(principal_id = %principal.id, error = %err, "grant version unavailable; result will not be cached");
                None
            }
        };

        Precheck::Miss {
            key,
            version,
            refreshed,
        }
    }

    /// Grant fetch for one resource, bounded by `check_timeout`.
    pub(crate) async fn fetch(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
    ) -> Result<Vec<Grant>, GrantStoreError> {
        let timeout = self.config.check_timeout;
        match tokio::time::timeout(timeout, self.store.fetch_grants(principal, resource)).await {
            Ok(result) => result,
            Err(_) => Err(GrantStoreError::Timeout(timeout)),
        }
    }

    /// Steps 5 to 7 for a request that missed the cache.
    pub(crate) fn complete(
        &self,
        principal: &Principal,
        key: &CacheKey,
        context: &EvaluationContext,
        version: Option<GrantVersion>,
        refreshed: bool,
        fetched: Result<Vec<Grant>, GrantStoreError>,
    ) -> Decision {
        let resource = &key.resource;
        let action = key.action;
        let sequence = version.map(|v| v.sequence()).unwrap_or(0);
        let now = Utc::now();

        let grants = match fetched {
            Ok(grants) => grants,
            Err(err) => {
                self.stats.record_store_error();
                warn!(
                    principal_id = %principal.id,
                    resource = %resource,
                    %action,
                    error = %err,
                    mode = ?self.config.check_mode,
                    "grant store failed"
                );
                let decision = match self.config.check_mode {
                    CheckMode::Strict => Decision::deny(DecisionReason::Error, sequence, now),
                    CheckMode::Loose => Decision::fail_open(sequence, now),
                };
                self.audit_outcome(principal.id, resource, action, &decision);
                return decision;
            }
        };

        let decision = decide(
            grants.iter().chain(principal.direct_grants_for(resource)),
            resource,
            action,
            context,
            now,
            sequence,
        );

        if let Some(version) = version {
            if let Err(err) =
                self.cache
                    .put(key.clone(), decision.clone(), version, self.config.cache_ttl)
            {
                warn!(principal_id = %principal.id, resource = %resource, error = %err, "decision cache write failed");
            }
        }

        self.audit_outcome(principal.id, resource, action, &decision);
        if refreshed {
            emit(
                self.audit.as_ref(),
                AuditEvent::for_decision(
                    AuditEventType::CacheRefreshed,
                    principal.id,
                    resource,
                    action,
                    &decision,
                ),
            );
        }
        decision
    }

    fn audit_outcome(
        &self,
        principal_id: PrincipalId,
        resource: &ResourceCode,
        action: Action,
        decision: &Decision,
    ) {
        emit(
            self.audit.as_ref(),
            AuditEvent::outcome(principal_id, resource, action, decision),
        );
    }
}

/// Pure decision over a fixed set of grants.
pub(crate) fn decide<'a, I>(
    grants: I,
    resource: &ResourceCode,
    action: Action,
    context: &EvaluationContext,
    now: DateTime<Utc>,
    version: u64,
) -> Decision
where
    I: IntoIterator<Item = &'a Grant>,
{
    let relevant: Vec<&Grant> = grants
        .into_iter()
        .filter(|g| g.covers(action) && g.addresses(resource))
        .collect();

    if relevant.iter().any(|g| g.is_deny() && !g.is_expired(now)) {
        return Decision::deny(DecisionReason::Denied, version, now);
    }

    let allows: Vec<&Grant> = relevant.into_iter().filter(|g| g.is_allow()).collect();
    if allows.is_empty() {
        return Decision::deny(DecisionReason::NotFound, version, now);
    }

    let live: Vec<&Grant> = allows.into_iter().filter(|g| !g.is_expired(now)).collect();
    if live.is_empty() {
        return Decision::deny(DecisionReason::Expired, version, now);
    }

    match scope::resolve(live, context) {
        Ok(resolution) => {
            let warn_scope = resolution.has_rejections();
            let decision = Decision::allow(resolution.scope, resolution.params, version, now);
            if warn_scope {
                decision.with_scope_warning()
            } else {
                decision
            }
        }
        Err(ScopeError::Unresolvable { .. }) => {
            Decision::deny(DecisionReason::InvalidScope, version, now)
        }
        Err(ScopeError::NoGrants) => Decision::deny(DecisionReason::NotFound, version, now),
    }
}
