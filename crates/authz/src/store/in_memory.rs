use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use gatehouse_core::{GrantId, PrincipalId, ResourceCode};
use gatehouse_events::{EventBus, GrantMutation, InMemoryEventBus, Subscription};

use super::{GrantStore, GrantStoreError};
use crate::grant::Grant;
use crate::principal::{Principal, RoleCode};

/// In-memory grant store.
///
/// Intended for tests, local tooling and the CLI. Every mutation publishes a
/// [`GrantMutation`] after the write lock is released. A handful of knobs
/// (`set_unavailable`, `set_latency`, `with_bulk_support`) let tests simulate
/// slow or failing backends, and the counters report how the engine used it.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    role_grants: RwLock<HashMap<RoleCode, Vec<Grant>>>,
    direct_grants: RwLock<HashMap<PrincipalId, Vec<Grant>>>,
    bus: InMemoryEventBus<GrantMutation>,
    bulk: bool,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    fetches: AtomicU64,
    bulk_fetches: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise and serve [`GrantStore::fetch_grants_bulk`] as one call.
    pub fn with_bulk_support(mut self) -> Self {
        self.bulk = true;
        self
    }

    /// Attach `grant` to `role` and notify every holder.
    pub fn grant_role(&self, role: impl Into<RoleCode>, grant: Grant) -> GrantId {
        let role = role.into();
        let id = grant.id;
        match self.role_grants.write() {
            Ok(mut map) => map
                .entry(role.clone())
                .or_default()
                .push(grant.from_role(role.clone())),
            Err(_) => warn!(%role, "role grant table poisoned; grant dropped"),
        }
        self.publish(GrantMutation::RoleGrantsChanged {
            role: role.to_string(),
            occurred_at: Utc::now(),
        });
        id
    }

    /// Remove a grant from `role`; returns whether it existed.
    pub fn revoke_role_grant(&self, role: &RoleCode, grant_id: GrantId) -> bool {
        let removed = match self.role_grants.write() {
            Ok(mut map) => map
                .get_mut(role)
                .map(|grants| {
                    let before = grants.len();
                    grants.retain(|g| g.id != grant_id);
                    grants.len() != before
                })
                .unwrap_or(false),
            Err(_) => false,
        };
        if removed {
            self.publish(GrantMutation::RoleGrantsChanged {
                role: role.to_string(),
                occurred_at: Utc::now(),
            });
        }
        removed
    }

    /// Issue a grant directly to a principal.
    pub fn grant_direct(&self, principal_id: PrincipalId, grant: Grant) -> GrantId {
        let id = grant.id;
        match self.direct_grants.write() {
            Ok(mut map) => map.entry(principal_id).or_default().push(grant),
            Err(_) => warn!(%principal_id, "direct grant table poisoned; grant dropped"),
        }
        self.publish(GrantMutation::Granted {
            principal_id,
            grant_id: id,
            occurred_at: Utc::now(),
        });
        id
    }

    pub fn revoke_direct(&self, principal_id: PrincipalId, grant_id: GrantId) -> bool {
        let removed = match self.direct_grants.write() {
            Ok(mut map) => map
                .get_mut(&principal_id)
                .map(|grants| {
                    let before = grants.len();
                    grants.retain(|g| g.id != grant_id);
                    grants.len() != before
                })
                .unwrap_or(false),
            Err(_) => false,
        };
        if removed {
            self.publish(GrantMutation::Revoked {
                principal_id,
                grant_id,
                occurred_at: Utc::now(),
            });
        }
        removed
    }

    /// Role membership lives with the identity provider; this only announces
    /// that it changed.
    pub fn notify_role_changed(&self, principal_id: PrincipalId, role: &RoleCode) {
        self.publish(GrantMutation::RoleChanged {
            principal_id,
            role: role.to_string(),
            occurred_at: Utc::now(),
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Single-resource fetches served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn bulk_fetch_count(&self) -> u64 {
        self.bulk_fetches.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn publish(&self, mutation: GrantMutation) {
        if let Err(err) = self.bus.publish(mutation) {
            warn!(error = ?err, "failed to publish grant mutation");
        }
    }

    fn grants_for(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
    ) -> Result<Vec<Grant>, GrantStoreError> {
        let roles = self
            .role_grants
            .read()
            .map_err(|_| GrantStoreError::Backend("role grant table poisoned".into()))?;
        let direct = self
            .direct_grants
            .read()
            .map_err(|_| GrantStoreError::Backend("direct grant table poisoned".into()))?;

        let from_roles = principal
            .roles
            .iter()
            .filter_map(|role| roles.get(role))
            .flatten();
        let from_store = direct.get(&principal.id).into_iter().flatten();

        Ok(from_roles
            .chain(from_store)
            .filter(|g| g.addresses(resource))
            .cloned()
            .collect())
    }

    async fn enter(&self) -> Result<InFlight<'_>, GrantStoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GrantStoreError::Unavailable("store marked unavailable".into()));
        }
        Ok(guard)
    }
}

/// Decrements the in-flight gauge when a fetch finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn fetch_grants(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
    ) -> Result<Vec<Grant>, GrantStoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await?;
        self.grants_for(principal, resource)
    }

    fn supports_bulk(&self) -> bool {
        self.bulk
    }

    async fn fetch_grants_bulk(
        &self,
        principal: &Principal,
        resources: &[ResourceCode],
    ) -> Result<HashMap<ResourceCode, Vec<Grant>>, GrantStoreError> {
        if !self.bulk {
            let mut out = HashMap::with_capacity(resources.len());
            for resource in resources {
                out.insert(resource.clone(), self.fetch_grants(principal, resource).await?);
            }
            return Ok(out);
        }

        self.bulk_fetches.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await?;
        let mut out = HashMap::with_capacity(resources.len());
        for resource in resources {
            out.insert(resource.clone(), self.grants_for(principal, resource)?);
        }
        Ok(out)
    }

    fn subscribe(&self) -> Subscription<GrantMutation> {
        self.bus.subscribe()
    }
}
