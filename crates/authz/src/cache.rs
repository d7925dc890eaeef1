//! Decision cache keyed by principal, resource, action and context.
//!
//! The principal part of the key is its id plus a fingerprint of the roles
//! and direct grants it was presented with, so a session whose grant set
//! changes under the same id never reads a decision computed for the old set.
//!
//! Correctness comes from version stamps, not from eviction: every entry
//! records the grant version it was computed under, and a read whose stamp no
//! longer matches the principal's current version is a miss. Invalidating a
//! principal is therefore a single counter bump regardless of cache size.
//! The TTL only bounds staleness for deployments where mutation events may not
//! arrive (e.g. several nodes sharing a cache with no invalidation channel).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use gatehouse_core::{Action, PrincipalId, ResourceCode};

use crate::decision::Decision;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub principal_id: PrincipalId,
    pub principal_hash: u64,
    pub resource: ResourceCode,
    pub action: Action,
    pub context_hash: u64,
}

impl CacheKey {
    pub fn new(
        principal_id: PrincipalId,
        principal_hash: u64,
        resource: ResourceCode,
        action: Action,
        context_hash: u64,
    ) -> Self {
        Self {
            principal_id,
            principal_hash,
            resource,
            action,
            context_hash,
        }
    }
}

/// Grant version an entry was computed under.
///
/// `epoch` moves when a role definition changes (affects everyone);
/// `principal` moves when a single principal's grants change. Both are
/// monotonic and never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct GrantVersion {
    pub epoch: u64,
    pub principal: u64,
}

impl GrantVersion {
    /// Single monotonic number for the stamp, recorded on decisions.
    pub fn sequence(&self) -> u64 {
        self.epoch.saturating_add(self.principal)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub decision: Decision,
    pub expires_at: Instant,
    pub version: GrantVersion,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of a cache read.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<CacheEntry>),
    /// An entry existed but its grant version is out of date.
    Stale,
    /// An entry existed but its TTL elapsed.
    Expired,
    Miss,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry corrupted: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_rejections: u64,
    pub expirations: u64,
    pub evictions: u64,
}

/// Storage behind the decision engine.
///
/// Implementations must be safe to call from many tasks at once. Any error
/// makes the engine treat the operation as a miss and recompute; a cache is
/// never allowed to change an outcome.
pub trait DecisionCache: Send + Sync + core::fmt::Debug {
    fn get(&self, key: &CacheKey) -> Result<CacheLookup, CacheError>;

    fn put(
        &self,
        key: CacheKey,
        decision: Decision,
        version: GrantVersion,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Version new entries for `principal_id` must be stamped with.
    fn current_version(&self, principal_id: PrincipalId) -> Result<GrantVersion, CacheError>;

    /// Bump the principal's version, optionally also evicting its entries
    /// under `resource_prefix` right away.
    fn invalidate(
        &self,
        principal_id: PrincipalId,
        resource_prefix: Option<&str>,
    ) -> Result<GrantVersion, CacheError>;

    fn bump_version(&self, principal_id: PrincipalId) -> Result<GrantVersion, CacheError> {
        self.invalidate(principal_id, None)
    }

    /// Invalidate every principal at once.
    fn bump_epoch(&self) -> Result<u64, CacheError>;

    /// Drop every entry. Versions are kept so they are never reused.
    fn clear(&self) -> Result<usize, CacheError>;

    /// Drop entries whose TTL has elapsed; returns how many were removed.
    fn sweep_expired(&self) -> Result<usize, CacheError>;

    fn stats(&self) -> CacheStats;
}

/// Sharded concurrent map; readers clone an `Arc` to an immutable entry and
/// writers only lock the shard holding the key they touch.
#[derive(Debug, Default)]
pub struct InMemoryDecisionCache {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    versions: DashMap<PrincipalId, u64>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn version_of(&self, principal_id: PrincipalId) -> GrantVersion {
        GrantVersion {
            epoch: self.epoch.load(Ordering::Acquire),
            principal: self.versions.get(&principal_id).map(|v| *v).unwrap_or(0),
        }
    }

    /// Remove `key` only if it still maps to `seen`, so a fresher entry
    /// written concurrently survives.
    fn evict_if_same(&self, key: &CacheKey, seen: &Arc<CacheEntry>) {
        if self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, seen))
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl DecisionCache for InMemoryDecisionCache {
    fn get(&self, key: &CacheKey) -> Result<CacheLookup, CacheError> {
        // Clone the Arc out so the shard guard is released before any removal.
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()));

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        };

        if entry.version != self.version_of(key.principal_id) {
            self.stale.fetch_add(1, Ordering::Relaxed);
            self.evict_if_same(key, &entry);
            return Ok(CacheLookup::Stale);
        }

        if entry.is_expired(Instant::now()) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.evict_if_same(key, &entry);
            return Ok(CacheLookup::Expired);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(CacheLookup::Hit(entry))
    }

    fn put(
        &self,
        key: CacheKey,
        decision: Decision,
        version: GrantVersion,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        // Already stale: storing it would only cost a later miss.
        if version != self.version_of(key.principal_id) {
            return Ok(());
        }

        let entry = CacheEntry {
            decision,
            expires_at: Instant::now() + ttl,
            version,
        };
        self.entries.insert(key, Arc::new(entry));
        Ok(())
    }

    fn current_version(&self, principal_id: PrincipalId) -> Result<GrantVersion, CacheError> {
        Ok(self.version_of(principal_id))
    }

    fn invalidate(
        &self,
        principal_id: PrincipalId,
        resource_prefix: Option<&str>,
    ) -> Result<GrantVersion, CacheError> {
        {
            let mut v = self.versions.entry(principal_id).or_insert(0);
            *v += 1;
        }

        if let Some(prefix) = resource_prefix {
            let before = self.entries.len();
            self.entries
                .retain(|k, _| !(k.principal_id == principal_id && k.resource.starts_with(prefix)));
            let removed = before.saturating_sub(self.entries.len());
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        Ok(self.version_of(principal_id))
    }

    fn bump_epoch(&self) -> Result<u64, CacheError> {
        Ok(self.epoch.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.entries.len();
        self.entries.clear();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_rejections: self.stale.load(Ordering::Relaxed),
            expirations: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatehouse_core::{DataScope, ScopeParams};

    fn key(principal_id: PrincipalId, code: &'static str) -> CacheKey {
        CacheKey::new(principal_id, 0, ResourceCode::parse(code).unwrap(), Action::Read, 0)
    }

    fn decision() -> Decision {
        Decision::allow(DataScope::Dept, ScopeParams::new(), 0, Utc::now())
    }

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn hit_after_put() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let v = cache.current_version(pid).unwrap();

        cache.put(key(pid, "smart:device"), decision(), v, TTL).unwrap();

        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Hit(_)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn bump_makes_existing_entries_stale() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let v = cache.current_version(pid).unwrap();
        cache.put(key(pid, "smart:device"), decision(), v, TTL).unwrap();

        let bumped = cache.bump_version(pid).unwrap();
        assert!(bumped.principal > v.principal);

        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Stale));
        // Stale entry was evicted on read.
        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Miss));
    }

    #[test]
    fn bump_for_one_principal_leaves_others_alone() {
        let cache = InMemoryDecisionCache::new();
        let alice = PrincipalId::new();
        let bob = PrincipalId::new();
        for pid in [alice, bob] {
            let v = cache.current_version(pid).unwrap();
            cache.put(key(pid, "smart:device"), decision(), v, TTL).unwrap();
        }

        cache.bump_version(alice).unwrap();

        assert!(matches!(cache.get(&key(bob, "smart:device")).unwrap(), CacheLookup::Hit(_)));
    }

    #[test]
    fn put_with_outdated_version_is_dropped() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let before = cache.current_version(pid).unwrap();
        cache.bump_version(pid).unwrap();

        cache.put(key(pid, "smart:device"), decision(), before, TTL).unwrap();

        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Miss));
    }

    #[test]
    fn epoch_bump_invalidates_everyone() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let v = cache.current_version(pid).unwrap();
        cache.put(key(pid, "smart:device"), decision(), v, TTL).unwrap();

        cache.bump_epoch().unwrap();

        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Stale));
    }

    #[test]
    fn expired_entries_are_rejected_and_swept() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let v = cache.current_version(pid).unwrap();
        cache.put(key(pid, "smart:device"), decision(), v, Duration::ZERO).unwrap();
        cache.put(key(pid, "visitor:record"), decision(), v, Duration::ZERO).unwrap();
        cache.put(key(pid, "smart:area"), decision(), v, TTL).unwrap();

        assert!(matches!(cache.get(&key(pid, "smart:device")).unwrap(), CacheLookup::Expired));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn prefix_invalidation_evicts_matching_entries_eagerly() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        let v = cache.current_version(pid).unwrap();
        cache.put(key(pid, "smart:access:device"), decision(), v, TTL).unwrap();
        cache.put(key(pid, "visitor:record"), decision(), v, TTL).unwrap();

        cache.invalidate(pid, Some("smart")).unwrap();

        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn clear_keeps_versions_monotonic() {
        let cache = InMemoryDecisionCache::new();
        let pid = PrincipalId::new();
        cache.bump_version(pid).unwrap();
        cache.bump_version(pid).unwrap();

        cache.clear().unwrap();

        assert_eq!(cache.current_version(pid).unwrap().principal, 2);
    }
}
