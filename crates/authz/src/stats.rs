use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::decision::{Decision, DecisionReason};

/// Running totals for every evaluation an engine performs.
#[derive(Debug, Default)]
pub struct ValidationStats {
    checks: AtomicU64,
    granted: AtomicU64,
    denied: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_errors: AtomicU64,
    total_micros: AtomicU64,
    by_reason: [AtomicU64; 6],
}

impl ValidationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, decision: &Decision, elapsed: Duration) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if decision.is_allowed() {
            self.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(reason) = decision.reason() {
            self.by_reason[reason_slot(reason)].fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let checks = self.checks.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);

        let lookups = cache_hits + cache_misses;
        StatsSnapshot {
            checks,
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            store_errors: self.store_errors.load(Ordering::Relaxed),
            reasons: DecisionReason::ALL
                .iter()
                .map(|r| (*r, self.by_reason[reason_slot(*r)].load(Ordering::Relaxed)))
                .filter(|(_, n)| *n > 0)
                .collect(),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            avg_evaluation_micros: if checks == 0 { 0 } else { total_micros / checks },
        }
    }
}

fn reason_slot(reason: DecisionReason) -> usize {
    match reason {
        DecisionReason::NotFound => 0,
        DecisionReason::Expired => 1,
        DecisionReason::Insufficient => 2,
        DecisionReason::InvalidScope => 3,
        DecisionReason::Denied => 4,
        DecisionReason::Error => 5,
    }
}

/// Point-in-time copy of [`ValidationStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub checks: u64,
    pub granted: u64,
    pub denied: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store_errors: u64,
    /// Non-zero counts only, in reason order.
    pub reasons: Vec<(DecisionReason, u64)>,
    pub cache_hit_rate: f64,
    pub avg_evaluation_micros: u64,
}

impl StatsSnapshot {
    pub fn count(&self, reason: DecisionReason) -> u64 {
        self.reasons
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
