//! Cache invalidation driven by grant-store mutations, plus the TTL sweeper.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use gatehouse_events::{Event, GrantMutation, Subscription};

use crate::audit::{AuditEvent, AuditSink, emit};
use crate::cache::{CacheError, DecisionCache};

/// How long the worker blocks on the subscription before checking for
/// shutdown and sweep deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Applies grant mutations to a decision cache.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn DecisionCache>,
    audit: Arc<dyn AuditSink>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn DecisionCache>, audit: Arc<dyn AuditSink>) -> Self {
        Self { cache, audit }
    }

    /// Bump the affected principal's version, or the global epoch for a
    /// role-wide change. Applying the same mutation twice is harmless.
    pub fn apply(&self, mutation: &GrantMutation) -> Result<(), CacheError> {
        let principal_id = mutation.principal_id();
        match principal_id {
            Some(pid) => {
                let version = self.cache.bump_version(pid)?;
                info!(
                    principal_id = %pid,
                    mutation = mutation.event_type(),
                    version = version.principal,
                    "invalidated cached decisions"
                );
            }
            None => {
                let epoch = self.cache.bump_epoch()?;
                info!(mutation = mutation.event_type(), epoch, "invalidated all cached decisions");
            }
        }
        emit(self.audit.as_ref(), AuditEvent::cache_cleared(principal_id));
        Ok(())
    }

    /// Run on a background thread until the handle is shut down.
    ///
    /// If the mutation stream closes, the worker keeps sweeping expired
    /// entries; it only stops on shutdown.
    pub fn spawn(
        self,
        subscription: Subscription<GrantMutation>,
        sweep_interval: Duration,
    ) -> InvalidatorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(InvalidatorCounters::default());
        let worker_stats = Arc::clone(&stats);

        let join = thread::Builder::new()
            .name("gatehouse-invalidator".to_string())
            .spawn(move || {
                info!("cache invalidator started");
                let mut bus_open = true;
                let mut last_sweep = Instant::now();

                loop {
                    if bus_open {
                        match shutdown_rx.try_recv() {
                            Ok(()) | Err(TryRecvError::Disconnected) => break,
                            Err(TryRecvError::Empty) => {}
                        }
                        match subscription.recv_timeout(POLL_INTERVAL) {
                            Ok(mutation) => {
                                match self.apply(&mutation) {
                                    Ok(()) => {
                                        worker_stats.mutations.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(err) => warn!(error = %err, "failed to apply grant mutation"),
                                }
                            }
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => {
                                warn!("grant mutation stream closed; only sweeping from now on");
                                bus_open = false;
                            }
                        }
                    } else {
                        match shutdown_rx.recv_timeout(POLL_INTERVAL) {
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            Err(RecvTimeoutError::Timeout) => {}
                        }
                    }

                    if last_sweep.elapsed() >= sweep_interval {
                        last_sweep = Instant::now();
                        match self.cache.sweep_expired() {
                            Ok(removed) => {
                                worker_stats.sweeps.fetch_add(1, Ordering::Relaxed);
                                worker_stats.swept.fetch_add(removed as u64, Ordering::Relaxed);
                                debug!(removed, "swept expired decisions");
                            }
                            Err(err) => warn!(error = %err, "decision cache sweep failed"),
                        }
                    }
                }
                info!("cache invalidator stopped");
            });

        let join = match join {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to spawn cache invalidator thread");
                None
            }
        };

        InvalidatorHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

#[derive(Debug, Default)]
struct InvalidatorCounters {
    mutations: AtomicU64,
    sweeps: AtomicU64,
    swept: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidatorStats {
    pub mutations_applied: u64,
    pub sweeps: u64,
    pub entries_swept: u64,
}

/// Handle to a running invalidator. Dropping it also stops the worker, but
/// without waiting for it.
#[derive(Debug)]
pub struct InvalidatorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<InvalidatorCounters>,
}

impl InvalidatorHandle {
    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    pub fn stats(&self) -> InvalidatorStats {
        InvalidatorStats {
            mutations_applied: self.stats.mutations.load(Ordering::Relaxed),
            sweeps: self.stats.sweeps.load(Ordering::Relaxed),
            entries_swept: self.stats.swept.load(Ordering::Relaxed),
        }
    }
}
