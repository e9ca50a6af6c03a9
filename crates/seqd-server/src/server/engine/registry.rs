//! Process-wide bucket registry.
//!
//! Maps every bucket seen since startup to its [`BucketState`]. Sessions
//! create entries on first sight of a key and bump their last-access time on
//! every request; each bump also runs the idle sweep, which stops the
//! monitors of buckets nobody asked for in a while.
//!
//! All reads and writes go through a single [`parking_lot::Mutex`]. The lock
//! is never held across an `.await`: spawning or cancelling a monitor is
//! synchronous.

use super::{
    monitor::{BucketShared, MonitorHandle, MonitorSettings, spawn_monitor},
    refill::Refiller,
};
use crate::server::{config::EngineConfig, telemetry::increment_monitors_reaped};
use core::time::Duration;
use parking_lot::Mutex;
use seqd_core::{
    BucketKey,
    store::{BufferStore, CounterStore},
};
use std::{collections::HashMap, sync::Arc};
use tokio::{task::JoinHandle, time::Instant};

/// Runtime state of one bucket.
///
/// Entries are never removed. Reaping only stops the monitor; the next
/// request for the key starts a new one.
#[derive(Debug)]
struct BucketState {
    last_access: Instant,
    shared: Arc<BucketShared>,
    monitor: MonitorHandle,
}

/// Read-only view of a bucket, as returned by [`Registry::snapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub key: BucketKey,
    pub idle_for: Duration,
    pub monitoring: bool,
    pub step: u64,
    pub refill_failures: u32,
}

pub struct Registry<B, C> {
    buckets: Mutex<HashMap<BucketKey, BucketState>>,
    refiller: Refiller<B, C>,
    settings: MonitorSettings,
    idle_threshold: Duration,
    default_step: u64,
}

impl<B, C> Registry<B, C>
where
    B: BufferStore,
    C: CounterStore,
{
    pub fn new(refiller: Refiller<B, C>, config: &EngineConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            refiller,
            settings: MonitorSettings::from(config),
            idle_threshold: config.idle_threshold,
            default_step: config.default_step,
        }
    }

    /// Makes sure `key` has a running monitor.
    ///
    /// Creates the bucket on first sight, and restarts monitoring for a
    /// bucket the idle sweep had stopped. `step` seeds the first refill of a
    /// new or revived monitor. Returns `true` if a monitor was spawned by this
    /// call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn ensure(&self, key: &BucketKey, step: u64) -> bool {
        let mut buckets = self.buckets.lock();
        self.ensure_locked(&mut buckets, key, step, Instant::now())
    }

    /// Records an access to `key` with the step carried by the request, then
    /// runs the idle sweep.
    ///
    /// The most recent request's step governs the bucket's next refill.
    /// Returns `false` if `key` was never [`ensure`](Self::ensure)d.
    pub fn touch(&self, key: &BucketKey, step: u64) -> bool {
        self.touch_at(key, step, Instant::now())
    }

    /// [`ensure`](Self::ensure) followed by [`touch`](Self::touch) under a
    /// single lock acquisition, so no sweep can stop the bucket in between.
    /// Returns `true` if a monitor was spawned.
    pub fn ensure_and_touch(&self, key: &BucketKey, step: u64) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let spawned = self.ensure_locked(&mut buckets, key, step, now);
        Self::touch_locked(&mut buckets, key, step, now);
        self.sweep_locked(&mut buckets, now);
        spawned
    }

    fn touch_at(&self, key: &BucketKey, step: u64, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let found = Self::touch_locked(&mut buckets, key, step, now);
        self.sweep_locked(&mut buckets, now);
        found
    }

    fn ensure_locked(
        &self,
        buckets: &mut HashMap<BucketKey, BucketState>,
        key: &BucketKey,
        step: u64,
        now: Instant,
    ) -> bool {
        if buckets
            .get(key)
            .is_some_and(|state| state.monitor.is_running())
        {
            return false;
        }

        let step = if step == 0 { self.default_step } else { step };
        match buckets.remove(key) {
            Some(stopped) => {
                // Reviving counts as an access, otherwise a concurrent sweep
                // could stop the new monitor before our own touch lands.
                stopped.shared.set_step(step);
                let monitor = self.spawn(
                    key,
                    &stopped.shared,
                    Some(stopped.monitor.into_task()),
                );
                buckets.insert(
                    key.clone(),
                    BucketState {
                        last_access: stopped.last_access.max(now),
                        shared: stopped.shared,
                        monitor,
                    },
                );
                tracing::info!("Resumed monitoring {key}");
            }
            None => {
                let shared = Arc::new(BucketShared::new(step));
                let monitor = self.spawn(key, &shared, None);
                buckets.insert(
                    key.clone(),
                    BucketState {
                        last_access: now,
                        shared,
                        monitor,
                    },
                );
                tracing::info!("Monitoring new bucket {key}");
            }
        }
        true
    }

    fn touch_locked(
        buckets: &mut HashMap<BucketKey, BucketState>,
        key: &BucketKey,
        step: u64,
        now: Instant,
    ) -> bool {
        let Some(state) = buckets.get_mut(key) else {
            return false;
        };
        state.last_access = state.last_access.max(now);
        if step > 0 {
            state.shared.set_step(step);
        }
        true
    }

    /// Stops the monitor of every bucket idle for longer than the threshold.
    /// Returns how many monitors were stopped.
    pub fn sweep(&self) -> usize {
        let mut buckets = self.buckets.lock();
        self.sweep_locked(&mut buckets, Instant::now())
    }

    fn sweep_locked(&self, buckets: &mut HashMap<BucketKey, BucketState>, now: Instant) -> usize {
        let mut reaped = 0;
        for (key, state) in buckets.iter() {
            if state.monitor.is_running()
                && now.saturating_duration_since(state.last_access) > self.idle_threshold
            {
                state.monitor.stop();
                increment_monitors_reaped();
                tracing::info!(
                    "No access to {key} for {:?}, stopping its monitor",
                    self.idle_threshold
                );
                reaped += 1;
            }
        }
        reaped
    }

    pub fn is_monitored(&self, key: &BucketKey) -> bool {
        self.buckets
            .lock()
            .get(key)
            .is_some_and(|state| state.monitor.is_running())
    }

    /// Number of buckets whose monitor is currently running.
    pub fn active_monitors(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .filter(|state| state.monitor.is_running())
            .count()
    }

    /// Point-in-time view of every known bucket, sorted by key.
    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let now = Instant::now();
        let mut snapshot: Vec<_> = self
            .buckets
            .lock()
            .iter()
            .map(|(key, state)| BucketSnapshot {
                key: key.clone(),
                idle_for: now.saturating_duration_since(state.last_access),
                monitoring: state.monitor.is_running(),
                step: state.shared.step(),
                refill_failures: state.shared.consecutive_failures(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    fn spawn(
        &self,
        key: &BucketKey,
        shared: &Arc<BucketShared>,
        predecessor: Option<JoinHandle<()>>,
    ) -> MonitorHandle {
        spawn_monitor(
            key.clone(),
            Arc::clone(shared),
            self.refiller.clone(),
            self.settings,
            predecessor,
        )
    }
}

impl<B, C> Drop for Registry<B, C> {
    fn drop(&mut self) {
        for state in self.buckets.get_mut().values() {
            state.monitor.stop();
        }
    }
}
