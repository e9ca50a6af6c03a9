//! Per-bucket background monitor.
//!
//! Every active bucket owns exactly one monitor task. On each tick the task
//! reads the bucket's buffer depth and, when it is below the low watermark,
//! runs one refill inline. Because the refill is awaited inside the tick, two
//! refills of the same bucket can never overlap; a slow store only delays that
//! bucket's next tick.
//!
//! Monitors are stopped by the registry's idle sweep through their
//! [`CancellationToken`]. Cancellation is observed between ticks, so a refill
//! that is already running always completes. A monitor started for a revived
//! bucket waits for its stopped predecessor's task to end before its first
//! tick, which keeps refills of one bucket serialized across restarts.

use super::refill::Refiller;
use crate::server::{
    config::EngineConfig,
    telemetry::{decrement_monitors_active, increment_monitors_active},
};
use core::time::Duration;
use portable_atomic::{AtomicU32, AtomicU64, Ordering};
use seqd_core::{
    BucketKey, Result,
    store::{BufferStore, CounterStore},
};
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// State shared between a bucket's registry entry and its monitor task.
#[derive(Debug)]
pub struct BucketShared {
    step: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl BucketShared {
    pub fn new(step: u64) -> Self {
        Self {
            step: AtomicU64::new(step),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Step used by the next refill.
    pub fn step(&self) -> u64 {
        self.step.load(Ordering::Relaxed)
    }

    pub fn set_step(&self, step: u64) {
        self.step.store(step, Ordering::Relaxed);
    }

    /// Number of refill attempts that failed since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Timing knobs of a monitor, taken from [`EngineConfig`].
#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub tick_interval: Duration,
    pub low_watermark: usize,
    pub backoff_max: Duration,
    pub alert_after: u32,
}

impl MonitorSettings {
    /// Delay before the next refill attempt after `failures` consecutive
    /// failures: `tick_interval * 2^failures`, capped at `backoff_max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1_u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.tick_interval
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

impl From<&EngineConfig> for MonitorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            low_watermark: config.low_watermark,
            backoff_max: config.refill_backoff_max,
            alert_after: config.refill_alert_after,
        }
    }
}

/// Handle to a running monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Asks the monitor to stop after its current tick.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// `false` once the monitor was stopped or its task ended for any other
    /// reason.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    /// Gives up the handle, keeping only the task so a successor can wait on
    /// it.
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Spawns the monitor task of `key` on the current Tokio runtime.
///
/// `predecessor` is the task of a stopped monitor for the same bucket. The
/// new monitor does not tick until it has finished.
pub fn spawn_monitor<B, C>(
    key: BucketKey,
    shared: Arc<BucketShared>,
    refiller: Refiller<B, C>,
    settings: MonitorSettings,
    predecessor: Option<JoinHandle<()>>,
) -> MonitorHandle
where
    B: BufferStore,
    C: CounterStore,
{
    let token = CancellationToken::new();
    let task = tokio::spawn(monitor_loop(
        key,
        shared,
        refiller,
        settings,
        token.clone(),
        predecessor,
    ));
    MonitorHandle { token, task }
}

async fn monitor_loop<B, C>(
    key: BucketKey,
    shared: Arc<BucketShared>,
    refiller: Refiller<B, C>,
    settings: MonitorSettings,
    token: CancellationToken,
    predecessor: Option<JoinHandle<()>>,
) where
    B: BufferStore,
    C: CounterStore,
{
    if let Some(previous) = predecessor {
        // Not raced against cancellation: a successor of this monitor must
        // also wait out the refill still in flight.
        if let Err(e) = previous.await {
            tracing::error!("Previous monitor for {key} failed: {e}");
        }
    }

    increment_monitors_active();
    tracing::debug!("Monitor for {key} started");

    let mut ticker = interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut retry_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if retry_at.is_some_and(|at| Instant::now() < at) {
            continue;
        }

        match tick(&key, &shared, &refiller, &settings).await {
            Ok(_) => {
                if shared.consecutive_failures.swap(0, Ordering::Relaxed) > 0 {
                    tracing::info!("Refills for {key} recovered");
                }
                retry_at = None;
            }
            Err(e) => {
                let failures = shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                let delay = settings.backoff(failures);
                retry_at = Some(Instant::now() + delay);

                if failures == settings.alert_after {
                    tracing::error!(
                        "{key}: {failures} consecutive refill failures, buffer may run dry: {e}"
                    );
                } else {
                    tracing::warn!(
                        "Refill for {key} failed ({failures} in a row), retry in {delay:?}: {e}"
                    );
                }
            }
        }
    }

    decrement_monitors_active();
    tracing::debug!("Monitor for {key} stopped");
}

/// One monitor tick. Returns the refilled range, if a refill was needed.
async fn tick<B, C>(
    key: &BucketKey,
    shared: &BucketShared,
    refiller: &Refiller<B, C>,
    settings: &MonitorSettings,
) -> Result<Option<core::ops::RangeInclusive<u64>>>
where
    B: BufferStore,
    C: CounterStore,
{
    let depth = refiller.buffer().depth(key).await?;
    if depth >= settings.low_watermark {
        return Ok(None);
    }

    tracing::trace!(
        "Buffer for {key} at {depth}, below watermark {}",
        settings.low_watermark
    );
    refiller.refill(key, shared.step()).await.map(Some)
}
