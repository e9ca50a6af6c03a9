#![allow(dead_code)]

use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use seqd_core::{
    BucketKey, Error, Result,
    store::{
        CounterStore,
        memory::{MemoryBuffer, MemoryCounter},
    },
};
use seqd_server::server::{config::EngineConfig, engine::Engine};
use std::{collections::HashMap, sync::Arc};

/// Counter store whose increments can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyCounter {
    inner: MemoryCounter,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyCounter {
    pub fn failing() -> Self {
        let counter = Self::default();
        counter.set_failing(true);
        counter
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn value(&self, key: &BucketKey) -> u64 {
        self.inner.value(key)
    }

    /// Number of increments attempted, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CounterStore for FlakyCounter {
    async fn increment(&self, key: &BucketKey, step: u64) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::durable_store("connection refused"));
        }
        self.inner.increment(key, step).await
    }
}

/// Counter store whose increments take `delay` to complete. Records, per
/// bucket, the highest number of increments that were in flight at once.
#[derive(Debug)]
pub struct SlowCounter {
    inner: MemoryCounter,
    delay: Duration,
    in_flight: Mutex<HashMap<BucketKey, (usize, usize)>>,
}

impl SlowCounter {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryCounter::new(),
            delay,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn value(&self, key: &BucketKey) -> u64 {
        self.inner.value(key)
    }

    pub fn max_in_flight(&self, key: &BucketKey) -> usize {
        self.in_flight.lock().get(key).map_or(0, |&(_, max)| max)
    }
}

impl CounterStore for SlowCounter {
    async fn increment(&self, key: &BucketKey, step: u64) -> Result<u64> {
        {
            let mut in_flight = self.in_flight.lock();
            let (current, max) = in_flight.entry(key.clone()).or_default();
            *current += 1;
            *max = (*max).max(*current);
        }

        tokio::time::sleep(self.delay).await;
        let result = self.inner.increment(key, step).await;

        if let Some((current, _)) = self.in_flight.lock().get_mut(key) {
            *current -= 1;
        }
        result
    }
}

pub struct Harness<C = FlakyCounter> {
    pub engine: Arc<Engine<MemoryBuffer, C>>,
    pub buffer: Arc<MemoryBuffer>,
    pub counter: Arc<C>,
}

pub fn harness(config: EngineConfig) -> Harness {
    harness_with(config, FlakyCounter::default())
}

pub fn harness_with<C: CounterStore>(config: EngineConfig, counter: C) -> Harness<C> {
    let buffer = Arc::new(MemoryBuffer::new());
    let counter = Arc::new(counter);
    let engine = Arc::new(Engine::new(
        Arc::clone(&buffer),
        Arc::clone(&counter),
        config,
    ));
    Harness {
        engine,
        buffer,
        counter,
    }
}

pub fn key(app: &str, bucket: &str) -> BucketKey {
    BucketKey::new(app, bucket).unwrap()
}

/// Engine settings with a short tick, for tests that run in real time.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(5),
        refill_backoff_max: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}
