use super::{BufferStore, CounterStore};
use crate::{BucketKey, Error, Result};
use core::ops::RangeInclusive;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Process-local [`BufferStore`].
///
/// All buckets share one mutex, which makes every operation trivially atomic
/// with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    queues: Mutex<HashMap<BucketKey, VecDeque<u64>>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out the bucket's buffered values, head first.
    pub fn snapshot(&self, key: &BucketKey) -> Vec<u64> {
        self.queues
            .lock()
            .get(key)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replaces the bucket's buffer. Intended for seeding tests.
    pub fn seed(&self, key: &BucketKey, values: impl IntoIterator<Item = u64>) {
        self.queues
            .lock()
            .insert(key.clone(), values.into_iter().collect());
    }
}

impl BufferStore for MemoryBuffer {
    async fn pop_front(&self, key: &BucketKey) -> Result<Option<u64>> {
        Ok(self
            .queues
            .lock()
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    async fn depth(&self, key: &BucketKey) -> Result<usize> {
        Ok(self.queues.lock().get(key).map_or(0, VecDeque::len))
    }

    async fn push_range(&self, key: &BucketKey, range: RangeInclusive<u64>) -> Result<()> {
        self.queues
            .lock()
            .entry(key.clone())
            .or_default()
            .extend(range);
        Ok(())
    }
}

/// Process-local [`CounterStore`].
///
/// Counters do not survive the process, so this is only suitable where the
/// whole sequence space is discarded on exit.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    counters: Mutex<HashMap<BucketKey, u64>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current high-water mark of the bucket, `0` if never incremented.
    pub fn value(&self, key: &BucketKey) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }
}

impl CounterStore for MemoryCounter {
    async fn increment(&self, key: &BucketKey, step: u64) -> Result<u64> {
        let mut counters = self.counters.lock();
        let value = counters.entry(key.clone()).or_insert(0);
        let Some(next) = value.checked_add(step) else {
            return Err(Error::CounterOverflow {
                key: key.to_string(),
                value: *value,
                step,
            });
        };
        *value = next;
        Ok(next)
    }
}
