use crate::server::telemetry::{increment_refill_failures, increment_refills, record_ids_skipped};
use core::ops::RangeInclusive;
use seqd_core::{
    BucketKey, Error, Result,
    store::{BufferStore, CounterStore},
};
use std::sync::Arc;

/// Extends a bucket's durable counter and republishes the reserved range
/// into its buffer.
///
/// A `Refiller` only borrows the stores through `Arc`s, so one is cloned into
/// every bucket monitor.
pub struct Refiller<B, C> {
    buffer: Arc<B>,
    counter: Arc<C>,
}

impl<B, C> Clone for Refiller<B, C> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            counter: Arc::clone(&self.counter),
        }
    }
}

impl<B, C> Refiller<B, C>
where
    B: BufferStore,
    C: CounterStore,
{
    pub const fn new(buffer: Arc<B>, counter: Arc<C>) -> Self {
        Self { buffer, counter }
    }

    pub const fn buffer(&self) -> &Arc<B> {
        &self.buffer
    }

    /// Reserves `step` new values for `key` and appends them to its buffer.
    ///
    /// 1. Atomically adds `step` to the durable counter, reading back `V`.
    /// 2. Computes the reserved range `V-step+1 ..= V`.
    /// 3. Pushes the whole range onto the buffer in one all-or-nothing batch.
    ///
    /// If step 1 fails nothing changed and the caller may simply retry. If
    /// step 3 fails the counter has already moved past the range, so those
    /// values are never issued. Uniqueness holds, density does not.
    #[tracing::instrument(level = "debug", skip(self, key), fields(bucket = %key))]
    pub async fn refill(&self, key: &BucketKey, step: u64) -> Result<RangeInclusive<u64>> {
        debug_assert!(step > 0, "refill step must be positive");

        let high = match self.counter.increment(key, step).await {
            Ok(high) => high,
            Err(e) => {
                increment_refill_failures();
                return Err(e);
            }
        };

        // A counter below `step` would produce a range starting at or below
        // zero, overlapping values that may already have been issued.
        if high < step {
            increment_refill_failures();
            return Err(Error::CounterUnderflow {
                key: key.to_string(),
                value: high,
                step,
            });
        }

        let range = (high - step + 1)..=high;

        if let Err(e) = self.buffer.push_range(key, range.clone()).await {
            increment_refill_failures();
            record_ids_skipped(step);
            tracing::warn!(
                "Skipping {}..={} for {key}: counter advanced but push failed: {e}",
                range.start(),
                range.end(),
            );
            return Err(e);
        }

        increment_refills();
        tracing::debug!("Refilled {key} with {}..={}", range.start(), range.end());
        Ok(range)
    }
}
