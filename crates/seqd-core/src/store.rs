//! Contracts for the two backing stores.
//!
//! The engine never talks to Redis or MySQL directly. It is generic over a
//! [`BufferStore`] (the fast store holding each bucket's FIFO of pre-issued
//! values) and a [`CounterStore`] (the durable store holding each bucket's
//! high-water mark). Production backends live in the server crate; the
//! [`memory`] module provides process-local versions of both.
//!
//! Both traits return `Send` futures so that callers can drive them from
//! spawned Tokio tasks without boxing.

use crate::{BucketKey, Result};
use core::future::Future;
use core::ops::RangeInclusive;

pub mod memory;

/// Per-bucket FIFO of pre-issued values.
pub trait BufferStore: Send + Sync + 'static {
    /// Atomically removes and returns the head of the bucket's buffer, or
    /// `None` if the buffer is empty.
    fn pop_front(&self, key: &BucketKey) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Returns how many values are currently buffered for the bucket.
    fn depth(&self, key: &BucketKey) -> impl Future<Output = Result<usize>> + Send;

    /// Appends every value of `range`, in ascending order, to the tail of the
    /// bucket's buffer.
    ///
    /// The push is all-or-nothing: concurrent poppers observe either none of
    /// the range or all of it.
    fn push_range(
        &self,
        key: &BucketKey,
        range: RangeInclusive<u64>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Durable, monotonically increasing per-bucket counter.
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically adds `step` to the bucket's counter and returns the new
    /// value. A bucket without a counter starts from `0`.
    fn increment(&self, key: &BucketKey, step: u64) -> impl Future<Output = Result<u64>> + Send;
}
