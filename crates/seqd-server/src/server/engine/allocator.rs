use crate::server::telemetry::{increment_exhausted, increment_ids_issued};
use seqd_core::{BucketKey, Result, store::BufferStore, types::Allocation};
use std::sync::Arc;

/// Hands out the next buffered value of a bucket.
///
/// Never waits for a refill: an empty buffer is reported as
/// [`Allocation::Exhausted`] and the client is expected to retry.
pub struct Allocator<B> {
    buffer: Arc<B>,
}

impl<B: BufferStore> Allocator<B> {
    pub const fn new(buffer: Arc<B>) -> Self {
        Self { buffer }
    }

    pub async fn allocate(&self, key: &BucketKey) -> Result<Allocation> {
        let allocation = Allocation::from(self.buffer.pop_front(key).await?);
        match allocation {
            Allocation::Issued(id) => {
                increment_ids_issued();
                tracing::trace!("Issued {id} from {key}");
            }
            Allocation::Exhausted => {
                increment_exhausted();
                tracing::debug!("Buffer for {key} is empty");
            }
        }
        Ok(allocation)
    }
}
