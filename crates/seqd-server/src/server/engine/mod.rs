//! Look-ahead buffering engine.
//!
//! ## Structure
//!
//! - [`registry`] - bucket key to runtime state, idle sweep.
//! - [`monitor`] - one periodic task per bucket, refilling below the watermark.
//! - [`refill`] - durable counter extension and range republication.
//! - [`allocator`] - pops the next buffered value.

pub mod allocator;
pub mod monitor;
pub mod refill;
pub mod registry;

use crate::server::config::EngineConfig;
use allocator::Allocator;
use refill::Refiller;
use registry::Registry;
use seqd_core::store::{BufferStore, CounterStore};
use std::sync::Arc;

/// The engine components shared by every session.
pub struct Engine<B, C> {
    config: EngineConfig,
    registry: Registry<B, C>,
    allocator: Allocator<B>,
}

impl<B, C> Engine<B, C>
where
    B: BufferStore,
    C: CounterStore,
{
    pub fn new(buffer: Arc<B>, counter: Arc<C>, config: EngineConfig) -> Self {
        let refiller = Refiller::new(Arc::clone(&buffer), counter);
        Self {
            registry: Registry::new(refiller, &config),
            allocator: Allocator::new(buffer),
            config,
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn registry(&self) -> &Registry<B, C> {
        &self.registry
    }

    pub const fn allocator(&self) -> &Allocator<B> {
        &self.allocator
    }
}
