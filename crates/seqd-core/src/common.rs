//! Types and errors shared by every seqd component.
//!
//! - [`types`] - bucket identity and allocation results.
//! - [`error`] - the unified [`Error`] enum and [`Result`] alias.

pub mod error;
pub mod types;

pub use error::{Error, Result, StoreKind};
pub use types::{Allocation, BucketKey};
