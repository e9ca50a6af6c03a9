//! Error types for the sequence service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the service contains and logs at the component boundary where it happens.
//! None of these are sent over the wire: a session that hits one is closed,
//! and a monitor that hits one retries on a later tick.
//!
//! ## Error Cases
//! - `Protocol`: A request line could not be decoded or failed validation.
//! - `ConnectionTimeout`: A client sent nothing within the idle deadline.
//! - `StoreUnavailable`: The fast store or the durable store failed a call.
//! - `CounterUnderflow`: The durable store returned a value that cannot cover
//!   the requested step.
//! - `CounterOverflow`: Adding the step would take a counter past `u64::MAX`.
//! - `ChannelError`: The read and write halves of a session lost each other.
//! - `Io`: A socket read or write failed.
//!
//! An empty buffer is *not* an error. It is reported as
//! [`Allocation::Exhausted`](crate::types::Allocation::Exhausted).

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Which backing store a [`Error::StoreUnavailable`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// The shared in-memory store holding the per-bucket buffers.
    Fast,
    /// The relational store holding the per-bucket counters.
    Durable,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::Durable => f.write_str("durable"),
        }
    }
}

/// Unified error type for the sequence service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request line was malformed or carried invalid fields.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// No request arrived within the session idle deadline.
    #[error("Connection idle timeout")]
    ConnectionTimeout,

    /// A call to one of the backing stores failed.
    #[error("{store} store unavailable: {context}")]
    StoreUnavailable { store: StoreKind, context: String },

    /// The durable counter came back smaller than the step just added to it.
    #[error("Counter for {key} returned {value}, which is below step {step}")]
    CounterUnderflow { key: String, value: u64, step: u64 },

    /// The counter cannot take another step without wrapping.
    #[error("Counter for {key} at {value} cannot advance by {step}")]
    CounterOverflow { key: String, value: u64, step: u64 },

    /// Internal channel send/receive failure between session halves.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn fast_store(err: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: StoreKind::Fast,
            context: err.to_string(),
        }
    }

    pub fn durable_store(err: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: StoreKind::Durable,
            context: err.to_string(),
        }
    }

    /// Returns `true` for errors caused by a backing store rather than by the
    /// client or the socket.
    pub const fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::CounterUnderflow { .. }
                | Self::CounterOverflow { .. }
        )
    }
}
