//! Sequence service internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`telemetry`] - logging, optional OpenTelemetry export, metric helpers.
//! - [`engine`] - registry, bucket monitors, refill and allocation.
//! - [`connection`] - TCP listener and per-connection sessions.
//! - [`backend`] - Redis buffer and MySQL counter stores.

pub mod backend;
pub mod config;
pub mod connection;
pub mod engine;
pub mod telemetry;
