//! Production store backends.
//!
//! - [`redis`] - `RedisBuffer`, the fast store holding per-bucket buffers.
//! - [`mysql`] - `MysqlCounter`, the durable store holding per-bucket counters.

pub mod mysql;
pub mod redis;
