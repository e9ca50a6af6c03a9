//! TCP front end.
//!
//! - [`listener`] - accept loop (`Listener`).
//! - [`session`] - per-connection request/reply handling.

pub mod listener;
pub mod session;
