#![doc = include_str!("../README.md")]

mod common;
pub mod protocol;
pub mod store;

pub use common::*;
