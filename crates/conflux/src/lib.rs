//! Concurrency primitives for coordinating asynchronous work at high throughput.
//!
//! This crate provides two building blocks:
//!
//! - [`Sequencer`]: a bounded sliding window that lets many units of work be
//!   processed out of order while a completion callback fires strictly in
//!   original arrival order.
//! - [`CoalescingCache`]: a deduplicating, TTL-based cache that coalesces
//!   concurrent identical requests into a single generation.
//!
//! Both primitives are in-memory and process-local. They do not persist
//! anything, do not coordinate across processes, and make no precise timing
//! guarantees: the cache's TTL policy tolerates bounded staleness rather than
//! enforcing strict expiry.

#![warn(missing_docs)]

pub mod coalesce;
pub mod config;
pub mod sequencer;


pub use coalesce::{CacheError, CacheResult, CoalescingCache, Generator, ValueFuture};
pub use sequencer::{Sequencer, SlotHandle};

// Under test this is `tokio::time`, so that tests can pause and advance the
// clock when exercising TTL behavior.
#[cfg(any(test, feature = "test"))]
pub(crate) use tokio::time;

#[cfg(not(any(test, feature = "test")))]
pub(crate) use std::time;
