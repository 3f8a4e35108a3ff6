//! Update Scheduling
//!
//! This module turns bursts of synchronous invalidations into one ordered
//! flush per tick.
//!
//! # Overview
//!
//! Invalidated watchers land in the [`queue`], deduplicated by id. The
//! first arrival of a tick schedules a flush through the microtask batcher
//! in [`tick`]; when the host's task loop yields, the flush sorts the
//! pending watchers by creation order and runs each exactly once, bounded
//! against circular update chains.
//!
//! The batcher is also the public "wait for the updates to apply" surface:
//! [`next_tick`] runs a callback after the flush, [`next_tick_async`]
//! returns an awaitable.

pub mod queue;
pub mod tick;

pub use queue::{last_flush_at, MAX_UPDATE_COUNT};
pub use tick::{next_tick, next_tick_async};
