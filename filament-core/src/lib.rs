//! Filament Core
//!
//! This crate provides the reactive dependency-tracking engine at the heart
//! of the Filament UI framework. It implements:
//!
//! - A dynamic observed value model (records and lists with interception)
//! - Automatic, per-evaluation dependency discovery
//! - Watchers, computed values, and watch registration
//! - A batched, deduplicated, id-ordered update scheduler
//! - A microtask batcher (`next_tick`) with an awaitable surface
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: values, observers, deps, watchers, computed values
//! - `scheduler`: the flush queue and the microtask batcher
//!
//! Mutation flows: write → dep notify → watcher invalidation → scheduler
//! queue → (deferred) flush → watcher re-evaluation, which re-discovers its
//! dependencies and then invokes its callback.
//!
//! The engine is single-threaded and cooperative: at most one watcher
//! evaluates at a time, nested evaluation goes through an explicit context
//! stack, and the only suspension point is the deferred scheduler flush.
//! Under an async host the engine must be driven inside a
//! `tokio::task::LocalSet`.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{observe, watch, Record, Value, WatchOptions, next_tick_async};
//!
//! let state = Record::from_pairs([("count", Value::Int(0))]);
//! observe(&Value::Record(state.clone()));
//!
//! let reader = state.clone();
//! let _handle = watch(
//!     move || reader.get("count"),
//!     |new, old| println!("count: {old:?} -> {new:?}"),
//!     WatchOptions::default(),
//! );
//!
//! state.set("count", Value::Int(1));
//! state.set("count", Value::Int(2));
//! next_tick_async().await; // one callback: 0 -> 2
//! ```

pub mod error;
pub mod reactive;
pub mod scheduler;

pub use error::{clear_error_handler, set_error_handler, Error};
pub use reactive::{
    computed, delete_reactive, is_tracking, observe, observe_root, observe_shallow, parse_path,
    set_reactive, watch, watch_path, Computed, Dep, Key, List, Observer, Record, Value,
    WatchHandle, WatchOptions, Watcher, WatcherOptions,
};
pub use scheduler::{last_flush_at, next_tick, next_tick_async, MAX_UPDATE_COUNT};
