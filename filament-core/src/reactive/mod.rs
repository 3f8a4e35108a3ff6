//! Reactive Primitives
//!
//! This module implements the core reactive system: observed values,
//! dependencies, watchers, and computed values. Together they form the
//! engine's fine-grained dependency tracking.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A dep is the publish point of one reactive slot. Reading the slot inside
//! an evaluation subscribes the evaluating watcher; writing it notifies all
//! subscribers.
//!
//! ## Observed values
//!
//! State trees are built from [`Value`]: primitives plus shared [`Record`]
//! and [`List`] composites. Observing a composite arms interception on its
//! members, recursively, so reads register deps and writes notify them.
//!
//! ## Watchers
//!
//! A watcher is one reactive computation. It re-discovers its dependency
//! set on every evaluation, so the set always equals exactly what the
//! getter read last time.
//!
//! ## Computed values
//!
//! A computed is a lazy watcher with a cache: invalidation marks it dirty,
//! the next read recomputes.
//!
//! # Implementation Notes
//!
//! Dependency discovery uses a thread-local evaluation context: while a
//! watcher's getter runs, every slot read routes its registration to that
//! watcher. The approach (automatic dependency tracking) is the one used
//! by SolidJS, Vue, and Leptos.

pub(crate) mod computed;
pub(crate) mod context;
pub(crate) mod dep;
pub(crate) mod observer;
pub(crate) mod value;
pub(crate) mod watcher;

pub use computed::{computed, Computed};
pub use context::is_tracking;
pub use dep::Dep;
pub use observer::{
    delete_reactive, observe, observe_root, observe_shallow, set_reactive, Key, Observer,
};
pub use value::{List, Record, Value};
pub use watcher::{
    parse_path, watch, watch_path, WatchHandle, WatchOptions, Watcher, WatcherOptions,
};
