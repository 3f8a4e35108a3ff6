//! Computed Values
//!
//! A [`Computed`] is a lazy, cached derived value backed by a `lazy`
//! watcher. It is not evaluated at registration; the first read computes
//! and caches, and subsequent reads return the cache until an upstream
//! dependency change marks it dirty again.
//!
//! When read inside another evaluation, the computed re-registers its own
//! deps on the enclosing watcher, so the consumer reacts to the computed
//! value's upstream state and not merely to its cached result.

use std::rc::Rc;

use crate::error;

use super::context;
use super::value::Value;
use super::watcher::{Getter, Watcher, WatcherOptions};

/// A cached derived value that recomputes on demand.
pub struct Computed {
    watcher: Rc<Watcher>,
}

impl Computed {
    /// Register a derived value. The getter does not run here.
    pub fn new<F>(expr: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Value + 'static,
    {
        let getter: Getter = Box::new(move || Ok(getter()));
        Self {
            watcher: Watcher::new(
                expr,
                getter,
                None,
                WatcherOptions {
                    lazy: true,
                    ..Default::default()
                },
            ),
        }
    }

    /// Current value, recomputing first if an upstream dependency changed
    /// since the last read.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            if let Err(err) = self.watcher.evaluate() {
                error::handle_error(
                    &err,
                    &format!("evaluation of computed \"{}\"", self.watcher.expr()),
                );
            }
        }
        if context::is_tracking() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// Stop reacting to upstream changes. Idempotent.
    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

/// Shorthand for [`Computed::new`] with a generic label.
pub fn computed<F>(getter: F) -> Computed
where
    F: Fn() -> Value + 'static,
{
    Computed::new("<computed>", getter)
}
