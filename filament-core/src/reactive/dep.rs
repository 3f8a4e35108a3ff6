//! Dependencies
//!
//! A [`Dep`] is the minimal publish point of the reactive system: one per
//! observed slot (one per intercepted record field, plus one per container
//! for structural changes such as list length).
//!
//! Reading a slot inside an evaluation registers the currently evaluating
//! watcher as a subscriber; writing the slot notifies every subscriber.
//!
//! Subscribers are held as weak references, so a watcher that was dropped
//! without an explicit teardown does not keep firing: dead entries are pruned
//! on the next notification.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::context;
use super::watcher::Watcher;

/// Counter for generating unique dep IDs.
static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_dep_id() -> u64 {
    DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A dependency: the set of watchers subscribed to one reactive slot.
///
/// Subscribers are kept in insertion order with no duplicates (duplicate
/// prevention happens on the watcher side, which knows which deps it already
/// holds).
pub struct Dep {
    id: u64,
    subs: RefCell<SmallVec<[Weak<Watcher>; 4]>>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: next_dep_id(),
            subs: RefCell::new(SmallVec::new()),
        })
    }

    /// Monotonically increasing, unique per dep.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register the currently evaluating watcher (if any) on this dep.
    ///
    /// No-op outside of an evaluation. The watcher decides whether it is
    /// already subscribed, so reading the same slot many times in one
    /// evaluation subscribes exactly once.
    pub fn depend(self: &Rc<Self>) {
        if let Some(watcher) = context::current() {
            watcher.add_dep(Rc::clone(self));
        }
    }

    /// Add a subscriber. The caller guarantees it is not already present.
    pub fn add_sub(&self, watcher: &Rc<Watcher>) {
        self.subs.borrow_mut().push(Rc::downgrade(watcher));
    }

    /// Remove the subscriber with the given watcher id. No-op if absent.
    pub fn remove_sub(&self, watcher_id: u64) {
        self.subs.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(watcher) => watcher.id() != watcher_id,
            None => false,
        });
    }

    /// Notify every subscriber that the slot changed.
    ///
    /// The subscriber list is snapshotted first: a watcher reacting to the
    /// notification may subscribe or unsubscribe, and that must not corrupt
    /// the iteration.
    pub fn notify(&self) {
        let subs: Vec<Rc<Watcher>> = {
            let mut subs = self.subs.borrow_mut();
            subs.retain(|weak| weak.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for watcher in subs {
            watcher.update();
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::watcher::{Watcher, WatcherOptions};
    use crate::reactive::Value;

    fn noop_watcher() -> Rc<Watcher> {
        Watcher::new(
            "noop",
            Box::new(|| Ok(Value::Null)),
            None,
            WatcherOptions::default(),
        )
    }

    #[test]
    fn dep_ids_are_unique_and_increasing() {
        let a = Dep::new();
        let b = Dep::new();
        assert!(a.id() < b.id());
    }

    #[test]
    fn add_and_remove_subscribers() {
        let dep = Dep::new();
        let w1 = noop_watcher();
        let w2 = noop_watcher();

        dep.add_sub(&w1);
        dep.add_sub(&w2);
        assert_eq!(dep.subscriber_count(), 2);

        dep.remove_sub(w1.id());
        assert_eq!(dep.subscriber_count(), 1);

        // Removing an absent subscriber is a no-op.
        dep.remove_sub(w1.id());
        assert_eq!(dep.subscriber_count(), 1);
    }

    #[test]
    fn dropped_watchers_are_pruned_on_notify() {
        let dep = Dep::new();
        let w1 = noop_watcher();
        dep.add_sub(&w1);
        {
            let w2 = noop_watcher();
            dep.add_sub(&w2);
            assert_eq!(dep.subscriber_count(), 2);
        }
        dep.notify();
        assert_eq!(dep.subscriber_count(), 1);
    }

    #[test]
    fn depend_outside_evaluation_is_a_noop() {
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.subscriber_count(), 0);
    }
}
