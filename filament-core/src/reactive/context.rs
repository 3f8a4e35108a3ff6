//! Evaluation Context
//!
//! The evaluation context tracks which watcher is currently evaluating.
//! This enables automatic dependency tracking: when a reactive slot is read,
//! we can register the current watcher as a subscriber without the watcher
//! declaring its dependencies up front.
//!
//! # Implementation
//!
//! A thread-local stack holds the currently evaluating watchers. Entering an
//! evaluation pushes the watcher, leaving pops it. The stack (rather than a
//! single slot) supports re-entrant evaluation: a getter reading a computed
//! value whose own watcher needs evaluating pushes the inner watcher on top,
//! and the outer one becomes current again once the inner pop happens.
//!
//! At most one watcher is current at any instant; the push/pop discipline is
//! enforced by an RAII guard, never by locking.

use std::cell::RefCell;
use std::rc::Rc;

use super::watcher::Watcher;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Rc<Watcher>>> = RefCell::new(Vec::new());
}

/// Guard that pops the evaluation context when dropped.
///
/// Keeps the stack balanced even when a getter fails partway through.
pub struct EvalGuard {
    watcher_id: u64,
}

/// Enter an evaluation for the given watcher.
///
/// While the returned guard is alive, every dep read routes its registration
/// to this watcher.
pub(crate) fn enter(watcher: Rc<Watcher>) -> EvalGuard {
    let watcher_id = watcher.id();
    CONTEXT_STACK.with(|stack| stack.borrow_mut().push(watcher));
    EvalGuard { watcher_id }
}

/// The currently evaluating watcher, if any.
pub(crate) fn current() -> Option<Rc<Watcher>> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether any evaluation is active on this thread.
pub fn is_tracking() -> bool {
    CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
}

impl Drop for EvalGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Catch mismatched push/pop pairs early.
            if let Some(watcher) = popped {
                debug_assert_eq!(
                    watcher.id(),
                    self.watcher_id,
                    "evaluation context mismatch: expected watcher {}, got {}",
                    self.watcher_id,
                    watcher.id()
                );
            }
        });
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
    fn context_tracks_current_watcher() {
        let watcher = noop_watcher();

        assert!(!is_tracking());
        assert!(current().is_none());

        {
            let _guard = enter(watcher.clone());
            assert!(is_tracking());
            assert_eq!(current().map(|w| w.id()), Some(watcher.id()));
        }

        assert!(!is_tracking());
        assert!(current().is_none());
    }

    #[test]
    fn nested_contexts_restore_the_outer_watcher() {
        let outer = noop_watcher();
        let inner = noop_watcher();

        {
            let _outer_guard = enter(outer.clone());
            assert_eq!(current().map(|w| w.id()), Some(outer.id()));

            {
                let _inner_guard = enter(inner.clone());
                assert_eq!(current().map(|w| w.id()), Some(inner.id()));
            }

            assert_eq!(current().map(|w| w.id()), Some(outer.id()));
        }

        assert!(current().is_none());
    }
}
