//! Scheduler Queue
//!
//! The scheduler turns a burst of synchronous invalidations into exactly
//! one ordered flush per tick.
//!
//! # Algorithm
//!
//! 1. Invalidated watchers are queued, deduplicated by id.
//! 2. The first queued watcher of a tick schedules a flush through the
//!    microtask batcher.
//! 3. The flush sorts the queue ascending by id. Ids are assigned at
//!    construction, so this runs earlier-created watchers first (parents
//!    before children, user watchers before the render job registered
//!    after them).
//! 4. The flush iterates by index rather than over a snapshot: a watcher
//!    invalidated *during* the flush is inserted id-sorted into the
//!    unprocessed tail and still runs within this flush.
//! 5. A watcher re-queued more than [`MAX_UPDATE_COUNT`] times in one
//!    flush is a circular-update bug: it is reported and excluded from the
//!    rest of the flush so the flush terminates.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use crate::error;
use crate::reactive::watcher::Watcher;

use super::tick;

/// Re-queue bound per watcher id within a single flush.
pub const MAX_UPDATE_COUNT: u32 = 100;

#[derive(Default)]
struct Scheduler {
    queue: Vec<Rc<Watcher>>,
    /// Presence set keyed by watcher id.
    has: HashSet<u64>,
    /// Per-id re-queue counters for circular-update detection.
    circular: HashMap<u64, u32>,
    waiting: bool,
    flushing: bool,
    /// Position of the watcher currently being processed.
    index: usize,
    flushed_at: Option<Instant>,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queue a watcher for the next flush. Duplicates (by id) are ignored.
///
/// When called during a flush, the watcher is inserted into the
/// unprocessed tail at its id-sorted position, so it runs within the
/// current flush in correct order instead of waiting a tick.
pub(crate) fn queue_watcher(watcher: Rc<Watcher>) {
    let schedule = SCHEDULER.with(|scheduler| {
        let mut s = scheduler.borrow_mut();
        let id = watcher.id();
        if s.has.contains(&id) {
            return false;
        }
        s.has.insert(id);
        if !s.flushing {
            s.queue.push(watcher);
        } else {
            let mut i = s.queue.len();
            while i > s.index + 1 && s.queue[i - 1].id() > id {
                i -= 1;
            }
            s.queue.insert(i, watcher);
        }
        if !s.waiting {
            s.waiting = true;
            return true;
        }
        false
    });
    if schedule {
        tick::next_tick(flush_queue);
    }
}

/// Run every pending watcher, in id order, exactly once per queue entry.
///
/// Not part of the public surface; the microtask batcher invokes this.
pub(crate) fn flush_queue() {
    SCHEDULER.with(|scheduler| {
        let mut s = scheduler.borrow_mut();
        s.flushing = true;
        s.flushed_at = Some(Instant::now());
        s.queue.sort_by_key(|watcher| watcher.id());
    });

    loop {
        // Pull the next watcher without holding the scheduler borrow while
        // it runs; its run may queue further watchers.
        let next = SCHEDULER.with(|scheduler| {
            let mut s = scheduler.borrow_mut();
            if s.index >= s.queue.len() {
                return None;
            }
            let watcher = Rc::clone(&s.queue[s.index]);
            s.has.remove(&watcher.id());
            Some(watcher)
        });
        let Some(watcher) = next else { break };

        watcher.run_before();
        if let Err(err) = watcher.run() {
            // A non-user getter failure is a programming defect upstream;
            // report it and keep the rest of the batch running.
            error::handle_error(&err, "scheduler flush");
        }

        SCHEDULER.with(|scheduler| {
            let mut s = scheduler.borrow_mut();
            let id = watcher.id();
            if s.has.contains(&id) {
                let count = s.circular.entry(id).or_insert(0);
                *count += 1;
                if *count > MAX_UPDATE_COUNT {
                    tracing::warn!(
                        watcher = id,
                        expr = watcher.expr(),
                        "possible circular update; watcher excluded from this flush"
                    );
                    s.has.remove(&id);
                    let index = s.index;
                    if let Some(pos) = s
                        .queue
                        .iter()
                        .skip(index + 1)
                        .position(|queued| queued.id() == id)
                    {
                        s.queue.remove(index + 1 + pos);
                    }
                }
            }
            s.index += 1;
        });
    }

    SCHEDULER.with(|scheduler| {
        let mut s = scheduler.borrow_mut();
        s.queue.clear();
        s.has.clear();
        s.circular.clear();
        s.waiting = false;
        s.flushing = false;
        s.index = 0;
    });
}

/// When the most recent flush started, if any flush has run on this thread.
pub fn last_flush_at() -> Option<Instant> {
    SCHEDULER.with(|scheduler| scheduler.borrow().flushed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::observe;
    use crate::reactive::value::{Record, Value};
    use crate::reactive::watcher::{watch, WatchOptions};
    use crate::scheduler::tick::next_tick_async;
    use std::cell::{Cell, RefCell};

    fn observed(pairs: Vec<(&str, Value)>) -> Record {
        let record = Record::from_pairs(pairs);
        observe(&Value::Record(record.clone())).unwrap();
        record
    }

    #[tokio::test(flavor = "current_thread")]
    async fn batches_a_burst_into_one_run() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let state = observed(vec![("x", Value::Int(1)), ("y", Value::Int(1))]);
                let seen = Rc::new(RefCell::new(Vec::new()));
                let seen_clone = seen.clone();

                let state_clone = state.clone();
                let _handle = watch(
                    move || {
                        let sum = state_clone.get("x").as_int().unwrap()
                            + state_clone.get("y").as_int().unwrap();
                        Value::Int(sum)
                    },
                    move |new, old| {
                        seen_clone
                            .borrow_mut()
                            .push((new.as_int().unwrap(), old.as_int().unwrap()));
                    },
                    WatchOptions::default(),
                );

                state.set("x", Value::Int(2));
                state.set("y", Value::Int(2));
                next_tick_async().await;

                assert_eq!(&*seen.borrow(), &[(4, 2)]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn flush_runs_watchers_in_creation_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let state = observed(vec![("a", Value::Int(0)), ("b", Value::Int(0))]);
                let order = Rc::new(RefCell::new(Vec::new()));

                let order_first = order.clone();
                let state_clone = state.clone();
                let _first = watch(
                    move || state_clone.get("b"),
                    move |_new, _old| order_first.borrow_mut().push("first"),
                    WatchOptions::default(),
                );

                let order_second = order.clone();
                let state_clone = state.clone();
                let _second = watch(
                    move || state_clone.get("a"),
                    move |_new, _old| order_second.borrow_mut().push("second"),
                    WatchOptions::default(),
                );

                // Invalidate the later-created watcher first.
                state.set("a", Value::Int(1));
                state.set("b", Value::Int(1));
                next_tick_async().await;

                assert_eq!(&*order.borrow(), &["first", "second"]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn circular_updates_are_bounded() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let state = observed(vec![("n", Value::Int(0))]);
                let runs = Rc::new(Cell::new(0u32));

                let runs_clone = runs.clone();
                let state_reader = state.clone();
                let state_writer = state.clone();
                let _handle = watch(
                    move || state_reader.get("n"),
                    move |new, _old| {
                        runs_clone.set(runs_clone.get() + 1);
                        // Re-trigger ourselves on every run.
                        state_writer.set("n", Value::Int(new.as_int().unwrap() + 1));
                    },
                    WatchOptions::default(),
                );

                state.set("n", Value::Int(1));
                next_tick_async().await;

                // The flush terminated, bounded by the circular-update
                // counter rather than hanging.
                let total = runs.get();
                assert!(total > MAX_UPDATE_COUNT, "ran {total} times");
                assert!(total <= MAX_UPDATE_COUNT + 2, "ran {total} times");
                assert!(last_flush_at().is_some());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn watcher_queued_mid_flush_runs_in_the_same_flush() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let state = observed(vec![("a", Value::Int(0)), ("b", Value::Int(0))]);
                let order = Rc::new(RefCell::new(Vec::new()));

                // First watcher writes `b` from its callback, invalidating
                // the second watcher while the flush is already running.
                let order_first = order.clone();
                let state_reader = state.clone();
                let state_writer = state.clone();
                let _first = watch(
                    move || state_reader.get("a"),
                    move |new, _old| {
                        order_first.borrow_mut().push("first");
                        state_writer.set("b", new.clone());
                    },
                    WatchOptions::default(),
                );

                let order_second = order.clone();
                let state_clone = state.clone();
                let _second = watch(
                    move || state_clone.get("b"),
                    move |_new, _old| order_second.borrow_mut().push("second"),
                    WatchOptions::default(),
                );

                state.set("a", Value::Int(1));
                next_tick_async().await;

                // One tick, both ran, in id order.
                assert_eq!(&*order.borrow(), &["first", "second"]);
            })
            .await;
    }
}
