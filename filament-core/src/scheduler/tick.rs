//! Microtask Batcher
//!
//! `next_tick` defers work until the current batch of reactive updates has
//! flushed. Callbacks queued within one tick are coalesced behind a single
//! scheduled flush and run in FIFO order.
//!
//! # Host scheduling primitive
//!
//! Inside an async host the flush is deferred onto the current-thread task
//! queue via `tokio::task::spawn_local`, which runs it as soon as the task
//! loop yields; the engine must be driven inside a `tokio::task::LocalSet`
//! in that case. Without a runtime on the thread there is nothing to defer
//! to, and the batch degrades to an inline flush: still coalesced, but
//! synchronous with the call that scheduled it.
//!
//! # Error isolation
//!
//! A panicking callback must not take the rest of the batch down with it:
//! every callback runs under `catch_unwind`, and panics are routed through
//! the error chain.

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{self, Error};

thread_local! {
    static CALLBACKS: RefCell<Vec<Box<dyn FnOnce()>>> = RefCell::new(Vec::new());
    static PENDING: Cell<bool> = const { Cell::new(false) };
}

/// Schedule `callback` to run after the current batch of reactive updates
/// has flushed. Repeated calls within one tick share a single flush.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().push(Box::new(callback)));
    let need_schedule = PENDING.with(|pending| {
        if pending.get() {
            false
        } else {
            pending.set(true);
            true
        }
    });
    if need_schedule {
        schedule_flush();
    }
}

/// An awaitable that resolves once the currently pending batch has flushed.
pub fn next_tick_async() -> impl std::future::Future<Output = ()> {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    next_tick(move || {
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

fn schedule_flush() {
    match tokio::runtime::Handle::try_current() {
        Ok(_) => {
            // Deferred: runs once the current task yields back to the
            // local task loop.
            tokio::task::spawn_local(async {
                flush_callbacks();
            });
        }
        // No async host is driving this thread; flush inline.
        Err(_) => flush_callbacks(),
    }
}

/// Run every queued callback in order.
///
/// The pending flag clears *before* the callbacks run, so a callback that
/// calls `next_tick` schedules the *next* flush instead of recursing into
/// this one.
pub(crate) fn flush_callbacks() {
    PENDING.with(|pending| pending.set(false));
    let callbacks: Vec<Box<dyn FnOnce()>> =
        CALLBACKS.with(|callbacks| callbacks.borrow_mut().drain(..).collect());
    for callback in callbacks {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
            let message = panic_message(panic);
            error::handle_error(&Error::TickCallback(message), "next_tick flush");
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
