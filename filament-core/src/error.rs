//! Error Handling
//!
//! Errors raised inside reactive computations must not tear down the whole
//! update machinery: one failing watcher callback cannot be allowed to stop
//! the rest of a flush. This module defines the error taxonomy and the
//! error-handling chain that user-level failures are routed through.
//!
//! # Routing Rules
//!
//! - Getter failures of a `user` watcher are routed here; getter failures of
//!   internal (render-style) watchers propagate to the caller, since they
//!   indicate a programming defect upstream.
//! - Callback failures are always routed here, never propagated.
//! - Panics inside `next_tick` callbacks are caught and routed here.
//!
//! The host installs a handler via [`set_error_handler`]; without one, errors
//! are logged through `tracing`.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A watcher getter failed during evaluation.
    #[error("getter for watcher \"{expr}\" failed: {message}")]
    Getter { expr: String, message: String },

    /// A watcher callback failed.
    #[error("callback for watcher \"{expr}\" failed: {message}")]
    Callback { expr: String, message: String },

    /// A watch path expression could not be parsed.
    #[error("invalid watch path \"{0}\"")]
    InvalidPath(String),

    /// A callback scheduled via `next_tick` panicked.
    #[error("next_tick callback panicked: {0}")]
    TickCallback(String),
}

/// Handler signature for the error chain: `(error, context info)`.
pub type ErrorHandler = Rc<dyn Fn(&Error, &str)>;

thread_local! {
    static HANDLER: RefCell<Option<ErrorHandler>> = RefCell::new(None);
}

/// Install a handler that receives every routed error.
///
/// Replaces any previously installed handler.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&Error, &str) + 'static,
{
    HANDLER.with(|h| *h.borrow_mut() = Some(Rc::new(handler)));
}

/// Remove the installed handler, falling back to `tracing` logging.
pub fn clear_error_handler() {
    HANDLER.with(|h| *h.borrow_mut() = None);
}

/// Route an error through the handler chain.
///
/// `info` describes where the error came from, e.g. `"watcher callback"`.
pub(crate) fn handle_error(err: &Error, info: &str) {
    // Clone the handler out so it may itself call `set_error_handler`
    // without re-entering the borrow.
    let handler = HANDLER.with(|h| h.borrow().clone());
    match handler {
        Some(handler) => handler(err, info),
        None => tracing::error!(info, error = %err, "unhandled reactive error"),
    }
}
