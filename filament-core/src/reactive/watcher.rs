//! Watchers
//!
//! A [`Watcher`] is one reactive computation: a getter plus the set of deps
//! it read during its last evaluation. When any of those deps notify, the
//! watcher is invalidated and (depending on its mode) re-runs immediately,
//! marks itself dirty, or hands itself to the batched scheduler.
//!
//! # Dependency reconciliation
//!
//! Each evaluation collects deps into a fresh generation. Afterwards, any
//! dep from the previous generation that was not read this time has the
//! watcher unsubscribed from it, and the new generation becomes current.
//! This keeps the dependency set exactly equal to what the getter actually
//! read, even as the getter's control flow changes between runs.
//!
//! # Modes
//!
//! - `lazy`: value computed on demand (computed values); invalidation only
//!   marks the watcher dirty.
//! - `sync`: re-run immediately on invalidation instead of batching.
//! - `user`: getter and callback errors route through the error chain
//!   instead of propagating.
//! - `deep`: after the getter returns, recursively read the whole result so
//!   nested members register too.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{self, Error};
use crate::scheduler::queue;

use super::context;
use super::dep::Dep;
use super::value::Value;

/// Counter for generating unique watcher IDs.
///
/// Assignment order is creation order; the scheduler's flush order relies
/// on this.
static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_watcher_id() -> u64 {
    WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A watcher getter. Fallible so user-supplied computations can report
/// failure through the error chain.
pub type Getter = Box<dyn Fn() -> Result<Value, Error>>;

/// A watcher callback, invoked with `(new_value, old_value)`.
pub type Callback = Box<dyn FnMut(&Value, &Value) -> Result<(), Error>>;

/// Construction-time mode flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherOptions {
    pub deep: bool,
    pub user: bool,
    pub lazy: bool,
    pub sync: bool,
}

/// One reactive computation with a tracked dependency set.
pub struct Watcher {
    id: u64,
    /// Human-readable label used in diagnostics.
    expr: String,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    dirty: Cell<bool>,
    active: Cell<bool>,
    getter: Getter,
    callback: RefCell<Option<Callback>>,
    /// Optional pre-run hook, invoked by the scheduler before `run`.
    before: RefCell<Option<Box<dyn Fn()>>>,
    value: RefCell<Value>,
    deps: RefCell<Vec<Rc<Dep>>>,
    new_deps: RefCell<Vec<Rc<Dep>>>,
    dep_ids: RefCell<HashSet<u64>>,
    new_dep_ids: RefCell<HashSet<u64>>,
}

impl Watcher {
    /// Create a watcher. Unless `lazy`, the getter runs immediately to
    /// establish the initial value and dependency set.
    ///
    /// A failing initial evaluation is routed through the error chain; the
    /// watcher starts with a `Null` value in that case.
    pub fn new(
        expr: impl Into<String>,
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Rc<Self> {
        let watcher = Rc::new(Self {
            id: next_watcher_id(),
            expr: expr.into(),
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            dirty: Cell::new(options.lazy),
            active: Cell::new(true),
            getter,
            callback: RefCell::new(callback),
            before: RefCell::new(None),
            value: RefCell::new(Value::Null),
            deps: RefCell::new(Vec::new()),
            new_deps: RefCell::new(Vec::new()),
            dep_ids: RefCell::new(HashSet::new()),
            new_dep_ids: RefCell::new(HashSet::new()),
        });
        if !watcher.lazy {
            match watcher.get() {
                Ok(value) => *watcher.value.borrow_mut() = value,
                Err(err) => error::handle_error(
                    &err,
                    &format!("initial evaluation of watcher \"{}\"", watcher.expr),
                ),
            }
        }
        watcher
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Last computed value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Number of deps currently subscribed to.
    pub fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Install the pre-run hook the scheduler invokes before `run`.
    pub fn set_before(&self, hook: impl Fn() + 'static) {
        *self.before.borrow_mut() = Some(Box::new(hook));
    }

    pub(crate) fn run_before(&self) {
        if let Some(hook) = self.before.borrow().as_ref() {
            hook();
        }
    }

    /// Evaluate the getter inside this watcher's context, then reconcile
    /// the dependency generations.
    fn get(self: &Rc<Self>) -> Result<Value, Error> {
        let guard = context::enter(Rc::clone(self));
        let outcome = match (self.getter)() {
            Ok(value) => {
                if self.deep {
                    traverse(&value);
                }
                Ok(value)
            }
            Err(err) if self.user => {
                error::handle_error(&err, &format!("getter for watcher \"{}\"", self.expr));
                Ok(Value::Null)
            }
            Err(err) => Err(err),
        };
        drop(guard);
        self.cleanup_deps();
        outcome
    }

    /// Record a dep read during the current evaluation.
    ///
    /// Reading the same dep many times in one evaluation registers it once;
    /// a dep carried over from the previous generation is not re-subscribed.
    pub(crate) fn add_dep(self: &Rc<Self>, dep: Rc<Dep>) {
        let id = dep.id();
        if !self.new_dep_ids.borrow().contains(&id) {
            self.new_dep_ids.borrow_mut().insert(id);
            let subscribe = !self.dep_ids.borrow().contains(&id);
            if subscribe {
                dep.add_sub(self);
            }
            self.new_deps.borrow_mut().push(dep);
        }
    }

    /// Unsubscribe from deps not read this evaluation, then swap the
    /// generations.
    fn cleanup_deps(&self) {
        {
            let new_ids = self.new_dep_ids.borrow();
            for dep in self.deps.borrow().iter() {
                if !new_ids.contains(&dep.id()) {
                    dep.remove_sub(self.id);
                }
            }
        }
        std::mem::swap(
            &mut *self.deps.borrow_mut(),
            &mut *self.new_deps.borrow_mut(),
        );
        std::mem::swap(
            &mut *self.dep_ids.borrow_mut(),
            &mut *self.new_dep_ids.borrow_mut(),
        );
        self.new_deps.borrow_mut().clear();
        self.new_dep_ids.borrow_mut().clear();
    }

    /// Invalidation signal from a dep.
    pub(crate) fn update(self: &Rc<Self>) {
        if self.lazy {
            self.dirty.set(true);
        } else if self.sync {
            if let Err(err) = self.run() {
                error::handle_error(&err, &format!("sync run of watcher \"{}\"", self.expr));
            }
        } else {
            queue::queue_watcher(Rc::clone(self));
        }
    }

    /// Re-evaluate and, when the result may have changed, invoke the
    /// callback with `(new, old)`.
    ///
    /// Composites are always considered possibly-changed: they mutate in
    /// place, so identity equality proves nothing about their contents.
    pub(crate) fn run(self: &Rc<Self>) -> Result<(), Error> {
        if !self.active.get() {
            return Ok(());
        }
        let value = self.get()?;
        let old = self.value.borrow().clone();
        if !value.same(&old) || value.is_composite() || self.deep {
            *self.value.borrow_mut() = value.clone();
            if let Some(callback) = self.callback.borrow_mut().as_mut() {
                if let Err(err) = callback(&value, &old) {
                    // Callback failures never abort the flush.
                    error::handle_error(
                        &err,
                        &format!("callback for watcher \"{}\"", self.expr),
                    );
                }
            }
        }
        Ok(())
    }

    /// Demand-evaluate a lazy watcher, caching the result.
    pub fn evaluate(self: &Rc<Self>) -> Result<(), Error> {
        let value = self.get()?;
        *self.value.borrow_mut() = value;
        self.dirty.set(false);
        Ok(())
    }

    /// Re-register every dep this watcher holds on the enclosing
    /// evaluation, so a consumer of a computed value also reacts to the
    /// computed value's own upstream state.
    pub fn depend(&self) {
        for dep in self.deps.borrow().iter() {
            dep.depend();
        }
    }

    /// Invoke the callback once with the current value, for
    /// `immediate: true` watch registration.
    pub(crate) fn invoke_immediate(&self) {
        let value = self.value();
        if let Some(callback) = self.callback.borrow_mut().as_mut() {
            if let Err(err) = callback(&value, &Value::Null) {
                error::handle_error(
                    &err,
                    &format!("immediate callback for watcher \"{}\"", self.expr),
                );
            }
        }
    }

    /// Unsubscribe from every dep and go inactive. Idempotent.
    pub fn teardown(&self) {
        if !self.active.get() {
            return;
        }
        for dep in self.deps.borrow().iter() {
            dep.remove_sub(self.id);
        }
        self.deps.borrow_mut().clear();
        self.dep_ids.borrow_mut().clear();
        self.active.set(false);
    }
}

/// Recursively read every nested member of a value so all nested deps
/// register on the evaluating watcher. Observed containers are visited at
/// most once (cycle guard keyed by their container dep id).
pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Record(record) => {
            if let Some(ob) = record.observer() {
                if !seen.insert(ob.dep().id()) {
                    return;
                }
            }
            for key in record.keys() {
                let nested = record.get(&key);
                traverse_inner(&nested, seen);
            }
        }
        Value::List(list) => {
            if let Some(ob) = list.observer() {
                if !seen.insert(ob.dep().id()) {
                    return;
                }
            }
            for index in 0..list.len() {
                let nested = list.get(index);
                traverse_inner(&nested, seen);
            }
        }
        _ => {}
    }
}

// ----------------------------------------------------------------------------
// Watch registration
// ----------------------------------------------------------------------------

/// Options for [`watch`] and [`watch_path`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Recursively read the whole result on every evaluation, so nested
    /// mutation triggers the callback.
    pub deep: bool,
    /// Invoke the callback once, synchronously, with the initial value.
    pub immediate: bool,
    /// Run on invalidation immediately instead of batching.
    pub sync: bool,
}

/// Handle returned by watch registration.
///
/// Tears the watcher down when dropped; [`WatchHandle::unwatch`] does the
/// same explicitly and is safe to call more than once.
pub struct WatchHandle {
    watcher: Rc<Watcher>,
}

impl WatchHandle {
    pub fn unwatch(&self) {
        self.watcher.teardown();
    }

    pub fn watcher_id(&self) -> u64 {
        self.watcher.id()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.watcher.teardown();
    }
}

/// Watch an arbitrary getter. The callback receives `(new, old)` after each
/// relevant change, batched per tick unless `sync` is set.
pub fn watch<G, C>(getter: G, callback: C, options: WatchOptions) -> WatchHandle
where
    G: Fn() -> Value + 'static,
    C: FnMut(&Value, &Value) + 'static,
{
    watch_labelled("<function>", Box::new(move || Ok(getter())), callback, options)
}

/// Watch a dotted path expression rooted at `root`, e.g. `"user.name"`.
pub fn watch_path<C>(
    root: &Value,
    path: &str,
    callback: C,
    options: WatchOptions,
) -> Result<WatchHandle, Error>
where
    C: FnMut(&Value, &Value) + 'static,
{
    let segments = parse_path(path)?;
    let root = root.clone();
    let getter: Getter = Box::new(move || Ok(resolve_path(&root, &segments)));
    Ok(watch_labelled(path, getter, callback, options))
}

fn watch_labelled<C>(expr: &str, getter: Getter, mut callback: C, options: WatchOptions) -> WatchHandle
where
    C: FnMut(&Value, &Value) + 'static,
{
    let callback: Callback = Box::new(move |new, old| {
        callback(new, old);
        Ok(())
    });
    let watcher = Watcher::new(
        expr,
        getter,
        Some(callback),
        WatcherOptions {
            deep: options.deep,
            sync: options.sync,
            user: true,
            lazy: false,
        },
    );
    if options.immediate {
        watcher.invoke_immediate();
    }
    WatchHandle { watcher }
}

/// Parse a dotted path expression. Segments may contain alphanumerics,
/// `_` and `$`; anything else is rejected.
pub fn parse_path(path: &str) -> Result<Vec<String>, Error> {
    let segments: Vec<&str> = path.split('.').collect();
    let valid = !path.is_empty()
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        });
    if !valid {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments.into_iter().map(String::from).collect())
}

fn resolve_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        let next = match &current {
            Value::Record(record) => record.get(segment),
            _ => return Value::Null,
        };
        current = next;
    }
    current
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
