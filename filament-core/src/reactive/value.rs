//! Reactive Value Model
//!
//! The engine tracks dynamic state trees built from [`Value`]: primitives
//! plus two composite containers, [`Record`] (an insertion-ordered,
//! string-keyed map) and [`List`] (a sequence). Composites are shared
//! handles (`Rc`), so several parts of a tree may alias the same container
//! and identity comparison is pointer equality.
//!
//! # Interception
//!
//! Reads and writes go through explicit accessor methods: [`Record::get`]
//! registers the reading watcher on the field's dependency, [`Record::set`]
//! notifies it on an identity-changing write, and the structural [`List`]
//! mutators notify the list's container dependency. Interception is only
//! armed once a container has been observed (see the `observer` module);
//! before that, the accessors are plain data access.
//!
//! # Identity vs. equality
//!
//! Change detection uses [`Value::same`]: value equality for primitives
//! (with NaN equal to itself) and pointer identity for composites. The
//! `PartialEq` impl is a deep structural comparison, intended for
//! assertions and snapshots, never for change detection.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::context;
use super::dep::Dep;
use super::observer::{self, Observer};

/// A dynamic reactive value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Record(Record),
    List(List),
}

impl Value {
    /// Whether this value is a composite (record or list).
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Record(_) | Value::List(_))
    }

    /// Identity comparison used by the write-path change check.
    ///
    /// Primitives compare by value, with NaN treated as equal to itself so
    /// a NaN-to-NaN write does not notify. Composites compare by pointer:
    /// a container mutated in place is still the *same* value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Build a plain (unobserved) value tree from JSON.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(Rc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::List(List::from_values(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let record = Record::new();
                for (key, value) in map {
                    record.define(key, Value::from_json(value));
                }
                Value::Record(record)
            }
        }
    }

    /// Snapshot this value tree as JSON. Reads are untracked.
    ///
    /// Non-finite floats serialize as `null`, matching `serde_json`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Value {
    /// Deep structural equality, for assertions and snapshots.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Record(a), Value::Record(b)) => {
                if Rc::ptr_eq(&a.inner, &b.inner) {
                    return true;
                }
                let keys = a.keys();
                keys == b.keys() && keys.iter().all(|k| a.peek(k) == b.peek(k))
            }
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(&a.inner, &b.inner) || a.to_vec() == b.to_vec()
            }
            _ => self.same(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Record(r) => {
                let fields = r.inner.fields.borrow();
                let mut map = f.debug_map();
                for (key, field) in fields.iter() {
                    map.entry(key, &field.value);
                }
                map.finish()
            }
            Value::List(l) => {
                let items = l.inner.items.borrow();
                f.debug_list().entries(items.iter()).finish()
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Record(r) => {
                let fields = r.inner.fields.borrow();
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, field) in fields.iter() {
                    map.serialize_entry(key, &field.value)?;
                }
                map.end()
            }
            Value::List(l) => {
                let items = l.inner.items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Value::List(v)
    }
}

// ----------------------------------------------------------------------------
// Record
// ----------------------------------------------------------------------------

/// One field slot of a record.
pub(crate) struct Field {
    pub(crate) value: Value,
    /// Fixed fields are never intercepted; their values stay unobservable.
    pub(crate) fixed: bool,
    /// Present once the owning record has been observed.
    pub(crate) dep: Option<Rc<Dep>>,
    /// The observer of the field's composite value, when there is one.
    pub(crate) child_ob: Option<Rc<Observer>>,
}

impl Field {
    pub(crate) fn plain(value: Value) -> Self {
        Self {
            value,
            fixed: false,
            dep: None,
            child_ob: None,
        }
    }
}

pub(crate) struct RecordInner {
    pub(crate) fields: RefCell<IndexMap<String, Field>>,
    /// The wrapping marker. `Some` once observed; re-observing is a no-op.
    pub(crate) ob: RefCell<Option<Rc<Observer>>>,
    /// Sealed containers refuse observation entirely.
    pub(crate) sealed: Cell<bool>,
}

/// A shared, insertion-ordered, string-keyed composite.
#[derive(Clone)]
pub struct Record {
    pub(crate) inner: Rc<RecordInner>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RecordInner {
                fields: RefCell::new(IndexMap::new()),
                ob: RefCell::new(None),
                sealed: Cell::new(false),
            }),
        }
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let record = Record::new();
        for (key, value) in pairs {
            record.define(key, value);
        }
        record
    }

    /// Define a field without notification.
    ///
    /// On an already-observed record the new field is *not* intercepted;
    /// reactive addition goes through `set_reactive`.
    pub fn define(&self, key: impl Into<String>, value: Value) {
        self.inner
            .fields
            .borrow_mut()
            .insert(key.into(), Field::plain(value));
    }

    /// Define a field that observation will skip: its value is never made
    /// observable and writes to it never notify.
    pub fn define_fixed(&self, key: impl Into<String>, value: Value) {
        let mut field = Field::plain(value);
        field.fixed = true;
        self.inner.fields.borrow_mut().insert(key.into(), field);
    }

    /// Read a field, registering the evaluating watcher on its dep.
    ///
    /// Returns `Null` for a missing field. For an intercepted field this
    /// also registers the child observer's dep (so replacing the nested
    /// composite wholesale is observable) and, for list values, the dep of
    /// every already-observed element (element access inside a list is not
    /// intercepted per index).
    pub fn get(&self, key: &str) -> Value {
        let (value, dep, child_ob) = {
            let fields = self.inner.fields.borrow();
            match fields.get(key) {
                Some(field) => (field.value.clone(), field.dep.clone(), field.child_ob.clone()),
                None => return Value::Null,
            }
        };
        if context::is_tracking() {
            if let Some(dep) = &dep {
                dep.depend();
                if let Some(child) = &child_ob {
                    child.dep().depend();
                }
                if let Value::List(list) = &value {
                    list.depend_elements();
                }
            }
        }
        value
    }

    /// Read a field without registering any dependency.
    pub fn peek(&self, key: &str) -> Value {
        self.inner
            .fields
            .borrow()
            .get(key)
            .map(|field| field.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Write a field.
    ///
    /// Identity-unchanged writes are a no-op. Writes to an intercepted
    /// field re-observe the new value and notify the field's dep. Writes to
    /// a missing key insert a plain, unintercepted field (reactive addition
    /// goes through `set_reactive`).
    pub fn set(&self, key: &str, value: Value) {
        enum WritePath {
            Insert,
            Unchanged,
            Plain,
            Reactive { shallow: bool },
        }

        let path = {
            let fields = self.inner.fields.borrow();
            match fields.get(key) {
                None => WritePath::Insert,
                Some(field) if field.value.same(&value) => WritePath::Unchanged,
                Some(field) if field.dep.is_none() => WritePath::Plain,
                Some(_) => WritePath::Reactive {
                    shallow: self.observer().map(|ob| ob.is_shallow()).unwrap_or(false),
                },
            }
        };

        match path {
            WritePath::Unchanged => {}
            WritePath::Insert => {
                self.define(key, value);
            }
            WritePath::Plain => {
                if let Some(field) = self.inner.fields.borrow_mut().get_mut(key) {
                    field.value = value;
                }
            }
            WritePath::Reactive { shallow } => {
                // Observe the new value before touching the fields map so the
                // walk never sees a half-written slot.
                let child_ob = if shallow { None } else { observer::observe(&value) };
                let dep = {
                    let mut fields = self.inner.fields.borrow_mut();
                    match fields.get_mut(key) {
                        Some(field) => {
                            field.value = value;
                            field.child_ob = child_ob;
                            field.dep.clone()
                        }
                        None => None,
                    }
                };
                if let Some(dep) = dep {
                    dep.notify();
                }
            }
        }
    }

    /// Remove a field without notification. Used by `delete_reactive`.
    pub(crate) fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .fields
            .borrow_mut()
            .shift_remove(key)
            .map(|field| field.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    /// Mark the record not-extensible: observation refuses sealed containers.
    pub fn seal(&self) {
        self.inner.sealed.set(true);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.get()
    }

    /// The attached observer, if this record has been observed.
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.ob.borrow().clone()
    }

    /// The dep of one field, if intercepted. Test and diagnostics hook.
    pub fn field_dep(&self, key: &str) -> Option<Rc<Dep>> {
        self.inner
            .fields
            .borrow()
            .get(key)
            .and_then(|field| field.dep.clone())
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// List
// ----------------------------------------------------------------------------

pub(crate) struct ListInner {
    pub(crate) items: RefCell<Vec<Value>>,
    pub(crate) ob: RefCell<Option<Rc<Observer>>>,
    pub(crate) sealed: Cell<bool>,
}

/// A shared sequence composite.
///
/// Element access is not intercepted per index; the seven structural
/// mutators notify the list's container dep instead, and newly inserted
/// composites are observed on the way in.
#[derive(Clone)]
pub struct List {
    pub(crate) inner: Rc<ListInner>,
}

impl List {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                items: RefCell::new(items),
                ob: RefCell::new(None),
                sealed: Cell::new(false),
            }),
        }
    }

    /// Read one element. Out-of-bounds reads return `Null`.
    ///
    /// Registers nothing: lists are depended on through the record field
    /// holding them (see [`Record::get`]) and through deep traversal.
    pub fn get(&self, index: usize) -> Value {
        self.inner
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Append at the end.
    pub fn push(&self, value: Value) {
        self.inner.items.borrow_mut().push(value.clone());
        self.after_mutation(&[value]);
    }

    /// Remove from the end.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.inner.items.borrow_mut().pop();
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Remove from the start.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Insert at the start.
    pub fn unshift(&self, value: Value) {
        self.inner.items.borrow_mut().insert(0, value.clone());
        self.after_mutation(&[value]);
    }

    /// Remove `delete_count` elements at `start`, inserting `new_items` in
    /// their place. Out-of-range arguments are clamped. Returns the removed
    /// elements.
    pub fn splice(&self, start: usize, delete_count: usize, new_items: Vec<Value>) -> Vec<Value> {
        let removed: Vec<Value> = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let start = start.min(len);
            let delete_count = delete_count.min(len - start);
            items
                .splice(start..start + delete_count, new_items.iter().cloned())
                .collect()
        };
        self.after_mutation(&new_items);
        removed
    }

    /// Sort in place with the given comparator.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> CmpOrdering,
    {
        // Move the elements out while the comparator runs, so a comparator
        // reading this list does not hit a live mutable borrow.
        let mut items = self.inner.items.take();
        items.sort_by(compare);
        *self.inner.items.borrow_mut() = items;
        self.after_mutation(&[]);
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        self.inner.items.borrow_mut().reverse();
        self.after_mutation(&[]);
    }

    /// Reactive indexed store: splice-replace-one plus notify. Indices past
    /// the end extend the list with `Null` padding first.
    pub fn set(&self, index: usize, value: Value) {
        {
            let mut items = self.inner.items.borrow_mut();
            while items.len() < index {
                items.push(Value::Null);
            }
        }
        self.splice(index, 1, vec![value]);
    }

    /// Plain indexed store: no observation, no notification.
    ///
    /// This is the unobservable write path; mutations that should be seen
    /// by watchers go through [`List::set`] or `set_reactive`.
    pub fn set_untracked(&self, index: usize, value: Value) {
        let mut items = self.inner.items.borrow_mut();
        if index < items.len() {
            items[index] = value;
        } else {
            while items.len() < index {
                items.push(Value::Null);
            }
            items.push(value);
        }
    }

    pub fn seal(&self) {
        self.inner.sealed.set(true);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.get()
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.ob.borrow().clone()
    }

    /// Register the evaluating watcher on every already-observed element
    /// (recursively), because element reads cannot be intercepted per index.
    pub(crate) fn depend_elements(&self) {
        let items = self.to_vec();
        for item in &items {
            match item {
                Value::Record(record) => {
                    if let Some(ob) = record.observer() {
                        ob.dep().depend();
                    }
                }
                Value::List(list) => {
                    if let Some(ob) = list.observer() {
                        ob.dep().depend();
                    }
                    list.depend_elements();
                }
                _ => {}
            }
        }
    }

    /// Common tail of every structural mutator: observe inserted composites,
    /// then notify the container dep. No-op before observation.
    fn after_mutation(&self, inserted: &[Value]) {
        if let Some(ob) = self.observer() {
            if !ob.is_shallow() {
                for value in inserted {
                    observer::observe(value);
                }
            }
            ob.dep().notify();
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_is_identity_for_composites() {
        let a = Record::new();
        let va = Value::Record(a.clone());
        let vb = Value::Record(a.clone());
        assert!(va.same(&vb));

        let other = Value::Record(Record::new());
        assert!(!va.same(&other));
        // Structural equality still holds for two empty records.
        assert_eq!(va, other);
    }

    #[test]
    fn nan_is_same_as_nan() {
        assert!(Value::Float(f64::NAN).same(&Value::Float(f64::NAN)));
        assert!(!Value::Float(f64::NAN).same(&Value::Float(0.0)));
        assert!(Value::Float(1.5).same(&Value::Float(1.5)));
    }

    #[test]
    fn record_get_and_set_without_observation() {
        let record = Record::from_pairs([("x", Value::Int(1))]);
        assert_eq!(record.get("x"), Value::Int(1));
        assert_eq!(record.get("missing"), Value::Null);

        record.set("x", Value::Int(2));
        assert_eq!(record.get("x"), Value::Int(2));

        // Writing a missing key inserts a plain field.
        record.set("y", Value::Int(3));
        assert_eq!(record.get("y"), Value::Int(3));
        assert!(record.field_dep("y").is_none());
    }

    #[test]
    fn list_splice_clamps_ranges() {
        let list = List::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        let removed = list.splice(1, 10, vec![Value::Int(9)]);
        assert_eq!(removed, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(list.to_vec(), vec![Value::Int(1), Value::Int(9)]);

        let removed = list.splice(10, 1, vec![Value::Int(7)]);
        assert!(removed.is_empty());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn list_set_pads_with_null() {
        let list = List::new();
        list.set(2, Value::Int(5));
        assert_eq!(
            list.to_vec(),
            vec![Value::Null, Value::Null, Value::Int(5)]
        );
    }

    #[test]
    fn list_shift_and_unshift() {
        let list = List::from_values(vec![Value::Int(2)]);
        list.unshift(Value::Int(1));
        assert_eq!(list.to_vec(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(list.shift(), Some(Value::Int(1)));
        assert_eq!(list.shift(), Some(Value::Int(2)));
        assert_eq!(list.shift(), None);
    }

    #[test]
    fn json_round_trip() {
        let json = serde_json::json!({
            "name": "counter",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": { "on": true }
        });
        let value = Value::from_json(&json);

        let record = value.as_record().expect("object becomes record");
        assert_eq!(record.get("count"), Value::Int(3));
        assert_eq!(record.get("tags").as_list().map(|l| l.len()), Some(2));

        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn sort_by_reorders() {
        let list = List::from_values(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        list.sort_by(|a, b| a.as_int().cmp(&b.as_int()));
        assert_eq!(
            list.to_vec(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        list.reverse();
        assert_eq!(
            list.to_vec(),
            vec![Value::Int(3), Value::Int(2), Value::Int(1)]
        );
    }
}
