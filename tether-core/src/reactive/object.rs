//! Tracked Objects
//!
//! An [`ObjectRef`] is a shared handle to a plain key/value object. The same
//! object can be held through two kinds of handle:
//!
//! - an **untracked** handle, which reads and writes the object directly, and
//! - a **tracked** handle (see [`ObjectRef::wrap`]), whose reads are recorded
//!   into every active dependency map and whose writes keep those maps in
//!   step.
//!
//! Both kinds share the object's identity: wrapping is a flag on the handle,
//! not a copy, so dependency maps keyed by [`ObjectId`] stay stable no matter
//! how many times an object is wrapped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{Result, StoreError};
use super::context::TrackingContext;
use super::value::Value;

const LENGTH: &str = "length";

/// Stable identity handle.
///
/// Used for tracked objects and, as an opaque target handle, for store
/// definitions and store instances in the metadata registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate a new unique handle.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Plain,
    Array,
}

struct ObjectCell {
    id: ObjectId,
    kind: ObjectKind,
    props: RwLock<IndexMap<Arc<str>, Value>>,
    /// Per-property write counters. Only taken while `props` is held.
    versions: Mutex<IndexMap<Arc<str>, u64>>,
}

impl ObjectCell {
    fn version_of(&self, key: &str) -> u64 {
        self.versions.lock().get(key).copied().unwrap_or(0)
    }

    fn bump(&self, key: &str) -> u64 {
        let mut versions = self.versions.lock();
        match versions.get_mut(key) {
            Some(version) => {
                *version += 1;
                *version
            }
            None => {
                versions.insert(Arc::from(key), 1);
                1
            }
        }
    }
}

/// Shared handle to a tracked object.
#[derive(Clone)]
pub struct ObjectRef {
    cell: Arc<ObjectCell>,
    tracked: bool,
}

impl ObjectRef {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::with_kind(ObjectKind::Plain, IndexMap::new())
    }

    /// Create an object from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let props = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Into::<Value>::into(v).unwrap_tracked()))
            .collect();
        Self::with_kind(ObjectKind::Plain, props)
    }

    /// Create an array: index keys plus a `length` key.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut props: IndexMap<Arc<str>, Value> = items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Arc::from(i.to_string()), v.unwrap_tracked()))
            .collect();
        let len = props.len();
        props.insert(Arc::from(LENGTH), Value::from(len));
        Self::with_kind(ObjectKind::Array, props)
    }

    /// Create an object from a JSON object or array.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Self::from_pairs(
                map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))),
            ),
            serde_json::Value::Array(items) => Self::array(items.iter().map(Value::from_json)),
            other => Self::from_pairs([("value", Value::from_json(other))]),
        }
    }

    fn with_kind(kind: ObjectKind, props: IndexMap<Arc<str>, Value>) -> Self {
        Self {
            cell: Arc::new(ObjectCell {
                id: ObjectId::new(),
                kind,
                props: RwLock::new(props),
                versions: Mutex::new(IndexMap::new()),
            }),
            tracked: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.cell.id
    }

    pub fn is_array(&self) -> bool {
        self.cell.kind == ObjectKind::Array
    }

    /// Whether reads through this handle are recorded.
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Tracked handle to the same object. Idempotent.
    pub fn wrap(&self) -> ObjectRef {
        Self {
            cell: Arc::clone(&self.cell),
            tracked: true,
        }
    }

    /// Untracked handle to the same object. Idempotent.
    pub fn unwrap(&self) -> ObjectRef {
        Self {
            cell: Arc::clone(&self.cell),
            tracked: false,
        }
    }

    /// Identity comparison; ignores whether either handle is tracked.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Read a property.
    ///
    /// Through a tracked handle, the read is recorded into every active
    /// dependency map and nested objects come back tracked as well.
    pub fn get(&self, key: &str) -> Value {
        let (value, version) = self.get_versioned(key);
        if !self.tracked {
            return value;
        }
        TrackingContext::record_read(&self.unwrap(), key, &value, version);
        value.wrap()
    }

    /// Read a property and its write version without recording the read.
    ///
    /// The version grows by one on every write that changes the value, so
    /// two equal values with different versions mean the property was
    /// written in between.
    pub fn get_versioned(&self, key: &str) -> (Value, u64) {
        let props = self.cell.props.read();
        let value = props.get(key).cloned().unwrap_or_default();
        (value, self.cell.version_of(key))
    }

    /// Write version of a property; zero if it was never changed.
    pub fn version(&self, key: &str) -> u64 {
        let _props = self.cell.props.read();
        self.cell.version_of(key)
    }

    /// Read a property without recording it.
    pub fn get_untracked(&self, key: &str) -> Value {
        self.cell
            .props
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cell.props.read().contains_key(key)
    }

    /// Write a property.
    ///
    /// Objects are always stored untracked. Through a tracked handle, a
    /// change is reported to the active tracking contexts.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = Into::<Value>::into(value).unwrap_tracked();
        let (previous, version) = {
            let mut props = self.cell.props.write();
            let previous = match props.get_mut(key) {
                Some(slot) => std::mem::replace(slot, value.clone()),
                None => {
                    props.insert(Arc::from(key), value.clone());
                    Value::Undefined
                }
            };
            if Value::same(&previous, &value) {
                return;
            }
            (previous, self.cell.bump(key))
        };
        if self.tracked {
            TrackingContext::record_write(&self.unwrap(), key, &previous, &value, version);
        }
    }

    /// Delete a property, returning the removed value.
    pub fn remove(&self, key: &str) -> Value {
        let (previous, version) = {
            let mut props = self.cell.props.write();
            let previous = props.shift_remove(key).unwrap_or_default();
            if previous.is_undefined() {
                return previous;
            }
            (previous, self.cell.bump(key))
        };
        if self.tracked {
            TrackingContext::record_write(
                &self.unwrap(),
                key,
                &previous,
                &Value::Undefined,
                version,
            );
        }
        previous
    }

    /// Call a method property with the unwrapped object as receiver.
    ///
    /// Looking the method up is a tracked read; the call itself is not.
    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        match self.get(key) {
            Value::Method(method) => method.invoke(&self.unwrap(), args),
            _ => Err(StoreError::NotAMethod(Arc::from(key))),
        }
    }

    /// Property names in insertion order. Not tracked.
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.cell.props.read().keys().cloned().collect()
    }

    /// Array length (tracked when read through a tracked handle).
    pub fn len(&self) -> usize {
        self.get(LENGTH)
            .as_int()
            .map(|n| n.max(0) as usize)
            .unwrap_or_else(|| self.cell.props.read().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array element `index`.
    pub fn at(&self, index: usize) -> Value {
        self.get(&index.to_string())
    }

    /// Append to an array.
    pub fn push(&self, value: impl Into<Value>) {
        let len = self.get_untracked(LENGTH).as_int().unwrap_or(0).max(0) as usize;
        self.set(&len.to_string(), value);
        self.set(LENGTH, len + 1);
    }

    /// JSON snapshot of the object, `depth` levels deep.
    pub fn snapshot(&self, depth: usize) -> serde_json::Value {
        let props: Vec<(Arc<str>, Value)> = self
            .cell
            .props
            .read()
            .iter()
            .map(|(k, v)| (Arc::clone(k), v.clone()))
            .collect();
        let child_depth = depth.saturating_sub(1);

        if self.is_array() {
            let len = self.get_untracked(LENGTH).as_int().unwrap_or(0).max(0) as usize;
            let items = (0..len)
                .map(|i| self.get_untracked(&i.to_string()).to_json(child_depth))
                .collect();
            return serde_json::Value::Array(items);
        }

        let map = props
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_json(child_depth)))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.cell.id)
            .field("tracked", &self.tracked)
            .finish()
    }
}
