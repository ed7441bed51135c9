//! Dependency Maps
//!
//! A [`DependencyMap`] is the record of one tracked invocation: for every
//! object the computation read, the properties it read and the value each
//! held. [`DependencyMap::is_dirty`] later decides whether the invocation has
//! to run again.
//!
//! A map is created fresh for every invocation and replaced wholesale by the
//! next one; it is never shared between two invocations.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::TrackingContext;
use super::object::{ObjectId, ObjectRef};
use super::value::Value;

/// A value as it was observed, with the property's write version.
#[derive(Clone)]
struct Observed {
    value: Value,
    version: u64,
}

struct Dependency {
    object: ObjectRef,
    values: IndexMap<Arc<str>, Observed>,
}

/// A property write observed during a tracked invocation.
#[derive(Debug, Clone)]
pub struct Change {
    pub object: ObjectRef,
    pub key: Arc<str>,
    /// The value before the first write in this invocation.
    pub previous: Value,
}

impl Change {
    /// The live value of the property.
    pub fn current(&self) -> Value {
        self.object.get_untracked(&self.key)
    }
}

/// Recorded `(object, key) -> value` reads of one tracked invocation, plus
/// the ledger of writes made while it ran.
#[derive(Default)]
pub struct DependencyMap {
    entries: Mutex<IndexMap<ObjectId, Dependency>>,
    changes: Mutex<IndexMap<(ObjectId, Arc<str>), Change>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `object[key]` was observed holding `value` at write
    /// `version`.
    pub fn record(&self, object: &ObjectRef, key: &str, value: &Value, version: u64) {
        tracing::trace!(object = %object.id(), key, version, "dependency recorded");
        let value = Observed {
            value: value.clone().unwrap_tracked(),
            version,
        };
        let mut entries = self.entries.lock();
        let dependency = entries.entry(object.id()).or_insert_with(|| Dependency {
            object: object.unwrap(),
            values: IndexMap::new(),
        });
        match dependency.values.get_mut(key) {
            Some(slot) => *slot = value,
            None => {
                dependency.values.insert(Arc::from(key), value);
            }
        }
    }

    /// Update a recorded value, but only if `key` was already recorded.
    pub fn update_if_present(
        &self,
        object: &ObjectRef,
        key: &str,
        value: &Value,
        version: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        match entries
            .get_mut(&object.id())
            .and_then(|dependency| dependency.values.get_mut(key))
        {
            Some(slot) => {
                *slot = Observed {
                    value: value.clone().unwrap_tracked(),
                    version,
                };
                true
            }
            None => false,
        }
    }

    /// Add a write to the change ledger. The first previous value wins.
    pub fn record_change(&self, object: &ObjectRef, key: &str, previous: &Value) {
        self.changes
            .lock()
            .entry((object.id(), Arc::from(key)))
            .or_insert_with(|| Change {
                object: object.unwrap(),
                key: Arc::from(key),
                previous: previous.clone().unwrap_tracked(),
            });
    }

    pub fn contains(&self, object: &ObjectRef, key: &str) -> bool {
        self.entries
            .lock()
            .get(&object.id())
            .is_some_and(|dependency| dependency.values.contains_key(key))
    }

    /// The value recorded for `object[key]`, if any.
    pub fn recorded(&self, object: &ObjectRef, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .get(&object.id())
            .and_then(|dependency| {
                dependency
                    .values
                    .get(key)
                    .map(|observed| observed.value.clone())
            })
    }

    /// Number of recorded `(object, key)` pairs.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .map(|dependency| dependency.values.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct objects read.
    pub fn object_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Flattened `(object, key, recorded value)` triples in recording order.
    pub fn entries(&self) -> Vec<(ObjectRef, Arc<str>, Value)> {
        self.observed()
            .into_iter()
            .map(|(object, key, observed)| (object, key, observed.value))
            .collect()
    }

    fn observed(&self) -> Vec<(ObjectRef, Arc<str>, Observed)> {
        self.entries
            .lock()
            .values()
            .flat_map(|dependency| {
                dependency
                    .values
                    .iter()
                    .map(move |(key, observed)| {
                        (dependency.object.clone(), Arc::clone(key), observed.clone())
                    })
            })
            .collect()
    }

    /// The change ledger, in write order.
    pub fn changes(&self) -> Vec<Change> {
        self.changes.lock().values().cloned().collect()
    }

    /// Compare every recorded entry against the live property.
    ///
    /// An entry is dirty when the value differs or when the property was
    /// written since it was recorded, so a value that changes and changes
    /// back between two checks still counts as one change. Reads go straight
    /// to the objects, so checking never records new dependencies. Every
    /// dirty entry is brought up to date, so a check consumes the change it
    /// detects.
    pub fn is_dirty(&self) -> bool {
        let mut dirty = false;
        let mut entries = self.entries.lock();
        for dependency in entries.values_mut() {
            for (key, observed) in dependency.values.iter_mut() {
                let (current, version) = dependency.object.get_versioned(key);
                if version != observed.version || !Value::same(&observed.value, &current) {
                    *observed = Observed {
                        value: current,
                        version,
                    };
                    dirty = true;
                }
            }
        }
        dirty
    }

    /// Record every entry of this map into the active tracking contexts.
    ///
    /// Used when a cached selector is read from inside another tracked
    /// computation, so the reader depends on what the selector depends on.
    pub fn replay(&self) {
        if !TrackingContext::is_active() {
            return;
        }
        for (object, key, observed) in self.observed() {
            TrackingContext::record_read(&object, &key, &observed.value, observed.version);
        }
    }
}

impl std::fmt::Debug for DependencyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyMap")
            .field("objects", &self.object_count())
            .field("entries", &self.len())
            .field("changes", &self.changes.lock().len())
            .finish()
    }
}
