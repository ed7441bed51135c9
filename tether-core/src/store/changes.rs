//! Input changes delivered to a store instance by its host.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::reactive::Value;

/// One changed input.
#[derive(Debug, Clone, Serialize)]
pub struct SimpleChange {
    pub previous: Value,
    pub current: Value,
    pub first_change: bool,
}

impl SimpleChange {
    pub fn new(previous: impl Into<Value>, current: impl Into<Value>, first_change: bool) -> Self {
        Self {
            previous: previous.into(),
            current: current.into(),
            first_change,
        }
    }
}

/// The set of inputs that changed in one update, in the order reported.
#[derive(Debug, Clone, Default)]
pub struct InputChanges {
    changes: IndexMap<Arc<str>, SimpleChange>,
}

impl InputChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, change: SimpleChange) -> Self {
        self.insert(name, change);
        self
    }

    pub fn insert(&mut self, name: &str, change: SimpleChange) {
        self.changes.insert(Arc::from(name), change);
    }

    pub fn get(&self, name: &str) -> Option<&SimpleChange> {
        self.changes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SimpleChange)> {
        self.changes.iter().map(|(name, change)| (&**name, change))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl Serialize for InputChanges {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.changes.len()))?;
        for (name, change) in &self.changes {
            map.serialize_entry(&**name, change)?;
        }
        map.end()
    }
}
