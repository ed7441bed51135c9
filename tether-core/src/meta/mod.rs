//! Metadata Registry
//!
//! Out-of-band facts attached to a target handle without touching the
//! target: action and selector descriptors hang off a store definition,
//! dependency maps, scoped containers and selector caches hang off a store
//! instance.
//!
//! # Layout
//!
//! `target -> namespace -> key -> value`, where the key is either the target
//! itself or a named member of it. Keys keep insertion order, so
//! [`MetadataRegistry::values`] returns facts in declaration order.
//!
//! Targets are identified by [`ObjectId`] handles rather than references, so
//! the registry never keeps a target alive. Entries are invalidated
//! explicitly with [`MetadataRegistry::clear`] when the target is destroyed.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::reactive::ObjectId;

/// Kinds of facts stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Action descriptors, per store definition.
    Action,
    /// Selector descriptors, per store definition.
    Selector,
    /// Error handlers, per store definition.
    Caught,
    /// Dependency map of the last invocation, per instance and action.
    Dependencies,
    /// Arguments of the last invocation, per instance and action.
    Arguments,
    /// Scoped containers, per instance (root) and action (child).
    Container,
    /// Cached selector results, per instance and argument signature.
    SelectorCache,
}

/// Either the target itself or one of its named members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetaKey {
    Target,
    Member(Arc<str>),
}

impl From<Option<&str>> for MetaKey {
    fn from(key: Option<&str>) -> Self {
        match key {
            Some(key) => MetaKey::Member(Arc::from(key)),
            None => MetaKey::Target,
        }
    }
}

type Slot = Arc<dyn Any + Send + Sync>;
type Facts = IndexMap<Namespace, IndexMap<MetaKey, Slot>>;

/// Identity-keyed side table.
#[derive(Default)]
pub struct MetadataRegistry {
    targets: DashMap<ObjectId, Facts>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `(namespace, target, key)`, replacing any
    /// previous value.
    pub fn set<T: Any + Send + Sync>(
        &self,
        namespace: Namespace,
        value: T,
        target: ObjectId,
        key: Option<&str>,
    ) {
        self.set_arc(namespace, Arc::new(value), target, key);
    }

    /// Like [`MetadataRegistry::set`] for a value that is already shared.
    pub fn set_arc<T: Any + Send + Sync>(
        &self,
        namespace: Namespace,
        value: Arc<T>,
        target: ObjectId,
        key: Option<&str>,
    ) {
        let replaced = {
            let mut facts = self.targets.entry(target).or_default();
            facts
                .entry(namespace)
                .or_default()
                .insert(MetaKey::from(key), value as Slot)
        };
        // dropped outside the shard lock
        drop(replaced);
    }

    /// Look up a value. `None` means "not found"; a found value of the
    /// wrong type is also `None`.
    pub fn get<T: Any + Send + Sync>(
        &self,
        namespace: Namespace,
        target: ObjectId,
        key: Option<&str>,
    ) -> Option<Arc<T>> {
        let slot = {
            let facts = self.targets.get(&target)?;
            facts.get(&namespace)?.get(&MetaKey::from(key))?.clone()
        };
        slot.downcast::<T>().ok()
    }

    pub fn contains(&self, namespace: Namespace, target: ObjectId, key: Option<&str>) -> bool {
        self.targets.get(&target).is_some_and(|facts| {
            facts
                .get(&namespace)
                .is_some_and(|slots| slots.contains_key(&MetaKey::from(key)))
        })
    }

    /// All values of `namespace` on `target`, in insertion order.
    pub fn values<T: Any + Send + Sync>(
        &self,
        namespace: Namespace,
        target: ObjectId,
    ) -> Vec<Arc<T>> {
        let slots: Vec<Slot> = match self.targets.get(&target) {
            Some(facts) => facts
                .get(&namespace)
                .map(|slots| slots.values().cloned().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        slots
            .into_iter()
            .filter_map(|slot| slot.downcast::<T>().ok())
            .collect()
    }

    /// Remove one value, returning whether it existed.
    pub fn delete(&self, namespace: Namespace, target: ObjectId, key: Option<&str>) -> bool {
        let removed = self.targets.get_mut(&target).and_then(|mut facts| {
            facts
                .get_mut(&namespace)
                .and_then(|slots| slots.shift_remove(&MetaKey::from(key)))
        });
        removed.is_some()
    }

    /// Drop every fact about `target`.
    pub fn clear(&self, target: ObjectId) {
        let removed = self.targets.remove(&target);
        drop(removed);
    }

    /// Number of targets with at least one fact.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

static REGISTRY: OnceLock<MetadataRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static MetadataRegistry {
    REGISTRY.get_or_init(MetadataRegistry::new)
}

pub fn set_meta<T: Any + Send + Sync>(
    namespace: Namespace,
    value: T,
    target: ObjectId,
    key: Option<&str>,
) {
    registry().set(namespace, value, target, key);
}

pub fn set_meta_arc<T: Any + Send + Sync>(
    namespace: Namespace,
    value: Arc<T>,
    target: ObjectId,
    key: Option<&str>,
) {
    registry().set_arc(namespace, value, target, key);
}

pub fn get_meta<T: Any + Send + Sync>(
    namespace: Namespace,
    target: ObjectId,
    key: Option<&str>,
) -> Option<Arc<T>> {
    registry().get(namespace, target, key)
}

pub fn get_meta_values<T: Any + Send + Sync>(
    namespace: Namespace,
    target: ObjectId,
) -> Vec<Arc<T>> {
    registry().values(namespace, target)
}

pub fn clear_meta(target: ObjectId) {
    registry().clear(target);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_by_key() {
        let registry = MetadataRegistry::new();
        let target = ObjectId::new();

        registry.set(Namespace::Action, 1_u32, target, Some("a"));
        registry.set(Namespace::Action, 2_u32, target, Some("b"));
        registry.set(Namespace::Selector, 3_u32, target, Some("a"));

        assert_eq!(registry.get::<u32>(Namespace::Action, target, Some("a")).as_deref(), Some(&1));
        assert_eq!(
            registry.get::<u32>(Namespace::Selector, target, Some("a")).as_deref(),
            Some(&3)
        );
        assert!(registry.get::<u32>(Namespace::Caught, target, Some("a")).is_none());
        assert!(registry.get::<u32>(Namespace::Action, ObjectId::new(), Some("a")).is_none());
    }

    #[test]
    fn found_but_empty_is_distinct_from_missing() {
        let registry = MetadataRegistry::new();
        let target = ObjectId::new();

        registry.set::<Option<u32>>(Namespace::Arguments, None, target, None);
        let found = registry.get::<Option<u32>>(Namespace::Arguments, target, None);
        assert_eq!(found.as_deref(), Some(&None));
        assert!(registry.contains(Namespace::Arguments, target, None));
        assert!(!registry.contains(Namespace::Arguments, target, Some("other")));
    }

    #[test]
    fn values_keep_declaration_order() {
        let registry = MetadataRegistry::new();
        let target = ObjectId::new();

        for (i, name) in ["first", "second", "third"].into_iter().enumerate() {
            registry.set(Namespace::Caught, i, target, Some(name));
        }
        // replacing keeps the original slot
        registry.set(Namespace::Caught, 10_usize, target, Some("first"));

        let values: Vec<usize> = registry
            .values::<usize>(Namespace::Caught, target)
            .into_iter()
            .map(|v| *v)
            .collect();
        assert_eq!(values, vec![10, 1, 2]);
    }

    #[test]
    fn clear_invalidates_the_target() {
        let registry = MetadataRegistry::new();
        let target = ObjectId::new();
        registry.set(Namespace::Container, "root", target, None);
        assert_eq!(registry.target_count(), 1);

        registry.clear(target);
        assert!(registry.get::<&str>(Namespace::Container, target, None).is_none());
        assert_eq!(registry.target_count(), 0);
    }

    #[test]
    fn delete_removes_a_single_value() {
        let registry = MetadataRegistry::new();
        let target = ObjectId::new();
        registry.set(Namespace::Dependencies, 1_u8, target, Some("a"));
        registry.set(Namespace::Dependencies, 2_u8, target, Some("b"));

        assert!(registry.delete(Namespace::Dependencies, target, Some("a")));
        assert!(!registry.delete(Namespace::Dependencies, target, Some("a")));
        assert_eq!(registry.values::<u8>(Namespace::Dependencies, target).len(), 1);
    }
}
