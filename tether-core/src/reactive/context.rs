//! Tracking Context
//!
//! The tracking context records which object properties a computation read
//! while it ran.
//!
//! # Implementation
//!
//! We use a thread-local stack of active dependency maps. Running an action
//! or a selector pushes its fresh map; the returned guard pops it when
//! dropped, so the stack stays balanced even when the computation returns
//! early with an error or panics.
//!
//! Contexts nest (a selector called from inside an action), and a single
//! read is recorded into *every* map on the stack, not just the innermost.

use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;

use super::deps::DependencyMap;
use super::object::ObjectRef;
use super::value::Value;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<DependencyMap>>> = RefCell::new(Vec::new());
}

type ActiveMaps = SmallVec<[Arc<DependencyMap>; 4]>;

/// Guard that pops the context when dropped.
pub struct TrackingContext {
    deps: Arc<DependencyMap>,
}

impl TrackingContext {
    /// Enter a new tracking context recording into `deps`.
    ///
    /// The context is exited when the returned guard is dropped.
    pub fn enter(deps: Arc<DependencyMap>) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(&deps)));
        Self { deps }
    }

    /// Check if there is an active tracking context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Number of nested contexts on this thread.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// The map this guard records into.
    pub fn dependencies(&self) -> &Arc<DependencyMap> {
        &self.deps
    }

    fn active() -> ActiveMaps {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().cloned().collect())
    }

    /// Record that `object[key]` was read and held `value` at `version`.
    pub fn record_read(object: &ObjectRef, key: &str, value: &Value, version: u64) {
        for deps in Self::active() {
            deps.record(object, key, value, version);
        }
    }

    /// Record that `object[key]` changed from `previous` to `current`.
    ///
    /// Only keys a map already holds are updated, so writing never creates a
    /// dependency. The previous value always lands in the change ledger.
    pub fn record_write(
        object: &ObjectRef,
        key: &str,
        previous: &Value,
        current: &Value,
        version: u64,
    ) {
        for deps in Self::active() {
            deps.update_if_present(object, key, current, version);
            deps.record_change(object, key, previous);
        }
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(entry) = popped {
                debug_assert!(
                    Arc::ptr_eq(&entry, &self.deps),
                    "TrackingContext mismatch: popped a map that was not pushed by this guard"
                );
            }
        });
    }
}
