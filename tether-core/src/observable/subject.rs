//! Subjects
//!
//! A [`Subject`] is a hot, multicast observable driven by hand: whatever is
//! pushed with [`Subject::next`] goes to every current observer. It backs the
//! event bus, the effect scheduler's merge point, and is the easiest way to
//! build an effect whose timing a test controls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::reactive::Value;
use super::{Effect, Observable, Observer, Subscription};

#[derive(Clone)]
enum Terminal {
    Error(StoreError),
    Complete,
}

struct SubjectInner<T> {
    observers: Mutex<IndexMap<u64, Observer<T>>>,
    terminal: Mutex<Option<Terminal>>,
    next_id: AtomicU64,
}

/// Multicast observable.
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                observers: Mutex::new(IndexMap::new()),
                terminal: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    // Observers are snapshotted so they can subscribe or unsubscribe
    // while being notified.
    fn observers(&self) -> Vec<Observer<T>> {
        self.inner.observers.lock().values().cloned().collect()
    }

    pub fn next(&self, value: T) {
        if self.is_stopped() {
            return;
        }
        for observer in self.observers() {
            observer.next(value.clone());
        }
    }

    pub fn error(&self, error: StoreError) {
        if !self.stop(Terminal::Error(error.clone())) {
            return;
        }
        let observers = std::mem::take(&mut *self.inner.observers.lock());
        for observer in observers.into_values() {
            observer.error(error.clone());
        }
    }

    pub fn complete(&self) {
        if !self.stop(Terminal::Complete) {
            return;
        }
        let observers = std::mem::take(&mut *self.inner.observers.lock());
        for observer in observers.into_values() {
            observer.complete();
        }
    }

    fn stop(&self, terminal: Terminal) -> bool {
        let mut slot = self.inner.terminal.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(terminal);
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.terminal.lock().is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Subject<T> {
    fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let terminal = self.inner.terminal.lock().clone();
        match terminal {
            Some(Terminal::Error(error)) => {
                observer.error(error);
                return Subscription::empty();
            }
            Some(Terminal::Complete) => {
                observer.complete();
                return Subscription::empty();
            }
            None => {}
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().insert(id, observer);

        let weak: Weak<SubjectInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.observers.lock().shift_remove(&id);
                drop(removed);
            }
        })
    }
}

impl Subject<Value> {
    /// View this subject as an effect.
    pub fn as_effect(&self) -> Effect {
        Effect::new(self.clone())
    }
}
