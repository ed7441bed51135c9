//! Observables
//!
//! The minimal push-stream protocol the runtime needs from an effect:
//! subscribe with an [`Observer`] (next / error / complete) and get back a
//! [`Subscription`] that can be cancelled.
//!
//! An [`Effect`] is an observable of [`Value`]s returned or dispatched by an
//! action. Effects are cold descriptions: nothing runs until the effect
//! scheduler subscribes them.

mod effect;
mod subject;

pub use effect::Effect;
pub use subject::Subject;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreError;

/// Receives notifications from an observable.
///
/// After `error` or `complete` the observer is closed and ignores anything
/// else it is sent.
pub struct Observer<T> {
    next: Arc<dyn Fn(T) + Send + Sync>,
    error: Arc<dyn Fn(StoreError) + Send + Sync>,
    complete: Arc<dyn Fn() + Send + Sync>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            next: Arc::clone(&self.next),
            error: Arc::clone(&self.error),
            complete: Arc::clone(&self.complete),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> Observer<T> {
    pub fn new<N, E, C>(next: N, error: E, complete: C) -> Self
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self {
            next: Arc::new(next),
            error: Arc::new(error),
            complete: Arc::new(complete),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Observer that only cares about values.
    pub fn from_next<N>(next: N) -> Self
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        Self::new(next, |_| {}, || {})
    }

    pub fn next(&self, value: T) {
        if !self.is_closed() {
            (self.next)(value);
        }
    }

    pub fn error(&self, error: StoreError) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.error)(error);
        }
    }

    pub fn complete(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.complete)();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct SubscriptionInner {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    closed: AtomicBool,
}

/// Handle to a running subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Subscription that runs `teardown` once when unsubscribed.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(SubscriptionInner {
                teardown: Mutex::new(Some(Box::new(teardown))),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                teardown: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn unsubscribe(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let teardown = self.inner.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A source of notifications.
pub trait Observable<T>: Send + Sync {
    fn subscribe(&self, observer: Observer<T>) -> Subscription;
}

/// Adapter turning a closure into an observable.
pub struct FnObservable<F>(pub F);

impl<T, F> Observable<T> for FnObservable<F>
where
    F: Fn(Observer<T>) -> Subscription + Send + Sync,
{
    fn subscribe(&self, observer: Observer<T>) -> Subscription {
        (self.0)(observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn observer_closes_after_complete() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let observer = Observer::<u32>::from_next(move |v| {
            seen_clone.fetch_add(v as usize, Ordering::SeqCst);
        });

        observer.next(1);
        observer.complete();
        observer.next(10);
        observer.error(StoreError::msg("late"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(observer.is_closed());
    }

    #[test]
    fn unsubscribe_runs_teardown_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let subscription = Subscription::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        let copy = subscription.clone();
        subscription.unsubscribe();
        copy.unsubscribe();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(copy.is_closed());
    }
}
