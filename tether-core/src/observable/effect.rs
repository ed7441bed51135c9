//! Effect constructors.
//!
//! Synchronous constructors (`of`, `empty`, `fail`, `from_fn`) emit while
//! being subscribed. The async ones (`from_stream`, `from_future`, `timer`)
//! spawn a tokio task per subscription and abort it on unsubscribe; without
//! a runtime they error with [`StoreError::NoRuntime`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;

use crate::error::{Result, StoreError};
use crate::reactive::Value;
use super::{FnObservable, Observable, Observer, Subscription};

/// An observable of values produced by an action.
///
/// Cloning shares the description; every subscription runs it afresh.
#[derive(Clone)]
pub struct Effect(Arc<dyn Observable<Value>>);

impl Effect {
    pub fn new<O>(observable: O) -> Self
    where
        O: Observable<Value> + 'static,
    {
        Self(Arc::new(observable))
    }

    /// Effect whose subscribe behaviour is the given closure.
    pub fn from_fn<F>(subscribe: F) -> Self
    where
        F: Fn(Observer<Value>) -> Subscription + Send + Sync + 'static,
    {
        Self::new(FnObservable(subscribe))
    }

    /// Emit every value, then complete.
    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        Self::from_fn(move |observer| {
            for value in &values {
                if observer.is_closed() {
                    break;
                }
                observer.next(value.clone());
            }
            observer.complete();
            Subscription::empty()
        })
    }

    /// Complete immediately.
    pub fn empty() -> Self {
        Self::from_fn(|observer| {
            observer.complete();
            Subscription::empty()
        })
    }

    /// Error immediately.
    pub fn fail(error: StoreError) -> Self {
        Self::from_fn(move |observer| {
            observer.error(error.clone());
            Subscription::empty()
        })
    }

    /// Drive a stream created per subscription on the current tokio runtime.
    ///
    /// The first `Err` item ends the effect with an error.
    pub fn from_stream<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        Self::from_fn(move |observer| {
            let handle = match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    observer.error(StoreError::NoRuntime(Arc::from("stream effect")));
                    return Subscription::empty();
                }
            };

            let mut stream = Box::pin(factory());
            let task = handle.spawn(async move {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(value) => observer.next(value),
                        Err(error) => {
                            observer.error(error);
                            return;
                        }
                    }
                }
                observer.complete();
            });
            Subscription::new(move || task.abort())
        })
    }

    /// Resolve a future created per subscription, emitting its value once.
    pub fn from_future<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_stream(move || futures_util::stream::once(factory()))
    }

    /// Emit `value` once after `delay`.
    pub fn timer(delay: Duration, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::from_future(move || {
            let value = value.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
        })
    }

    pub fn subscribe(&self, observer: Observer<Value>) -> Subscription {
        self.0.subscribe(observer)
    }
}

impl Observable<Value> for Effect {
    fn subscribe(&self, observer: Observer<Value>) -> Subscription {
        self.0.subscribe(observer)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Effect(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collect(effect: &Effect) -> (Arc<Mutex<Vec<Value>>>, Arc<Mutex<Option<String>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let outcome = Arc::new(Mutex::new(None));
        let (v, e, c) = (values.clone(), outcome.clone(), outcome.clone());
        effect.subscribe(Observer::new(
            move |value| v.lock().push(value),
            move |error| *e.lock() = Some(format!("error: {error}")),
            move || *c.lock() = Some("complete".to_string()),
        ));
        (values, outcome)
    }

    #[test]
    fn of_emits_then_completes() {
        let (values, outcome) = collect(&Effect::of([1, 2, 3]));
        assert_eq!(*values.lock(), vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(outcome.lock().as_deref(), Some("complete"));
    }

    #[test]
    fn fail_errors_without_values() {
        let (values, outcome) = collect(&Effect::fail(StoreError::msg("nope")));
        assert!(values.lock().is_empty());
        assert_eq!(outcome.lock().as_deref(), Some("error: nope"));
    }

    #[test]
    fn async_effects_need_a_runtime() {
        let (_, outcome) = collect(&Effect::timer(Duration::from_millis(1), 1));
        assert_eq!(
            outcome.lock().as_deref(),
            Some("error: no async runtime available to run `stream effect`")
        );
    }

    #[tokio::test]
    async fn timer_emits_after_the_delay() {
        let (values, outcome) = collect(&Effect::timer(Duration::from_millis(5), "tick"));
        assert!(values.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*values.lock(), vec![Value::from("tick")]);
        assert_eq!(outcome.lock().as_deref(), Some("complete"));
    }

    #[tokio::test]
    async fn unsubscribe_aborts_the_task() {
        let effect = Effect::timer(Duration::from_millis(20), 1);
        let values = Arc::new(Mutex::new(Vec::new()));
        let v = values.clone();
        let subscription = effect.subscribe(Observer::from_next(move |value| v.lock().push(value)));

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(values.lock().is_empty());
    }
}
