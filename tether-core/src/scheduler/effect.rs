//! Effect Scheduler
//!
//! One scheduler per action. Effects returned or dispatched by the action
//! are queued, not subscribed; [`EffectScheduler::dequeue`] later pushes
//! the whole queue through a merge point into the combinator, which applies
//! each entry's concurrency [`Operator`]:
//!
//! - `Switch` cancels every running effect before starting the new one.
//! - `Merge` runs the new effect alongside the others.
//! - `Concat` buffers the new effect until nothing is running.
//! - `Exhaust` drops the new effect while anything is running.
//!
//! Every notification of a running effect is recorded on the instance's
//! event scheduler, and errors are sent to the instance's error chain
//! wrapped as effect errors.
//!
//! While a [`PendingGate`] is held (an effect is still being loaded),
//! dequeueing is a no-op; dropping the last gate retries it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::error::{Result, StoreError};
use crate::observable::{Effect, Observable, Observer, Subject, Subscription};
use crate::reactive::Value;
use super::event::{EventPayload, EventScheduler, EventType};

/// Concurrency policy for effects of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[default]
    Switch,
    Merge,
    Concat,
    Exhaust,
}

/// Where effect errors and observer failures are sent.
pub type ErrorSink = Arc<dyn Fn(StoreError) + Send + Sync>;

type NextFn = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&StoreError) -> Result<()> + Send + Sync>;
type CompleteFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Callbacks attached to a dispatched effect.
///
/// A callback returning `Err` sends that error to the instance's error
/// chain.
#[derive(Clone, Default)]
pub struct DispatchObserver {
    next: Option<NextFn>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl DispatchObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StoreError) -> Result<()> + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(f));
        self
    }

    fn next(&self, value: &Value) -> Result<()> {
        self.next.as_ref().map_or(Ok(()), |f| f(value))
    }

    fn error(&self, error: &StoreError) -> Result<()> {
        self.error.as_ref().map_or(Ok(()), |f| f(error))
    }

    fn complete(&self) -> Result<()> {
        self.complete.as_ref().map_or(Ok(()), |f| f())
    }
}

impl std::fmt::Debug for DispatchObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchObserver")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

#[derive(Clone)]
struct QueuedEffect {
    effect: Effect,
    operator: Operator,
    observer: Option<DispatchObserver>,
}

// ---- Combinator ----

#[derive(Default)]
struct CombinatorState {
    /// Running effects. The slot is empty until `subscribe` returns.
    active: IndexMap<u64, Option<Subscription>>,
    /// Concat entries waiting for the running effects to finish.
    buffer: VecDeque<QueuedEffect>,
    closed: bool,
}

struct Combinator {
    action: Arc<str>,
    events: Arc<EventScheduler>,
    sink: ErrorSink,
    check: Arc<Notify>,
    state: Mutex<CombinatorState>,
    next_id: AtomicU64,
}

impl Combinator {
    fn accept(self: &Arc<Self>, entry: QueuedEffect) {
        let cancelled: Vec<Subscription> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let busy = !state.active.is_empty();
            let operator = entry.operator;
            match operator {
                Operator::Switch => state.active.drain(..).filter_map(|(_, slot)| slot).collect(),
                Operator::Merge => Vec::new(),
                Operator::Concat if busy => {
                    state.buffer.push_back(entry);
                    return;
                }
                Operator::Exhaust if busy => {
                    tracing::debug!(
                        action = %self.action,
                        "effect ignored while another is running"
                    );
                    return;
                }
                Operator::Concat | Operator::Exhaust => Vec::new(),
            }
        };
        if !cancelled.is_empty() {
            tracing::debug!(
                action = %self.action,
                cancelled = cancelled.len(),
                "effects cancelled"
            );
        }
        for subscription in cancelled {
            subscription.unsubscribe();
        }
        self.start(entry);
    }

    fn start(self: &Arc<Self>, entry: QueuedEffect) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().active.insert(id, None);

        tracing::debug!(
            action = %self.action,
            effect = id,
            operator = ?entry.operator,
            "effect subscribed"
        );
        let subscription = entry.effect.subscribe(self.inner_observer(id, entry.observer));

        // A synchronous effect may already have finished, or been switched
        // away by one of its own notifications.
        let orphan = {
            let mut state = self.state.lock();
            match state.active.get_mut(&id) {
                Some(slot) => {
                    *slot = Some(subscription);
                    None
                }
                None => Some(subscription),
            }
        };
        if let Some(subscription) = orphan {
            subscription.unsubscribe();
        }
    }

    fn inner_observer(
        self: &Arc<Self>,
        id: u64,
        observer: Option<DispatchObserver>,
    ) -> Observer<Value> {
        let weak = Arc::downgrade(self);
        let (on_next, on_error, on_complete) = (weak.clone(), weak.clone(), weak);
        let (next_observer, error_observer, complete_observer) =
            (observer.clone(), observer.clone(), observer);

        Observer::new(
            move |value: Value| {
                if let Some(combinator) = Weak::upgrade(&on_next) {
                    combinator.on_next(id, value, next_observer.as_ref());
                }
            },
            move |error: StoreError| {
                if let Some(combinator) = Weak::upgrade(&on_error) {
                    combinator.on_error(id, error, error_observer.as_ref());
                }
            },
            move || {
                if let Some(combinator) = Weak::upgrade(&on_complete) {
                    combinator.on_complete(id, complete_observer.as_ref());
                }
            },
        )
    }

    fn is_active(&self, id: u64) -> bool {
        let state = self.state.lock();
        !state.closed && state.active.contains_key(&id)
    }

    fn on_next(self: &Arc<Self>, id: u64, value: Value, observer: Option<&DispatchObserver>) {
        if !self.is_active(id) {
            return;
        }
        self.events
            .schedule(EventType::Next, &self.action, EventPayload::Value(value.clone()));
        if let Some(Err(error)) = observer.map(|observer| observer.next(&value)) {
            (self.sink)(error);
        }
        self.check.notify_one();
    }

    fn on_error(self: &Arc<Self>, id: u64, error: StoreError, observer: Option<&DispatchObserver>) {
        if !self.is_active(id) {
            return;
        }
        self.events
            .schedule(EventType::Error, &self.action, EventPayload::Error(error.clone()));
        self.finish(id);
        if let Some(Err(failure)) = observer.map(|observer| observer.error(&error)) {
            (self.sink)(failure);
        }
        (self.sink)(error.into_effect(Arc::clone(&self.action)));
        self.check.notify_one();
    }

    fn on_complete(self: &Arc<Self>, id: u64, observer: Option<&DispatchObserver>) {
        if !self.is_active(id) {
            return;
        }
        self.events
            .schedule(EventType::Complete, &self.action, EventPayload::Empty);
        self.finish(id);
        if let Some(Err(error)) = observer.map(DispatchObserver::complete) {
            (self.sink)(error);
        }
        self.check.notify_one();
    }

    fn finish(self: &Arc<Self>, id: u64) {
        let next = {
            let mut state = self.state.lock();
            state.active.shift_remove(&id);
            if state.active.is_empty() && !state.closed {
                state.buffer.pop_front()
            } else {
                None
            }
        };
        if let Some(entry) = next {
            self.start(entry);
        }
    }

    fn active(&self) -> usize {
        self.state.lock().active.len()
    }

    fn cancel(&self) {
        let (running, buffered) = {
            let mut state = self.state.lock();
            state.closed = true;
            let running: Vec<Subscription> =
                state.active.drain(..).filter_map(|(_, slot)| slot).collect();
            (running, std::mem::take(&mut state.buffer))
        };
        tracing::debug!(
            action = %self.action,
            cancelled = running.len(),
            dropped = buffered.len(),
            "effect pipeline disconnected"
        );
        for subscription in running {
            subscription.unsubscribe();
        }
    }
}

// ---- Scheduler ----

struct Connection {
    merge: Subject<QueuedEffect>,
    subscription: Subscription,
    combinator: Arc<Combinator>,
}

/// Per-action effect queue.
pub struct EffectScheduler {
    action: Arc<str>,
    events: Arc<EventScheduler>,
    sink: ErrorSink,
    check: Arc<Notify>,
    queue: Mutex<VecDeque<QueuedEffect>>,
    pending: AtomicUsize,
    connection: Mutex<Option<Connection>>,
    disconnected: AtomicBool,
}

impl EffectScheduler {
    pub fn new(
        action: impl Into<Arc<str>>,
        events: Arc<EventScheduler>,
        sink: ErrorSink,
        check: Arc<Notify>,
    ) -> Self {
        Self {
            action: action.into(),
            events,
            sink,
            check,
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            connection: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Queue an effect without subscribing to it.
    pub fn enqueue(&self, effect: Effect, operator: Operator, observer: Option<DispatchObserver>) {
        if self.disconnected.load(Ordering::SeqCst) {
            tracing::warn!(action = %self.action, "effect dropped after disconnect");
            return;
        }
        self.queue.lock().push_back(QueuedEffect {
            effect,
            operator,
            observer,
        });
    }

    /// Subscribe every queued effect, unless a pending gate is held.
    ///
    /// Returns the number of effects handed to the combinator.
    pub fn dequeue(&self) -> usize {
        if self.pending() > 0 || self.disconnected.load(Ordering::SeqCst) {
            return 0;
        }
        let drained: Vec<QueuedEffect> = self.queue.lock().drain(..).collect();
        if drained.is_empty() {
            return 0;
        }
        let Some(merge) = self.merge_point() else {
            return 0;
        };
        let count = drained.len();
        for entry in drained {
            merge.next(entry);
        }
        count
    }

    /// Create the merge point and subscribe the combinator to it. Calling
    /// it again is a no-op.
    pub fn connect(&self) {
        let _ = self.merge_point();
    }

    fn merge_point(&self) -> Option<Subject<QueuedEffect>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return None;
        }
        let mut connection = self.connection.lock();
        if let Some(existing) = connection.as_ref() {
            return Some(existing.merge.clone());
        }

        let combinator = Arc::new(Combinator {
            action: Arc::clone(&self.action),
            events: Arc::clone(&self.events),
            sink: Arc::clone(&self.sink),
            check: Arc::clone(&self.check),
            state: Mutex::new(CombinatorState::default()),
            next_id: AtomicU64::new(0),
        });
        let merge: Subject<QueuedEffect> = Subject::new();
        let feed = Arc::clone(&combinator);
        let subscription = merge.subscribe(Observer::from_next(move |entry| feed.accept(entry)));
        *connection = Some(Connection {
            merge: merge.clone(),
            subscription,
            combinator,
        });
        Some(merge)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Unsubscribe the combinator and cancel every running effect. Nothing
    /// is queued or subscribed afterwards.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.lock().clear();
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.subscription.unsubscribe();
            connection.merge.complete();
            connection.combinator.cancel();
        }
    }

    /// Effects waiting for the next dequeue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Effects currently subscribed.
    pub fn active(&self) -> usize {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |connection| connection.combinator.active())
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Hold dequeueing until the returned gate is dropped.
    pub fn gate(self: &Arc<Self>) -> PendingGate {
        self.pending.fetch_add(1, Ordering::SeqCst);
        PendingGate {
            scheduler: Arc::clone(self),
        }
    }

    /// Hold dequeueing until `future` settles on the current tokio runtime.
    pub fn add_pending<F>(self: &Arc<Self>, future: F) -> Result<()>
    where
        F: Future + Send + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|_| StoreError::NoRuntime(Arc::clone(&self.action)))?;
        let gate = self.gate();
        handle.spawn(async move {
            future.await;
            drop(gate);
        });
        Ok(())
    }
}

impl std::fmt::Debug for EffectScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScheduler")
            .field("action", &self.action)
            .field("queued", &self.queued())
            .field("pending", &self.pending())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// An in-flight asynchronous load. Dropping it settles the gate.
pub struct PendingGate {
    scheduler: Arc<EffectScheduler>,
}

impl Drop for PendingGate {
    fn drop(&mut self) {
        if self.scheduler.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.scheduler.dequeue();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ObjectId;
    use crate::scheduler::{EventBus, EventLog, EventSequence};

    struct Fixture {
        scheduler: Arc<EffectScheduler>,
        log: EventLog,
        events: Arc<EventScheduler>,
        errors: Arc<Mutex<Vec<StoreError>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let bus = Arc::new(EventBus::new(16));
            let log = EventLog::record(&bus);
            let events = Arc::new(EventScheduler::new(
                ObjectId::new(),
                bus,
                Arc::new(EventSequence::new()),
            ));
            let errors: Arc<Mutex<Vec<StoreError>>> = Arc::new(Mutex::new(Vec::new()));
            let sink_errors = errors.clone();
            let scheduler = Arc::new(EffectScheduler::new(
                "load",
                events.clone(),
                Arc::new(move |error: StoreError| sink_errors.lock().push(error)),
                Arc::new(Notify::new()),
            ));
            Self {
                scheduler,
                log,
                events,
                errors,
            }
        }

        fn flushed(&self) -> Vec<(EventType, Option<Value>)> {
            self.events.flush();
            let out = self
                .log
                .records()
                .iter()
                .map(|record| (record.kind, record.value.as_value().cloned()))
                .collect();
            self.log.clear();
            out
        }
    }

    fn subjects() -> (Subject<Value>, Subject<Value>) {
        (Subject::new(), Subject::new())
    }

    #[test]
    fn nothing_subscribes_before_dequeue() {
        let fx = Fixture::new();
        let subscribed = Arc::new(AtomicUsize::new(0));
        let count = subscribed.clone();
        let effect = Effect::from_fn(move |observer| {
            count.fetch_add(1, Ordering::SeqCst);
            observer.complete();
            Subscription::empty()
        });

        fx.scheduler.enqueue(effect, Operator::Switch, None);
        assert_eq!(subscribed.load(Ordering::SeqCst), 0);
        assert_eq!(fx.scheduler.queued(), 1);
        assert!(!fx.scheduler.is_connected());

        assert_eq!(fx.scheduler.dequeue(), 1);
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);
        assert!(fx.scheduler.is_connected());
    }

    #[test]
    fn switch_cancels_the_running_effect() {
        let fx = Fixture::new();
        let (first, second) = subjects();
        fx.scheduler.enqueue(first.as_effect(), Operator::Switch, None);
        fx.scheduler.enqueue(second.as_effect(), Operator::Switch, None);
        fx.scheduler.dequeue();

        first.next(Value::from(1));
        second.next(Value::from(2));
        first.complete();
        second.complete();

        assert_eq!(first.observer_count(), 0);
        assert_eq!(
            fx.flushed(),
            vec![(EventType::Next, Some(Value::from(2))), (EventType::Complete, None)]
        );
    }

    #[test]
    fn merge_runs_effects_side_by_side() {
        let fx = Fixture::new();
        let (first, second) = subjects();
        fx.scheduler.enqueue(first.as_effect(), Operator::Merge, None);
        fx.scheduler.enqueue(second.as_effect(), Operator::Merge, None);
        fx.scheduler.dequeue();
        assert_eq!(fx.scheduler.active(), 2);

        first.next(Value::from(1));
        second.next(Value::from(2));
        first.complete();
        second.complete();

        assert_eq!(
            fx.flushed(),
            vec![
                (EventType::Next, Some(Value::from(1))),
                (EventType::Next, Some(Value::from(2))),
                (EventType::Complete, None),
                (EventType::Complete, None),
            ]
        );
        assert_eq!(fx.scheduler.active(), 0);
    }

    #[test]
    fn concat_waits_for_the_running_effect() {
        let fx = Fixture::new();
        let (first, second) = subjects();
        fx.scheduler.enqueue(first.as_effect(), Operator::Concat, None);
        fx.scheduler.enqueue(second.as_effect(), Operator::Concat, None);
        fx.scheduler.dequeue();

        assert_eq!(second.observer_count(), 0);
        second.next(Value::from(0));
        first.next(Value::from(1));
        first.complete();
        assert_eq!(second.observer_count(), 1);
        second.next(Value::from(2));
        second.complete();

        assert_eq!(
            fx.flushed(),
            vec![
                (EventType::Next, Some(Value::from(1))),
                (EventType::Complete, None),
                (EventType::Next, Some(Value::from(2))),
                (EventType::Complete, None),
            ]
        );
    }

    #[test]
    fn exhaust_ignores_effects_while_busy() {
        let fx = Fixture::new();
        let (first, second) = subjects();
        fx.scheduler.enqueue(first.as_effect(), Operator::Exhaust, None);
        fx.scheduler.enqueue(second.as_effect(), Operator::Exhaust, None);
        fx.scheduler.dequeue();

        assert_eq!(second.observer_count(), 0);
        first.next(Value::from(1));
        first.complete();
        second.next(Value::from(2));

        assert_eq!(
            fx.flushed(),
            vec![(EventType::Next, Some(Value::from(1))), (EventType::Complete, None)]
        );
    }

    #[test]
    fn errors_are_recorded_and_wrapped() {
        let fx = Fixture::new();
        let observed = Arc::new(Mutex::new(None));
        let o = observed.clone();
        let observer = DispatchObserver::new().on_error(move |error| {
            *o.lock() = Some(error.to_string());
            Ok(())
        });

        fx.scheduler
            .enqueue(Effect::fail(StoreError::msg("offline")), Operator::Switch, Some(observer));
        fx.scheduler.dequeue();

        assert_eq!(fx.flushed(), vec![(EventType::Error, None)]);
        assert_eq!(observed.lock().as_deref(), Some("offline"));
        let errors = fx.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_effect_error());
    }

    #[test]
    fn observer_failures_go_to_the_sink() {
        let fx = Fixture::new();
        let observer = DispatchObserver::new().on_next(|_| Err(StoreError::msg("bad value")));

        fx.scheduler.enqueue(Effect::of([1]), Operator::Switch, Some(observer));
        fx.scheduler.dequeue();

        let errors = fx.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_effect_error());
        assert_eq!(errors[0].to_string(), "bad value");
    }

    #[test]
    fn gates_hold_the_queue() {
        let fx = Fixture::new();
        let gate = fx.scheduler.gate();
        fx.scheduler.enqueue(Effect::of([1]), Operator::Switch, None);

        assert_eq!(fx.scheduler.dequeue(), 0);
        assert_eq!(fx.scheduler.queued(), 1);

        drop(gate);
        assert_eq!(fx.scheduler.queued(), 0);
        assert_eq!(fx.flushed().len(), 2);
    }

    #[test]
    fn disconnect_stops_effect_flow() {
        let fx = Fixture::new();
        let subject: Subject<Value> = Subject::new();
        fx.scheduler.enqueue(subject.as_effect(), Operator::Merge, None);
        fx.scheduler.dequeue();
        assert_eq!(subject.observer_count(), 1);

        fx.scheduler.disconnect();
        assert_eq!(subject.observer_count(), 0);
        subject.next(Value::from(1));

        fx.scheduler.enqueue(Effect::of([2]), Operator::Merge, None);
        assert_eq!(fx.scheduler.dequeue(), 0);
        assert!(fx.flushed().is_empty());
    }

    #[tokio::test]
    async fn add_pending_dequeues_when_settled() {
        let fx = Fixture::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        fx.scheduler.add_pending(async move {
            let _ = rx.await;
        })
        .expect("runtime");
        fx.scheduler.enqueue(Effect::of([1]), Operator::Switch, None);
        assert_eq!(fx.scheduler.dequeue(), 0);

        tx.send(()).expect("send");
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while fx.scheduler.queued() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("dequeued after the gate settled");
        assert_eq!(fx.scheduler.pending(), 0);
    }
}
