//! EventBus - the application-wide broadcast point for flushed events.
//!
//! Events are delivered two ways:
//! - synchronously, through [`Subject`]s, to observers registered with
//!   [`EventBus::events`] / [`EventBus::flushed`];
//! - asynchronously, through a tokio broadcast channel, to receivers from
//!   [`EventBus::subscribe_channel`].

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::observable::{FnObservable, Observable, Observer, Subject};
use crate::reactive::ObjectId;
use super::event::EventRecord;

pub struct EventBus {
    events: Subject<Arc<EventRecord>>,
    flushed: Subject<ObjectId>,
    tx: broadcast::Sender<Arc<EventRecord>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: Subject::new(),
            flushed: Subject::new(),
            tx,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn publish(&self, record: Arc<EventRecord>) {
        self.events.next(Arc::clone(&record));
        // No receivers is not an error.
        let _ = self.tx.send(record);
    }

    pub fn notify_flushed(&self, context: ObjectId) {
        self.flushed.next(context);
    }

    /// Every published event.
    pub fn events(&self) -> &Subject<Arc<EventRecord>> {
        &self.events
    }

    /// Instances whose buffered events were just flushed.
    pub fn flushed(&self) -> &Subject<ObjectId> {
        &self.flushed
    }

    /// Events scheduled by one instance.
    pub fn events_for(&self, context: ObjectId) -> impl Observable<Arc<EventRecord>> {
        let events = self.events.clone();
        FnObservable(move |observer: Observer<Arc<EventRecord>>| {
            let (on_next, on_error) = (observer.clone(), observer.clone());
            events.subscribe(Observer::new(
                move |record: Arc<EventRecord>| {
                    if record.context == context {
                        on_next.next(record);
                    }
                },
                move |error| on_error.error(error),
                move || observer.complete(),
            ))
        })
    }

    /// Async feed of every published event.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Arc<EventRecord>> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("observers", &self.events.observer_count())
            .finish()
    }
}
