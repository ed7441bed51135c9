//! Event records and the per-instance event scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::StoreError;
use crate::reactive::{ObjectId, Value};
use crate::store::InputChanges;
use super::bus::EventBus;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Dispatch,
    Next,
    Error,
    Complete,
}

/// Data carried by an event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Empty,
    /// Call arguments of a dispatch.
    Args(Vec<Value>),
    /// A value emitted by an effect.
    Value(Value),
    Error(StoreError),
    /// Inputs applied by the host.
    Changes(InputChanges),
}

impl EventPayload {
    pub fn as_args(&self) -> Option<&[Value]> {
        match self {
            EventPayload::Args(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            EventPayload::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&StoreError> {
        match self {
            EventPayload::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            EventPayload::Empty => serializer.serialize_unit(),
            EventPayload::Args(args) => args.serialize(serializer),
            EventPayload::Value(value) => value.serialize(serializer),
            EventPayload::Error(error) => serializer.serialize_str(&error.to_string()),
            EventPayload::Changes(changes) => changes.serialize(serializer),
        }
    }
}

/// One entry of the event log. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: u64,
    /// When the event was scheduled, not when it was flushed.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// The store instance that scheduled the event.
    pub context: ObjectId,
    pub name: Arc<str>,
    pub value: EventPayload,
}

/// Source of event ids, shared by every scheduler of a host.
#[derive(Debug)]
pub struct EventSequence(AtomicU64);

impl EventSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next event will get.
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for EventSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffers the events of one store instance until the end of a check
/// phase, then publishes them to the bus in one batch.
pub struct EventScheduler {
    context: ObjectId,
    bus: Arc<EventBus>,
    sequence: Arc<EventSequence>,
    buffer: Mutex<Vec<Arc<EventRecord>>>,
}

impl EventScheduler {
    pub fn new(context: ObjectId, bus: Arc<EventBus>, sequence: Arc<EventSequence>) -> Self {
        Self {
            context,
            bus,
            sequence,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> ObjectId {
        self.context
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Append an event and return its id.
    pub fn schedule(&self, kind: EventType, name: &str, value: EventPayload) -> u64 {
        // id allocation and push happen under one lock so the buffer stays
        // sorted by id
        let mut buffer = self.buffer.lock();
        let id = self.sequence.next_id();
        buffer.push(Arc::new(EventRecord {
            id,
            timestamp: Utc::now(),
            kind,
            context: self.context,
            name: Arc::from(name),
            value,
        }));
        id
    }

    /// Publish every buffered event in order, then a flushed notification.
    ///
    /// An empty buffer publishes nothing, not even the notification.
    pub fn flush(&self) -> usize {
        let drained = std::mem::take(&mut *self.buffer.lock());
        if drained.is_empty() {
            return 0;
        }
        for record in &drained {
            self.bus.publish(Arc::clone(record));
        }
        self.bus.notify_flushed(self.context);
        tracing::debug!(instance = %self.context, events = drained.len(), "events flushed");
        drained.len()
    }

    /// Number of events waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("context", &self.context)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{Observable, Observer};

    fn scheduler() -> (EventScheduler, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(16));
        let scheduler =
            EventScheduler::new(ObjectId::new(), bus.clone(), Arc::new(EventSequence::new()));
        (scheduler, bus)
    }

    #[test]
    fn ids_increase_in_schedule_order() {
        let (scheduler, bus) = scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = bus.events().subscribe(Observer::from_next(move |record: Arc<EventRecord>| {
            s.lock().push((record.id, record.name.to_string()));
        }));

        scheduler.schedule(EventType::Dispatch, "a", EventPayload::Empty);
        scheduler.schedule(EventType::Next, "b", EventPayload::Value(Value::from(1)));
        assert!(seen.lock().is_empty());

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(*seen.lock(), vec![(1, "a".to_string()), (2, "b".to_string())]);
    }

    #[test]
    fn empty_flush_is_silent() {
        let (scheduler, bus) = scheduler();
        let flushed = Arc::new(Mutex::new(0));
        let f = flushed.clone();
        let _sub = bus.flushed().subscribe(Observer::from_next(move |_| *f.lock() += 1));

        assert_eq!(scheduler.flush(), 0);
        assert_eq!(*flushed.lock(), 0);

        scheduler.schedule(EventType::Complete, "a", EventPayload::Empty);
        scheduler.flush();
        scheduler.flush();
        assert_eq!(*flushed.lock(), 1);
    }

    #[test]
    fn records_serialize_with_a_type_tag() {
        let (scheduler, bus) = scheduler();
        let record = Arc::new(Mutex::new(None));
        let r = record.clone();
        let _sub = bus
            .events()
            .subscribe(Observer::from_next(move |event| *r.lock() = Some(event)));

        scheduler.schedule(
            EventType::Dispatch,
            "load",
            EventPayload::Args(vec![Value::from("a"), Value::from(2)]),
        );
        scheduler.flush();

        let record = record.lock().clone().expect("published");
        let json = serde_json::to_value(&*record).expect("serialize");
        assert_eq!(json["type"], "Dispatch");
        assert_eq!(json["name"], "load");
        assert_eq!(json["value"], serde_json::json!(["a", 2]));
        assert_eq!(json["context"], scheduler.context().raw());

        let stamped = json["timestamp"].as_str().expect("rfc 3339 timestamp");
        assert_eq!(stamped.parse::<DateTime<Utc>>().expect("parse"), record.timestamp);
    }
}
