//! Event log recorder.
//!
//! Subscribes to a bus and keeps every record it sees, for devtools and
//! replay. Exports as JSON or MessagePack.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::observable::{Observable, Observer, Subscription};
use super::bus::EventBus;
use super::event::{EventRecord, EventType};

pub struct EventLog {
    records: Arc<Mutex<Vec<Arc<EventRecord>>>>,
    subscription: Subscription,
}

impl EventLog {
    /// Start recording everything published on `bus`.
    pub fn record(bus: &EventBus) -> Self {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let subscription = bus
            .events()
            .subscribe(Observer::from_next(move |record: Arc<EventRecord>| {
                sink.lock().push(record)
            }));
        Self { records, subscription }
    }

    pub fn stop(&self) {
        self.subscription.unsubscribe();
    }

    pub fn records(&self) -> Vec<Arc<EventRecord>> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// `(type, name)` pairs in publish order; handy for assertions.
    pub fn summary(&self) -> Vec<(EventType, String)> {
        self.records
            .lock()
            .iter()
            .map(|record| (record.kind, record.name.to_string()))
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&*self.records.lock()).map_err(StoreError::custom)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(&*self.records.lock()).map_err(StoreError::custom)
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ObjectId, Value};
    use crate::scheduler::{EventPayload, EventScheduler, EventSequence};

    #[test]
    fn exports_recorded_events() {
        let bus = Arc::new(EventBus::new(8));
        let log = EventLog::record(&bus);
        let scheduler =
            EventScheduler::new(ObjectId::new(), bus.clone(), Arc::new(EventSequence::new()));

        scheduler.schedule(EventType::Dispatch, "save", EventPayload::Args(vec![Value::from(1)]));
        scheduler.schedule(EventType::Complete, "save", EventPayload::Empty);
        scheduler.flush();

        assert_eq!(
            log.summary(),
            vec![
                (EventType::Dispatch, "save".to_string()),
                (EventType::Complete, "save".to_string()),
            ]
        );

        let json: serde_json::Value =
            serde_json::from_str(&log.to_json().expect("json")).expect("parse");
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[1]["type"], "Complete");

        let packed = log.to_msgpack().expect("msgpack");
        let decoded: serde_json::Value = rmp_serde::from_slice(&packed).expect("decode");
        assert_eq!(decoded.as_array().map(Vec::len), Some(2));
        assert_eq!(decoded[0]["name"], "save");
        assert_eq!(decoded[0]["value"], serde_json::json!([1]));
    }

    #[test]
    fn stop_ends_recording() {
        let bus = Arc::new(EventBus::new(8));
        let log = EventLog::record(&bus);
        let scheduler =
            EventScheduler::new(ObjectId::new(), bus.clone(), Arc::new(EventSequence::new()));

        log.stop();
        scheduler.schedule(EventType::Dispatch, "save", EventPayload::Empty);
        scheduler.flush();
        assert!(log.is_empty());
    }
}
