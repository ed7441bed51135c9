//! Scheduling
//!
//! Two schedulers cooperate to turn action invocations into an ordered,
//! observable log:
//!
//! - An [`EventScheduler`] per store instance buffers `Dispatch`, `Next`,
//!   `Error` and `Complete` records and publishes them to the shared
//!   [`EventBus`] once per check phase.
//! - An [`EffectScheduler`] per action queues the effects the action
//!   produced and subscribes them at the phase's dequeue point, applying a
//!   concurrency [`Operator`].
//!
//! Event ids come from one [`EventSequence`] per host, so ids reflect call
//! order across every instance of the application.

mod bus;
mod effect;
mod event;
mod log;

pub use bus::EventBus;
pub use effect::{DispatchObserver, EffectScheduler, ErrorSink, Operator, PendingGate};
pub use event::{EventPayload, EventRecord, EventScheduler, EventSequence, EventType};
pub use log::EventLog;
