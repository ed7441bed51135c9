//! Tether Core
//!
//! This crate provides the runtime core of the Tether reactive store
//! library. It implements:
//!
//! - Fine-grained dependency tracking over plain objects
//! - Dirty checking that decides when reactive actions re-run
//! - Memoized selectors keyed by argument tuple
//! - An ordered, replayable event log of action dispatches and effect
//!   notifications
//! - Per-action effect queues with switch / merge / concat / exhaust
//!   concurrency
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: tracked objects, tracking contexts and dependency maps
//! - `meta`: the metadata side table keyed by object handles
//! - `container`: hierarchical scoped containers
//! - `observable`: the observable protocol effects are built on
//! - `scheduler`: event and effect schedulers, the event bus
//! - `store`: store definitions and instances
//! - `host`: the application-wide context shared by every store
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{ActionDescriptor, Host, ObjectRef, StoreDefinition, StoreInstance, Value};
//!
//! let counter = StoreDefinition::builder("counter")
//!     .action(ActionDescriptor::invoke("log", |ctx| {
//!         println!("count is {:?}", ctx.this().get("count"));
//!         Ok(None)
//!     }))
//!     .build();
//!
//! let state = ObjectRef::from_pairs([("count", 0)]);
//! let store = StoreInstance::create(&counter, &Host::new(), state.clone())?;
//!
//! store.detect_changes()?; // prints "count is 0"
//! state.set("count", 10);
//! store.detect_changes()?; // prints "count is 10"
//! store.detect_changes()?; // nothing changed, nothing printed
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod host;
pub mod meta;
pub mod observable;
pub mod reactive;
pub mod scheduler;
pub mod store;

pub use config::HostConfig;
pub use container::{Container, Provider};
pub use error::{ErrorHandler, LogErrorHandler, Result, StoreError};
pub use host::Host;
pub use observable::{Effect, Observable, Observer, Subject, Subscription};
pub use reactive::{ObjectId, ObjectRef, Value};
pub use scheduler::{DispatchObserver, EventLog, EventRecord, EventType, Operator};
pub use store::{
    dispatch, dispatch_with, use_concat, use_exhaust, use_merge, use_switch, ActionContext,
    ActionDescriptor, InputChanges, Phase, SelectorContext, SelectorDescriptor, SimpleChange,
    StoreDefinition, StoreInstance,
};
