//! Dependency Tracking
//!
//! This module implements fine-grained dependency tracking over plain
//! objects: which properties a computation read, and whether any of them
//! changed since.
//!
//! # Concepts
//!
//! ## Tracked objects
//!
//! An [`ObjectRef`] is an identity-keyed key/value object. Reading through a
//! tracked handle ([`ObjectRef::wrap`]) while a tracking context is active
//! records the read; reading through an untracked handle never does.
//!
//! ## Dependency maps
//!
//! A [`DependencyMap`] records `(object, key) -> value` for one invocation,
//! together with the property's write version. Dirty checking compares both
//! against the live object, values with identity/primitive equality.
//!
//! # Implementation Notes
//!
//! Tracking uses an explicit read-through accessor and a thread-local stack
//! of active maps rather than transparent property interception. Every
//! changing write bumps the property's version, so a property that is
//! changed and then changed back before the next check is still one change.

mod context;
mod deps;
mod object;
mod value;

pub use context::TrackingContext;
pub use deps::{Change, DependencyMap};
pub use object::{ObjectId, ObjectRef};
pub use value::{cache_key, Method, Value, DEFAULT_SNAPSHOT_DEPTH};
