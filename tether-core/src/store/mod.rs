//! Stores
//!
//! A store is declared once with a [`StoreDefinition`] (actions, selectors,
//! error handlers, lifecycle hooks) and instantiated any number of times
//! over a state object with [`StoreInstance::create`].
//!
//! # Actions
//!
//! An action body gets an [`ActionContext`]. It runs inside a tracking
//! context, so reads of a tracked `this` become the action's dependencies,
//! and inside the action's scoped container, so effects it dispatches land
//! in the action's effect scheduler. Returning `Some(effect)` is the same
//! as dispatching it.
//!
//! # Selectors
//!
//! Selector results are cached per argument tuple together with their own
//! dependency map, and recomputed only when that map is dirty.
//!
//! # Errors
//!
//! Failures go through the definition's `Caught` handlers in declaration
//! order. A handler claims an error by returning `Ok(())` and passes it on
//! by returning `Err`. Errors nobody claims reach the host's root handler.

mod changes;
mod definition;
mod instance;
mod scope;

pub use changes::{InputChanges, SimpleChange};
pub use definition::{
    ActionBody, ActionDescriptor, CaughtDescriptor, CaughtHandler, Phase, SelectorBody,
    SelectorDescriptor, StoreDefinition, StoreDefinitionBuilder,
};
pub use instance::{StoreInstance, CHANGES_EVENT};
pub use scope::{
    current_action, dispatch, dispatch_with, use_concat, use_exhaust, use_merge, use_switch,
    ActionContext, SelectorContext,
};
