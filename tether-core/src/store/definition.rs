//! Store definitions.
//!
//! A [`StoreDefinition`] declares the actions, selectors, error handlers and
//! lifecycle hooks of one kind of store. Descriptors are written into the
//! metadata registry against the definition's handle when the definition is
//! built, and read back from there by every instance.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::meta::{clear_meta, get_meta, get_meta_values, set_meta, Namespace};
use crate::observable::Effect;
use crate::reactive::{ObjectId, Value};
use super::changes::InputChanges;
use super::instance::StoreInstance;
use super::scope::{ActionContext, SelectorContext};

/// The check hook an action is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    DoCheck,
    AfterContentChecked,
    AfterViewChecked,
}

pub type ActionBody = Arc<dyn Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync>;
pub type SelectorBody = Arc<dyn Fn(&SelectorContext) -> Result<Value> + Send + Sync>;
pub type CaughtHandler = Arc<dyn Fn(&StoreInstance, &StoreError) -> Result<()> + Send + Sync>;

type Hook = Arc<dyn Fn(&StoreInstance) + Send + Sync>;
type ChangesHook = Arc<dyn Fn(&StoreInstance, &InputChanges) + Send + Sync>;

/// How an action is run and when it is re-run.
///
/// The four presets differ only in phase and defaults:
///
/// | preset   | phase               | track | immediate |
/// |----------|---------------------|-------|-----------|
/// | `action` | DoCheck             | no    | no        |
/// | `invoke` | DoCheck             | yes   | yes       |
/// | `before` | AfterContentChecked | yes   | yes       |
/// | `layout` | AfterViewChecked    | yes   | yes       |
#[derive(Clone)]
pub struct ActionDescriptor {
    key: Arc<str>,
    phase: Phase,
    track: bool,
    immediate: bool,
    arity: usize,
    body: ActionBody,
}

impl ActionDescriptor {
    fn preset<F>(key: &str, phase: Phase, reactive: bool, body: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static,
    {
        Self {
            key: Arc::from(key),
            phase,
            track: reactive,
            immediate: reactive,
            arity: 0,
            body: Arc::new(body),
        }
    }

    /// A plain action: runs only when invoked.
    pub fn action<F>(key: &str, body: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static,
    {
        Self::preset(key, Phase::DoCheck, false, body)
    }

    /// A reactive action checked in `DoCheck`.
    pub fn invoke<F>(key: &str, body: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static,
    {
        Self::preset(key, Phase::DoCheck, true, body)
    }

    /// A reactive action checked in `AfterContentChecked`.
    pub fn before<F>(key: &str, body: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static,
    {
        Self::preset(key, Phase::AfterContentChecked, true, body)
    }

    /// A reactive action checked in `AfterViewChecked`.
    pub fn layout<F>(key: &str, body: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static,
    {
        Self::preset(key, Phase::AfterViewChecked, true, body)
    }

    /// Whether the state is tracked, and so whether changes re-run the action.
    pub fn track(mut self, track: bool) -> Self {
        self.track = track;
        self
    }

    /// Whether the first check runs the action (zero-arity actions only).
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Number of required arguments.
    pub fn arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn check_phase(&self) -> Phase {
        self.phase
    }

    pub fn is_tracked(&self) -> bool {
        self.track
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn required_args(&self) -> usize {
        self.arity
    }

    pub(crate) fn call(&self, ctx: &ActionContext) -> Result<Option<Effect>> {
        (self.body)(ctx)
    }
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("key", &self.key)
            .field("phase", &self.phase)
            .field("track", &self.track)
            .field("immediate", &self.immediate)
            .field("arity", &self.arity)
            .finish()
    }
}

/// A memoized derived value.
#[derive(Clone)]
pub struct SelectorDescriptor {
    key: Arc<str>,
    body: SelectorBody,
}

impl SelectorDescriptor {
    pub fn new<F>(key: &str, body: F) -> Self
    where
        F: Fn(&SelectorContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            key: Arc::from(key),
            body: Arc::new(body),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn call(&self, ctx: &SelectorContext) -> Result<Value> {
        (self.body)(ctx)
    }
}

impl std::fmt::Debug for SelectorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorDescriptor").field("key", &self.key).finish()
    }
}

/// An error handler. Returning `Ok` claims the error; returning `Err`
/// passes that error on to the next handler.
#[derive(Clone)]
pub struct CaughtDescriptor {
    key: Arc<str>,
    handler: CaughtHandler,
}

impl CaughtDescriptor {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn handle(&self, instance: &StoreInstance, error: &StoreError) -> Result<()> {
        (self.handler)(instance, error)
    }
}

#[derive(Clone, Default)]
pub(crate) struct LifecycleHooks {
    pub(crate) do_check: Option<Hook>,
    pub(crate) after_content_checked: Option<Hook>,
    pub(crate) after_view_checked: Option<Hook>,
    pub(crate) on_changes: Option<ChangesHook>,
    pub(crate) on_destroy: Option<Hook>,
}

impl LifecycleHooks {
    pub(crate) fn for_phase(&self, phase: Phase) -> Option<&Hook> {
        match phase {
            Phase::DoCheck => self.do_check.as_ref(),
            Phase::AfterContentChecked => self.after_content_checked.as_ref(),
            Phase::AfterViewChecked => self.after_view_checked.as_ref(),
        }
    }
}

struct DefinitionInner {
    id: ObjectId,
    name: Arc<str>,
    hooks: LifecycleHooks,
}

impl Drop for DefinitionInner {
    fn drop(&mut self) {
        clear_meta(self.id);
    }
}

/// A declared kind of store. Cloning shares the definition.
#[derive(Clone)]
pub struct StoreDefinition {
    inner: Arc<DefinitionInner>,
}

impl StoreDefinition {
    pub fn builder(name: &str) -> StoreDefinitionBuilder {
        StoreDefinitionBuilder {
            name: Arc::from(name),
            actions: Vec::new(),
            selectors: Vec::new(),
            caught: Vec::new(),
            hooks: LifecycleHooks::default(),
        }
    }

    /// Handle the descriptors are registered under.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.inner.name)
    }

    pub fn action(&self, name: &str) -> Option<Arc<ActionDescriptor>> {
        get_meta(Namespace::Action, self.inner.id, Some(name))
    }

    /// Every action, in declaration order.
    pub fn actions(&self) -> Vec<Arc<ActionDescriptor>> {
        get_meta_values(Namespace::Action, self.inner.id)
    }

    pub fn selector(&self, name: &str) -> Option<Arc<SelectorDescriptor>> {
        get_meta(Namespace::Selector, self.inner.id, Some(name))
    }

    /// Error handlers, in declaration order.
    pub fn handlers(&self) -> Vec<Arc<CaughtDescriptor>> {
        get_meta_values(Namespace::Caught, self.inner.id)
    }

    pub(crate) fn hooks(&self) -> &LifecycleHooks {
        &self.inner.hooks
    }
}

impl std::fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Collects declarations; see [`StoreDefinition::builder`].
pub struct StoreDefinitionBuilder {
    name: Arc<str>,
    actions: Vec<ActionDescriptor>,
    selectors: Vec<SelectorDescriptor>,
    caught: Vec<CaughtDescriptor>,
    hooks: LifecycleHooks,
}

impl StoreDefinitionBuilder {
    pub fn action(mut self, descriptor: ActionDescriptor) -> Self {
        self.actions.push(descriptor);
        self
    }

    pub fn select(mut self, descriptor: SelectorDescriptor) -> Self {
        self.selectors.push(descriptor);
        self
    }

    /// Shorthand for `select(SelectorDescriptor::new(key, body))`.
    pub fn selector<F>(self, key: &str, body: F) -> Self
    where
        F: Fn(&SelectorContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.select(SelectorDescriptor::new(key, body))
    }

    pub fn caught<F>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(&StoreInstance, &StoreError) -> Result<()> + Send + Sync + 'static,
    {
        self.caught.push(CaughtDescriptor {
            key: Arc::from(key),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn on_do_check<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreInstance) + Send + Sync + 'static,
    {
        self.hooks.do_check = Some(Arc::new(hook));
        self
    }

    pub fn on_after_content_checked<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreInstance) + Send + Sync + 'static,
    {
        self.hooks.after_content_checked = Some(Arc::new(hook));
        self
    }

    pub fn on_after_view_checked<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreInstance) + Send + Sync + 'static,
    {
        self.hooks.after_view_checked = Some(Arc::new(hook));
        self
    }

    pub fn on_changes<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreInstance, &InputChanges) + Send + Sync + 'static,
    {
        self.hooks.on_changes = Some(Arc::new(hook));
        self
    }

    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreInstance) + Send + Sync + 'static,
    {
        self.hooks.on_destroy = Some(Arc::new(hook));
        self
    }

    /// Register every declaration and produce the definition.
    pub fn build(self) -> StoreDefinition {
        let id = ObjectId::new();
        for descriptor in self.actions {
            let key = Arc::clone(&descriptor.key);
            set_meta(Namespace::Action, descriptor, id, Some(&*key));
        }
        for descriptor in self.selectors {
            let key = Arc::clone(&descriptor.key);
            set_meta(Namespace::Selector, descriptor, id, Some(&*key));
        }
        for descriptor in self.caught {
            let key = Arc::clone(&descriptor.key);
            set_meta(Namespace::Caught, descriptor, id, Some(&*key));
        }
        tracing::debug!(store = %self.name, definition = %id, "store defined");

        StoreDefinition {
            inner: Arc::new(DefinitionInner {
                id,
                name: self.name,
                hooks: self.hooks,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::registry;

    #[test]
    fn presets_pick_phase_and_defaults() {
        let noop = |_: &ActionContext| Ok(None);
        let action = ActionDescriptor::action("a", noop);
        let invoke = ActionDescriptor::invoke("b", noop);
        let before = ActionDescriptor::before("c", noop);
        let layout = ActionDescriptor::layout("d", noop).track(false).arity(1);

        assert_eq!(action.check_phase(), Phase::DoCheck);
        assert!(!action.is_tracked() && !action.is_immediate());
        assert!(invoke.is_tracked() && invoke.is_immediate());
        assert_eq!(before.check_phase(), Phase::AfterContentChecked);
        assert_eq!(layout.check_phase(), Phase::AfterViewChecked);
        assert!(!layout.is_tracked());
        assert_eq!(layout.required_args(), 1);
    }

    #[test]
    fn descriptors_live_in_the_registry() {
        let definition = StoreDefinition::builder("todos")
            .action(ActionDescriptor::action("load", |_| Ok(None)))
            .action(ActionDescriptor::invoke("sync", |_| Ok(None)))
            .selector("count", |_| Ok(Value::from(0)))
            .caught("first", |_, _| Ok(()))
            .caught("second", |_, _| Ok(()))
            .build();

        let actions: Vec<String> =
            definition.actions().iter().map(|a| a.key().to_string()).collect();
        assert_eq!(actions, vec!["load", "sync"]);
        assert!(definition.selector("count").is_some());
        assert!(definition.action("missing").is_none());

        let handlers: Vec<String> =
            definition.handlers().iter().map(|h| h.key().to_string()).collect();
        assert_eq!(handlers, vec!["first", "second"]);
    }

    #[test]
    fn dropping_the_definition_clears_its_metadata() {
        let definition = StoreDefinition::builder("temp")
            .action(ActionDescriptor::action("load", |_| Ok(None)))
            .build();
        let id = definition.id();
        assert!(registry().contains(Namespace::Action, id, Some("load")));

        drop(definition);
        assert!(!registry().contains(Namespace::Action, id, Some("load")));
    }
}
