//! Store Instances
//!
//! A [`StoreInstance`] is one live store: a state object plus everything the
//! runtime attaches to it (scopes, dependency maps, selector caches).
//!
//! # How Checking Works
//!
//! The host drives three check phases per update cycle. For each phase:
//!
//! 1. Every action of the phase is considered. An action with a dependency
//!    map from an earlier run is re-run if it is tracked and the map is
//!    dirty. An action without one is run if it is immediate and takes no
//!    arguments.
//! 2. Every action that has a scope dequeues its pending effects.
//! 3. Buffered events are flushed to the bus.
//! 4. The user's hook for the phase runs.
//!
//! Actions never subscribe their effects themselves; effects only start in
//! step 2, after all of the phase's actions have run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Notify;

use crate::container::{Container, Provider};
use crate::error::{Result, StoreError};
use crate::host::Host;
use crate::meta::{clear_meta, get_meta, registry, set_meta, set_meta_arc, Namespace};
use crate::observable::{FnObservable, Observable, Observer};
use crate::reactive::{
    cache_key, Change, DependencyMap, ObjectId, ObjectRef, TrackingContext, Value,
};
use crate::scheduler::{
    EffectScheduler, ErrorSink, EventBus, EventPayload, EventRecord, EventScheduler, EventSequence,
    EventType,
};
use super::changes::InputChanges;
use super::definition::{ActionDescriptor, Phase, StoreDefinition};
use super::scope::{ActionContext, ActionScope, SelectorContext};

/// Name of the dispatch event scheduled for input changes.
pub const CHANGES_EVENT: &str = "onChanges";

/// Cached result of one selector for one argument tuple.
struct SelectorCache {
    value: Value,
    deps: Arc<DependencyMap>,
}

struct InstanceInner {
    id: ObjectId,
    definition: StoreDefinition,
    state: ObjectRef,
    host: Host,
    root: Container,
    events: Arc<EventScheduler>,
    check: Arc<Notify>,
    destroyed: AtomicBool,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::SeqCst) {
            self.root.destroy();
            clear_meta(self.id);
        }
    }
}

/// Handle to a live store. Cloning shares the instance.
#[derive(Clone)]
pub struct StoreInstance {
    inner: Arc<InstanceInner>,
}

impl StoreInstance {
    /// Create an instance of `definition` over `state`.
    pub fn create(definition: &StoreDefinition, host: &Host, state: ObjectRef) -> Result<Self> {
        let id = ObjectId::new();
        let root = host.container().child(
            format!("{}{}", definition.name(), id),
            [Provider::factory(move |scope: &Container| {
                Ok(EventScheduler::new(
                    id,
                    scope.resolve::<EventBus>()?,
                    scope.resolve::<EventSequence>()?,
                ))
            })],
        );
        let events = root.resolve::<EventScheduler>()?;
        set_meta(Namespace::Container, root.clone(), id, None);

        tracing::debug!(store = %definition.name(), instance = %id, "store instance created");
        Ok(Self {
            inner: Arc::new(InstanceInner {
                id,
                definition: definition.clone(),
                state: state.unwrap(),
                host: host.clone(),
                root,
                events,
                check: Arc::new(Notify::new()),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn definition(&self) -> &StoreDefinition {
        &self.inner.definition
    }

    /// The untracked state object.
    pub fn state(&self) -> &ObjectRef {
        &self.inner.state
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    /// The instance's root scope.
    pub fn container(&self) -> &Container {
        &self.inner.root
    }

    pub fn event_scheduler(&self) -> &Arc<EventScheduler> {
        &self.inner.events
    }

    /// Whether the instance was destroyed, directly or by destroying the
    /// host scope it lives in.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst) || self.inner.root.is_destroyed()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            tracing::warn!(
                store = %self.inner.definition.name(),
                instance = %self.inner.id,
                "store used after destroy"
            );
            return Err(StoreError::Destroyed(self.inner.id));
        }
        Ok(())
    }

    // ---- Actions ----

    /// Invoke the action `name` with `args`.
    ///
    /// Errors returned by the action body go through the error chain first;
    /// only an error no handler claims is reported to the host and returned.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.ensure_alive()?;
        let descriptor = self
            .inner
            .definition
            .action(name)
            .ok_or_else(|| StoreError::UnknownAction {
                store: self.inner.definition.name_arc(),
                name: name.to_string(),
            })?;
        self.run_action(&descriptor, args)
    }

    fn run_action(&self, descriptor: &ActionDescriptor, args: Vec<Value>) -> Result<()> {
        let id = self.inner.id;
        let name: Arc<str> = Arc::from(descriptor.key());
        tracing::debug!(instance = %id, action = %name, args = args.len(), "action invoked");

        self.inner
            .events
            .schedule(EventType::Dispatch, &name, EventPayload::Args(args.clone()));

        let container = self.action_container(&name)?;
        let deps = Arc::new(DependencyMap::new());
        let this = if descriptor.is_tracked() {
            self.inner.state.wrap()
        } else {
            self.inner.state.clone()
        };
        let ctx = Arc::new(ActionContext::new(
            self.clone(),
            Arc::clone(&name),
            this,
            args.clone(),
            container.clone(),
            self.inner.host.config().default_operator,
        ));

        let outcome = {
            let _scope = ActionScope::enter(Arc::clone(&ctx));
            let _tracking = TrackingContext::enter(Arc::clone(&deps));
            descriptor.call(&ctx)
        };
        // Arguments and dependencies are stored together, after the body, so
        // a re-entrant call leaves the pair of whichever call finished last.
        set_meta(Namespace::Arguments, args, id, Some(&*name));
        set_meta_arc(Namespace::Dependencies, deps, id, Some(&*name));

        let outcome = outcome.and_then(|effect| {
            if let Some(effect) = effect {
                container
                    .resolve::<EffectScheduler>()?
                    .enqueue(effect, ctx.operator(), None);
            }
            Ok(())
        });
        outcome.or_else(|error| {
            self.route_error(error).map_err(|unhandled| {
                self.inner.host.report_error(&unhandled);
                unhandled
            })
        })
    }

    /// The action's child scope, created on first use.
    fn action_container(&self, name: &Arc<str>) -> Result<Container> {
        let id = self.inner.id;
        if let Some(existing) = get_meta::<Container>(Namespace::Container, id, Some(&**name)) {
            return Ok((*existing).clone());
        }

        let events = Arc::clone(&self.inner.events);
        let check = Arc::clone(&self.inner.check);
        let sink = self.error_sink();
        let action = Arc::clone(name);
        let container = self.inner.root.child(
            format!("{}.{}", self.inner.root.name(), name),
            [Provider::factory(move |_: &Container| {
                Ok(EffectScheduler::new(
                    Arc::clone(&action),
                    Arc::clone(&events),
                    Arc::clone(&sink),
                    Arc::clone(&check),
                ))
            })
            .on_destroy(|scheduler: &EffectScheduler| scheduler.disconnect())],
        );
        set_meta(Namespace::Container, container.clone(), id, Some(&**name));
        Ok(container)
    }

    fn scheduler(&self, action: &str) -> Option<Arc<EffectScheduler>> {
        let container = get_meta::<Container>(Namespace::Container, self.inner.id, Some(action))?;
        container.resolve::<EffectScheduler>().ok()
    }

    // ---- Errors ----

    /// Offer `error` to the `Caught` handlers in declaration order. Returns
    /// the error if no handler claims it.
    fn route_error(&self, error: StoreError) -> std::result::Result<(), StoreError> {
        let mut current = error;
        for handler in self.inner.definition.handlers() {
            match handler.handle(self, &current) {
                Ok(()) => {
                    tracing::debug!(
                        instance = %self.inner.id,
                        handler = handler.key(),
                        "error handled"
                    );
                    return Ok(());
                }
                Err(rethrown) => current = rethrown,
            }
        }
        Err(current)
    }

    /// Error route for failures that happen outside an action call:
    /// effect errors, observer callbacks, effect loading.
    pub(crate) fn error_sink(&self) -> ErrorSink {
        let weak: Weak<InstanceInner> = Arc::downgrade(&self.inner);
        Arc::new(move |error: StoreError| {
            if let Some(inner) = weak.upgrade() {
                let instance = StoreInstance { inner };
                if let Err(unhandled) = instance.route_error(error) {
                    instance.inner.host.report_error(&unhandled);
                }
            }
        })
    }

    // ---- Check phases ----

    pub fn do_check(&self) -> Result<()> {
        self.run_phase(Phase::DoCheck)
    }

    pub fn after_content_checked(&self) -> Result<()> {
        self.run_phase(Phase::AfterContentChecked)
    }

    pub fn after_view_checked(&self) -> Result<()> {
        self.run_phase(Phase::AfterViewChecked)
    }

    /// Run all three check phases in order.
    pub fn detect_changes(&self) -> Result<()> {
        self.do_check()?;
        self.after_content_checked()?;
        self.after_view_checked()
    }

    /// The phase always completes; the first error a re-run action did not
    /// get handled is returned at the end.
    fn run_phase(&self, phase: Phase) -> Result<()> {
        self.ensure_alive()?;
        let id = self.inner.id;
        let actions = self.inner.definition.actions();
        let mut first_error = None;

        for descriptor in actions.iter().filter(|action| action.check_phase() == phase) {
            let name = descriptor.key();
            let due = match get_meta::<DependencyMap>(Namespace::Dependencies, id, Some(name)) {
                Some(deps) => descriptor.is_tracked() && deps.is_dirty(),
                None => descriptor.is_immediate() && descriptor.required_args() == 0,
            };
            if !due {
                continue;
            }
            let args = get_meta::<Vec<Value>>(Namespace::Arguments, id, Some(name))
                .map(|args| args.as_ref().clone())
                .unwrap_or_default();
            if let Err(error) = self.run_action(descriptor, args) {
                first_error.get_or_insert(error);
            }
        }

        let mut started = 0;
        for descriptor in &actions {
            if let Some(scheduler) = self.scheduler(descriptor.key()) {
                started += scheduler.dequeue();
            }
        }
        let flushed = self.inner.events.flush();
        tracing::debug!(
            instance = %id,
            ?phase,
            effects = started,
            events = flushed,
            "check phase finished"
        );

        if let Some(hook) = self.inner.definition.hooks().for_phase(phase) {
            hook(self);
        }
        first_error.map_or(Ok(()), Err)
    }

    // ---- Selectors ----

    /// Read selector `name` for `args`, recomputing only when the
    /// dependencies of the cached value changed.
    ///
    /// A cached value read inside another tracked computation replays its
    /// dependencies into that computation.
    pub fn select(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_alive()?;
        let id = self.inner.id;
        let descriptor = self
            .inner
            .definition
            .selector(name)
            .ok_or_else(|| StoreError::UnknownSelector {
                store: self.inner.definition.name_arc(),
                name: name.to_string(),
            })?;

        let key = format!("{name}:{}", cache_key(&args));
        if let Some(cached) =
            get_meta::<SelectorCache>(Namespace::SelectorCache, id, Some(key.as_str()))
        {
            if !cached.deps.is_dirty() {
                cached.deps.replay();
                return Ok(cached.value.clone());
            }
        }

        tracing::debug!(instance = %id, selector = name, "selector recomputed");
        let deps = Arc::new(DependencyMap::new());
        let ctx =
            SelectorContext::new(self.clone(), Arc::from(name), self.inner.state.wrap(), args);
        let computed = {
            let _tracking = TrackingContext::enter(Arc::clone(&deps));
            descriptor.call(&ctx)
        };
        match computed {
            Ok(value) => {
                set_meta(
                    Namespace::SelectorCache,
                    SelectorCache {
                        value: value.clone(),
                        deps,
                    },
                    id,
                    Some(key.as_str()),
                );
                Ok(value)
            }
            Err(error) => {
                registry().delete(Namespace::SelectorCache, id, Some(key.as_str()));
                Err(error)
            }
        }
    }

    // ---- Host hooks ----

    /// Apply input changes to the state, record them, then run the user
    /// hook.
    pub fn on_changes(&self, changes: InputChanges) -> Result<()> {
        self.ensure_alive()?;
        for (name, change) in changes.iter() {
            self.inner.state.set(name, change.current.clone());
        }
        self.inner
            .events
            .schedule(EventType::Dispatch, CHANGES_EVENT, EventPayload::Changes(changes.clone()));
        if let Some(hook) = &self.inner.definition.hooks().on_changes {
            hook(self, &changes);
        }
        Ok(())
    }

    /// Destroy every scope of the instance, drop its metadata, then run the
    /// user hook. Destroying twice is a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.root.destroy();
        clear_meta(self.inner.id);
        tracing::debug!(
            store = %self.inner.definition.name(),
            instance = %self.inner.id,
            "store instance destroyed"
        );

        if let Some(hook) = &self.inner.definition.hooks().on_destroy {
            hook(self);
        }
    }

    // ---- Observation ----

    /// Events scheduled by this instance, as they are flushed.
    pub fn events(&self) -> impl Observable<Arc<EventRecord>> {
        self.inner.host.event_bus().events_for(self.inner.id)
    }

    /// Emits the instance each time a flush published some of its events.
    pub fn from_store(&self) -> impl Observable<StoreInstance> {
        let flushed = self.inner.host.event_bus().flushed().clone();
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.id;
        FnObservable(move |observer: Observer<StoreInstance>| {
            let weak = weak.clone();
            let (on_next, on_error) = (observer.clone(), observer.clone());
            flushed.subscribe(Observer::new(
                move |context: ObjectId| {
                    if context != id {
                        return;
                    }
                    if let Some(inner) = weak.upgrade() {
                        on_next.next(StoreInstance { inner });
                    }
                },
                move |error| on_error.error(error),
                move || observer.complete(),
            ))
        })
    }

    /// Resolves once an effect notification asks for a new check cycle.
    pub async fn check_requested(&self) {
        self.inner.check.notified().await;
    }

    // ---- Inspection ----

    /// Dependency map of the last run of `action`.
    pub fn dependencies(&self, action: &str) -> Option<Arc<DependencyMap>> {
        get_meta(Namespace::Dependencies, self.inner.id, Some(action))
    }

    /// Writes made during the last run of `action`, with their previous
    /// values.
    pub fn changes(&self, action: &str) -> Vec<Change> {
        self.dependencies(action)
            .map(|deps| deps.changes())
            .unwrap_or_default()
    }

    /// Arguments of the last run of `action`.
    pub fn arguments(&self, action: &str) -> Option<Vec<Value>> {
        get_meta::<Vec<Value>>(Namespace::Arguments, self.inner.id, Some(action))
            .map(|args| args.as_ref().clone())
    }

    /// Effect scheduler of `action`, if the action has run.
    pub fn effect_scheduler(&self, action: &str) -> Option<Arc<EffectScheduler>> {
        self.scheduler(action)
    }

    /// JSON snapshot of the state.
    pub fn snapshot(&self) -> serde_json::Value {
        self.inner.state.snapshot(self.inner.host.config().snapshot_depth)
    }
}

impl std::fmt::Debug for StoreInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInstance")
            .field("id", &self.inner.id)
            .field("store", &self.inner.definition.name())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::Effect;
    use crate::scheduler::EventLog;
    use crate::store::SimpleChange;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn counter(
        runs: &Arc<AtomicUsize>,
    ) -> impl Fn(&ActionContext) -> Result<Option<Effect>> + Send + Sync + 'static {
        let runs = Arc::clone(runs);
        move |ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            ctx.this().get("count");
            Ok(None)
        }
    }

    #[test]
    fn unknown_members_are_errors() {
        let definition = StoreDefinition::builder("empty").build();
        let store = StoreInstance::create(&definition, &Host::new(), ObjectRef::new())
            .expect("create");

        assert!(matches!(store.invoke("nope", vec![]), Err(StoreError::UnknownAction { .. })));
        assert!(matches!(store.select("nope", vec![]), Err(StoreError::UnknownSelector { .. })));
    }

    #[test]
    fn re_runs_use_the_last_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let definition = StoreDefinition::builder("args")
            .action(
                ActionDescriptor::invoke("scale", move |ctx| {
                    let count = ctx.this().get("count").as_int().unwrap_or_default();
                    let factor = ctx.arg(0).as_int().unwrap_or_default();
                    s.lock().push(count * factor);
                    Ok(None)
                })
                .arity(1),
            )
            .build();
        let state = ObjectRef::from_pairs([("count", 1)]);
        let store = StoreInstance::create(&definition, &Host::new(), state.clone())
            .expect("create");

        store.do_check().expect("check");
        assert!(seen.lock().is_empty());

        store.invoke("scale", vec![Value::from(3)]).expect("invoke");
        state.set("count", 2);
        store.do_check().expect("check");

        assert_eq!(*seen.lock(), vec![3, 6]);
        assert_eq!(store.arguments("scale"), Some(vec![Value::from(3)]));
    }

    #[test]
    fn phases_only_check_their_own_actions() {
        let (early, late) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let definition = StoreDefinition::builder("phases")
            .action(ActionDescriptor::invoke("early", counter(&early)))
            .action(ActionDescriptor::layout("late", counter(&late)))
            .build();
        let store = StoreInstance::create(
            &definition,
            &Host::new(),
            ObjectRef::from_pairs([("count", 0)]),
        )
        .expect("create");

        store.do_check().expect("check");
        assert_eq!((early.load(Ordering::SeqCst), late.load(Ordering::SeqCst)), (1, 0));

        store.after_view_checked().expect("check");
        assert_eq!((early.load(Ordering::SeqCst), late.load(Ordering::SeqCst)), (1, 1));
    }

    #[test]
    fn writes_land_in_the_change_ledger() {
        let definition = StoreDefinition::builder("ledger")
            .action(ActionDescriptor::action("bump", |ctx| {
                let count = ctx.this().get("count").as_int().unwrap_or_default();
                ctx.this().set("count", count + 1);
                ctx.this().set("count", count + 2);
                Ok(None)
            }).track(true))
            .build();
        let store = StoreInstance::create(
            &definition,
            &Host::new(),
            ObjectRef::from_pairs([("count", 5)]),
        )
        .expect("create");

        store.invoke("bump", vec![]).expect("invoke");

        let changes = store.changes("bump");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous, Value::from(5));
        assert_eq!(changes[0].current(), Value::from(7));
        // the write updated the recorded value, so the action is not dirty
        assert_eq!(store.dependencies("bump").map(|deps| deps.is_dirty()), Some(false));
    }

    #[test]
    fn on_changes_applies_inputs_and_records_a_dispatch() {
        let hooked = Arc::new(AtomicUsize::new(0));
        let h = hooked.clone();
        let definition = StoreDefinition::builder("inputs")
            .on_changes(move |store, changes| {
                assert_eq!(store.state().get("page"), Value::from(2));
                h.fetch_add(changes.len(), Ordering::SeqCst);
            })
            .build();
        let host = Host::new();
        let log = EventLog::record(host.event_bus());
        let store = StoreInstance::create(&definition, &host, ObjectRef::new()).expect("create");

        store
            .on_changes(InputChanges::new().with("page", SimpleChange::new(1, 2, false)))
            .expect("changes");
        store.event_scheduler().flush();

        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert_eq!(log.summary(), vec![(EventType::Dispatch, CHANGES_EVENT.to_string())]);
    }

    #[test]
    fn destroyed_instances_refuse_work() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let d = destroyed.clone();
        let definition = StoreDefinition::builder("gone")
            .action(ActionDescriptor::action("noop", |_| Ok(None)))
            .on_destroy(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let store = StoreInstance::create(&definition, &Host::new(), ObjectRef::new())
            .expect("create");
        store.invoke("noop", vec![]).expect("invoke");

        store.destroy();
        store.destroy();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(store.container().is_destroyed());
        assert!(store.dependencies("noop").is_none());
        assert!(matches!(store.invoke("noop", vec![]), Err(StoreError::Destroyed(_))));
        assert!(matches!(store.do_check(), Err(StoreError::Destroyed(_))));
    }
}
