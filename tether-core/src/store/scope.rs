//! Action and selector scopes.
//!
//! Every action invocation runs with an [`ActionContext`]: its receiver,
//! arguments, the action's scoped container and the concurrency operator
//! for effects dispatched during this invocation. The context of the
//! running action is also kept on a thread-local stack, so the free
//! functions [`dispatch`], [`use_merge`] and friends work from helpers that
//! were not handed the context.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::container::Container;
use crate::error::{Result, StoreError};
use crate::observable::Effect;
use crate::reactive::{ObjectRef, Value};
use crate::scheduler::{DispatchObserver, EffectScheduler, Operator};
use super::instance::StoreInstance;

thread_local! {
    static ACTION_SCOPE: RefCell<Vec<Arc<ActionContext>>> = RefCell::new(Vec::new());
}

/// The running invocation of an action.
pub struct ActionContext {
    instance: StoreInstance,
    name: Arc<str>,
    this: ObjectRef,
    args: Vec<Value>,
    container: Container,
    operator: Mutex<Operator>,
}

impl ActionContext {
    pub(crate) fn new(
        instance: StoreInstance,
        name: Arc<str>,
        this: ObjectRef,
        args: Vec<Value>,
        container: Container,
        operator: Operator,
    ) -> Self {
        Self {
            instance,
            name,
            this,
            args,
            container,
            operator: Mutex::new(operator),
        }
    }

    /// The store state; tracked unless the action opted out.
    pub fn this(&self) -> &ObjectRef {
        &self.this
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, or `Undefined` when it was not passed.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &StoreInstance {
        &self.instance
    }

    /// The action's scoped container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn resolve<T: std::any::Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.container.resolve::<T>()
    }

    pub fn operator(&self) -> Operator {
        *self.operator.lock()
    }

    /// Cancel running effects of this action when the next one starts.
    pub fn use_switch(&self) {
        *self.operator.lock() = Operator::Switch;
    }

    /// Run effects of this action side by side.
    pub fn use_merge(&self) {
        *self.operator.lock() = Operator::Merge;
    }

    /// Run effects of this action one after another.
    pub fn use_concat(&self) {
        *self.operator.lock() = Operator::Concat;
    }

    /// Ignore new effects of this action while one is running.
    pub fn use_exhaust(&self) {
        *self.operator.lock() = Operator::Exhaust;
    }

    fn scheduler(&self) -> Result<Arc<EffectScheduler>> {
        self.container.resolve::<EffectScheduler>()
    }

    /// Queue `effect`; it is subscribed at the next dequeue point.
    pub fn dispatch(&self, effect: Effect) -> Result<()> {
        self.scheduler()?.enqueue(effect, self.operator(), None);
        Ok(())
    }

    /// Queue `effect` with callbacks for its notifications.
    pub fn dispatch_with(&self, effect: Effect, observer: DispatchObserver) -> Result<()> {
        self.scheduler()?.enqueue(effect, self.operator(), Some(observer));
        Ok(())
    }

    /// Queue an effect that first has to be loaded.
    ///
    /// Dequeueing this action's effects is held until `loader` settles. A
    /// loader error goes to the error chain as [`StoreError::Load`].
    pub fn dispatch_async<F>(&self, loader: F) -> Result<()>
    where
        F: Future<Output = Result<Effect>> + Send + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|_| StoreError::NoRuntime(Arc::clone(&self.name)))?;
        let scheduler = self.scheduler()?;
        let gate = scheduler.gate();
        let operator = self.operator();
        let sink = self.instance.error_sink();
        let action = Arc::clone(&self.name);

        handle.spawn(async move {
            match loader.await {
                Ok(effect) => scheduler.enqueue(effect, operator, None),
                Err(error) => sink(StoreError::Load {
                    action,
                    source: Box::new(error),
                }),
            }
            drop(gate);
        });
        Ok(())
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("operator", &self.operator())
            .finish()
    }
}

/// Guard that keeps an action on the scope stack until dropped.
pub(crate) struct ActionScope {
    ctx: Arc<ActionContext>,
}

impl ActionScope {
    pub(crate) fn enter(ctx: Arc<ActionContext>) -> Self {
        ACTION_SCOPE.with(|stack| stack.borrow_mut().push(Arc::clone(&ctx)));
        Self { ctx }
    }
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        ACTION_SCOPE.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(entry) = popped {
                debug_assert!(
                    Arc::ptr_eq(&entry, &self.ctx),
                    "ActionScope mismatch: popped a context that was not pushed by this guard"
                );
            }
        });
    }
}

/// The innermost running action on this thread.
pub fn current_action() -> Option<Arc<ActionContext>> {
    ACTION_SCOPE.with(|stack| stack.borrow().last().cloned())
}

fn with_current<T>(caller: &'static str, f: impl FnOnce(&ActionContext) -> Result<T>) -> Result<T> {
    match current_action() {
        Some(ctx) => f(&ctx),
        None => Err(StoreError::OutsideActionScope(caller)),
    }
}

/// [`ActionContext::dispatch`] on the running action.
pub fn dispatch(effect: Effect) -> Result<()> {
    with_current("dispatch", |ctx| ctx.dispatch(effect))
}

/// [`ActionContext::dispatch_with`] on the running action.
pub fn dispatch_with(effect: Effect, observer: DispatchObserver) -> Result<()> {
    with_current("dispatch_with", |ctx| ctx.dispatch_with(effect, observer))
}

pub fn use_switch() -> Result<()> {
    with_current("use_switch", |ctx| {
        ctx.use_switch();
        Ok(())
    })
}

pub fn use_merge() -> Result<()> {
    with_current("use_merge", |ctx| {
        ctx.use_merge();
        Ok(())
    })
}

pub fn use_concat() -> Result<()> {
    with_current("use_concat", |ctx| {
        ctx.use_concat();
        Ok(())
    })
}

pub fn use_exhaust() -> Result<()> {
    with_current("use_exhaust", |ctx| {
        ctx.use_exhaust();
        Ok(())
    })
}

/// The running computation of a selector.
pub struct SelectorContext {
    instance: StoreInstance,
    name: Arc<str>,
    this: ObjectRef,
    args: Vec<Value>,
}

impl SelectorContext {
    pub(crate) fn new(
        instance: StoreInstance,
        name: Arc<str>,
        this: ObjectRef,
        args: Vec<Value>,
    ) -> Self {
        Self {
            instance,
            name,
            this,
            args,
        }
    }

    /// The tracked store state.
    pub fn this(&self) -> &ObjectRef {
        &self.this
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &StoreInstance {
        &self.instance
    }

    /// Read another selector of the same instance.
    pub fn select(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.instance.select(name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_functions_fail_outside_an_action() {
        assert!(current_action().is_none());
        assert!(matches!(
            dispatch(Effect::empty()),
            Err(StoreError::OutsideActionScope("dispatch"))
        ));
        assert!(matches!(use_merge(), Err(StoreError::OutsideActionScope("use_merge"))));
    }
}
