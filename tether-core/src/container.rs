//! Scoped Containers
//!
//! A [`Container`] is a hierarchical resource-resolution scope. Each scope
//! holds a set of [`Provider`]s keyed by type; resolving a type walks up the
//! parent chain to the nearest scope that provides it and returns that
//! scope's singleton instance, creating it on first use.
//!
//! The host owns the application scope, every store instance gets a root
//! scope under it, and every action of that instance gets a child scope
//! under the root. Destroying a scope destroys all of its children first,
//! then tears down its own instances in reverse creation order.

use std::any::{type_name, Any, TypeId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Result<Instance> + Send + Sync>;
type Teardown = Arc<dyn Fn(&Instance) + Send + Sync>;

/// A factory binding for one type.
#[derive(Clone)]
pub struct Provider {
    type_id: TypeId,
    name: &'static str,
    factory: Factory,
    teardown: Option<Teardown>,
}

impl Provider {
    /// Bind `T` to a factory that runs at most once per scope.
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            factory: Arc::new(move |scope| factory(scope).map(|value| Arc::new(value) as Instance)),
            teardown: None,
        }
    }

    /// Bind `T` to an existing shared instance.
    pub fn shared<T>(value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            factory: Arc::new(move |_| Ok(Arc::clone(&value) as Instance)),
            teardown: None,
        }
    }

    /// Bind `T` to a value.
    pub fn value<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::shared(Arc::new(value))
    }

    /// Run `teardown` on the instance when its scope is destroyed.
    pub fn on_destroy<T, F>(mut self, teardown: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        debug_assert_eq!(self.type_id, TypeId::of::<T>(), "teardown type mismatch");
        self.teardown = Some(Arc::new(move |instance: &Instance| {
            if let Some(value) = instance.downcast_ref::<T>() {
                teardown(value);
            }
        }));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("type", &self.name).finish()
    }
}

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct ContainerInner {
    id: ScopeId,
    name: Arc<str>,
    parent: Option<Container>,
    providers: IndexMap<TypeId, Provider>,
    instances: Mutex<IndexMap<TypeId, Instance>>,
    children: Mutex<Vec<Weak<ContainerInner>>>,
    destroyed: AtomicBool,
}

/// Handle to a resolution scope. Cloning shares the scope.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create a scope with no parent.
    pub fn root(name: impl Into<Arc<str>>, providers: impl IntoIterator<Item = Provider>) -> Self {
        Self::with_parent(name.into(), None, providers)
    }

    fn with_parent(
        name: Arc<str>,
        parent: Option<Container>,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.type_id, provider))
            .collect();
        Self {
            inner: Arc::new(ContainerInner {
                id: ScopeId::new(),
                name,
                parent,
                providers,
                instances: Mutex::new(IndexMap::new()),
                children: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a child scope nested under this one.
    pub fn child(
        &self,
        name: impl Into<Arc<str>>,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Container {
        let child = Self::with_parent(name.into(), Some(self.clone()), providers);
        let mut children = self.inner.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Whether this scope or one of its ancestors provides `T`.
    pub fn provides<T: Any + Send + Sync>(&self) -> bool {
        self.inner.providers.contains_key(&TypeId::of::<T>())
            || self.parent().is_some_and(Container::provides::<T>)
    }

    /// Resolve the singleton `T` from the nearest scope that provides it.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        if self.is_destroyed() {
            return Err(StoreError::ScopeDestroyed(Arc::clone(&self.inner.name)));
        }

        let type_id = TypeId::of::<T>();
        let Some(provider) = self.inner.providers.get(&type_id) else {
            return match self.parent() {
                Some(parent) => parent.resolve::<T>(),
                None => Err(StoreError::NoProvider(type_name::<T>())),
            };
        };

        if let Some(existing) = self.inner.instances.lock().get(&type_id).cloned() {
            return downcast::<T>(existing);
        }

        // The factory may resolve other types, so no lock is held here.
        let created = (provider.factory)(self)?;
        let instance = {
            let mut instances = self.inner.instances.lock();
            Arc::clone(instances.entry(type_id).or_insert(created))
        };
        downcast::<T>(instance)
    }

    /// Destroy this scope and every scope below it.
    ///
    /// Children go first; this scope's instances are then torn down in
    /// reverse creation order. Destroying twice is a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            Container { inner: child }.destroy();
        }

        let instances = std::mem::take(&mut *self.inner.instances.lock());
        for (type_id, instance) in instances.iter().rev() {
            if let Some(teardown) = self
                .inner
                .providers
                .get(type_id)
                .and_then(|provider| provider.teardown.as_ref())
            {
                teardown(instance);
            }
        }

        tracing::debug!(scope = %self.inner.name, instances = instances.len(), "scope destroyed");
    }
}

fn downcast<T: Any + Send + Sync>(instance: Instance) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| StoreError::NoProvider(type_name::<T>()))
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("providers", &self.inner.providers.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
