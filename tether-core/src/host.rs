//! The application host.
//!
//! A [`Host`] owns what every store of an application shares: the event
//! bus, the event id sequence, the application scope and the root error
//! handler.

use std::sync::Arc;

use crate::config::HostConfig;
use crate::container::{Container, Provider};
use crate::error::{ErrorHandler, LogErrorHandler, StoreError};
use crate::scheduler::{EventBus, EventSequence};

struct HostInner {
    config: HostConfig,
    bus: Arc<EventBus>,
    sequence: Arc<EventSequence>,
    container: Container,
    errors: Arc<dyn ErrorHandler>,
}

/// Shared application context. Cloning shares the host.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self::from_parts(config, Arc::new(LogErrorHandler))
    }

    pub fn with_error_handler(errors: Arc<dyn ErrorHandler>) -> Self {
        Self::from_parts(HostConfig::default(), errors)
    }

    pub fn from_parts(config: HostConfig, errors: Arc<dyn ErrorHandler>) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus_capacity));
        let sequence = Arc::new(EventSequence::new());
        let container = Container::root(
            "app",
            [
                Provider::shared(Arc::clone(&bus)),
                Provider::shared(Arc::clone(&sequence)),
                Provider::value(config.clone()),
            ],
        );
        Self {
            inner: Arc::new(HostInner {
                config,
                bus,
                sequence,
                container,
                errors,
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn sequence(&self) -> &Arc<EventSequence> {
        &self.inner.sequence
    }

    /// The application scope every store's root scope is nested under.
    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// Hand an error nobody claimed to the root handler.
    pub fn report_error(&self, error: &StoreError) {
        self.inner.errors.handle_error(error);
    }

    /// Destroy the application scope and, with it, every store scope.
    pub fn destroy(&self) {
        self.inner.container.destroy();
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.inner.config)
            .field("bus", &self.inner.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Operator;

    #[test]
    fn the_app_scope_provides_shared_services() {
        let host = Host::new();
        let bus = host.container().resolve::<EventBus>().expect("bus");
        assert!(Arc::ptr_eq(&bus, host.event_bus()));

        let child = host.container().child("store", Vec::<Provider>::new());
        let sequence = child.resolve::<EventSequence>().expect("sequence");
        assert!(Arc::ptr_eq(&sequence, host.sequence()));
        assert_eq!(
            child.resolve::<HostConfig>().expect("config").default_operator,
            Operator::Switch
        );
    }
}
