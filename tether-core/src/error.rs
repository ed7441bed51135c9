//! Error Types
//!
//! Every failure the runtime can observe funnels into [`StoreError`]:
//! synchronous action bodies, effect error notifications, dispatch observer
//! callbacks and dynamically loaded effects. Errors that escape a store's
//! `Caught` handlers end up at the host's [`ErrorHandler`].

use std::sync::Arc;

use thiserror::Error;

use crate::reactive::ObjectId;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by, or routed through, the store runtime.
///
/// The type is `Clone` so it can be carried by event records and delivered
/// to several observers.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A failure raised by user code.
    #[error("{0}")]
    Message(Arc<str>),

    /// A foreign error raised by user code.
    #[error(transparent)]
    Custom(Arc<dyn std::error::Error + Send + Sync>),

    /// An error delivered on an effect's error channel.
    ///
    /// Effect errors are wrapped in this marker before they are routed, so
    /// handlers can tell them apart from synchronous action failures.
    #[error("effect of `{action}` failed: {source}")]
    Effect {
        action: Arc<str>,
        #[source]
        source: Box<StoreError>,
    },

    /// A dynamically loaded effect failed to load.
    #[error("effect of `{action}` failed to load: {source}")]
    Load {
        action: Arc<str>,
        #[source]
        source: Box<StoreError>,
    },

    #[error("`{0}` can only be called while an action is running")]
    OutsideActionScope(&'static str),

    #[error("store `{store}` has no action named `{name}`")]
    UnknownAction { store: Arc<str>, name: String },

    #[error("store `{store}` has no selector named `{name}`")]
    UnknownSelector { store: Arc<str>, name: String },

    #[error("store instance {0} has been destroyed")]
    Destroyed(ObjectId),

    #[error("scope `{0}` has been destroyed")]
    ScopeDestroyed(Arc<str>),

    #[error("no provider for `{0}`")]
    NoProvider(&'static str),

    #[error("property `{0}` is not a method")]
    NotAMethod(Arc<str>),

    #[error("no async runtime available to run `{0}`")]
    NoRuntime(Arc<str>),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Create a plain message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(Arc::from(message.into()))
    }

    /// Wrap a foreign error.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(error))
    }

    /// Mark this error as coming from the effect of `action`.
    pub fn into_effect(self, action: impl Into<Arc<str>>) -> Self {
        match self {
            already @ Self::Effect { .. } => already,
            other => Self::Effect {
                action: action.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error was delivered by an effect rather than thrown by
    /// an action body.
    pub fn is_effect_error(&self) -> bool {
        matches!(self, Self::Effect { .. })
    }

    /// Strip the effect marker, if present.
    pub fn effect_source(&self) -> &StoreError {
        match self {
            Self::Effect { source, .. } => source,
            other => other,
        }
    }
}

/// The application-level error reporter.
///
/// Errors that no `Caught` handler claims are surfaced here. From the
/// runtime's point of view this is the end of the line: synchronous errors
/// are rethrown to the caller afterwards, effect errors are not retried.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, error: &StoreError);
}

/// Default root handler: logs every unhandled error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle_error(&self, error: &StoreError) {
        tracing::error!(
            error = %error,
            effect = error.is_effect_error(),
            "unhandled store error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_marker_wraps_once() {
        let error = StoreError::msg("boom").into_effect("load");
        assert!(error.is_effect_error());

        let again = error.clone().into_effect("other");
        match &again {
            StoreError::Effect { action, .. } => assert_eq!(&**action, "load"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(again.effect_source().to_string(), "boom");
    }

    #[test]
    fn custom_errors_are_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = StoreError::custom(io);
        assert_eq!(error.to_string(), "disk on fire");
        assert!(!error.is_effect_error());
    }
}
