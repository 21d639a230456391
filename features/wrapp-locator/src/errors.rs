use std::sync::Arc;

use thiserror::Error;

use crate::{events::LifecycleEvent, token::InstanceName, types::DynError};

/// Errors surfaced while resolving, constructing or tearing down instances.
///
/// All variants are `Clone`: one failed construction is delivered to every
/// caller waiting on the same holder.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// Nothing is registered for the requested token
    #[error("No factory found for '{0}'")]
    FactoryNotFound(String),

    /// A factory produced a value that does not match the token's type
    #[error("Factory for '{token}' did not produce a '{expected}'")]
    FactoryTokenNotResolved {
        token: String,
        expected: &'static str,
    },

    /// The instance is not cached
    #[error("No created instance of '{0}' is available")]
    InstanceNotFound(String),

    /// The instance was torn down while it was being requested - resolving again will build a new one
    #[error("Instance '{0}' is being destroyed, resolve it again")]
    InstanceDestroying(String),

    /// Resolving would require an instance to wait on itself
    #[error("Circular dependency detected: {path}")]
    CircularDependency { path: String },

    /// A constructor, factory or lifecycle hook failed
    #[error("Failed to create '{token}': {error}")]
    Unknown {
        token: String,
        error: Arc<DynError>,
    },

    /// Construction arguments were rejected by the token's schema
    #[error("Invalid arguments for '{token}': {reason}")]
    InvalidArguments { token: String, reason: String },

    /// A request scoped token was resolved outside of a request
    #[error("'{0}' is request scoped and can only be resolved inside a request")]
    RequestContextRequired(String),

    /// A request with this id is already active
    #[error("Request '{0}' is already active")]
    DuplicateRequest(String),

    /// The request ended while the instance was being created
    #[error("Request '{request_id}' ended while '{instance}' was being created")]
    RequestEnded {
        request_id: String,
        instance: String,
    },

    /// The task creating the instance was dropped before it finished
    #[error("Creation of '{0}' was aborted")]
    CreationAborted(String),

    /// A synchronous injection asked for something that is not resolved yet
    #[error("'{0}' is not resolved yet - declare it in `dependencies()` or use `inject` instead of `sync_inject`")]
    NotResolvedSynchronously(String),

    /// The resolution chain got too deep
    #[error("Maximum resolution depth exceeded: {0}\nThis likely indicates an extremely deep or circular dependency chain.")]
    MaxDepthExceeded(usize),

    /// The singleton was promoted to request scope while it was being created.
    /// Resolution restarts in the request context, callers never see this.
    #[error("'{0}' was promoted to request scope")]
    ScopePromoted(String),
}

impl DiError {
    /// Wraps an error returned by user code.
    ///
    /// If the error already is a [DiError] (e.g. a failed `inject` propagated with `?`) it is kept as is
    pub(crate) fn from_user(token: &InstanceName, error: DynError) -> Self {
        match error.downcast::<DiError>() {
            Ok(di_error) => *di_error,
            Err(error) => DiError::Unknown {
                token: token.to_string(),
                error: Arc::new(error),
            },
        }
    }

    /// Whether resolving again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiError::InstanceDestroying(_) | DiError::ScopePromoted(_) | DiError::CreationAborted(_)
        )
    }

    /// Whether the error depends on who resolved the instance rather than on its construction
    ///
    /// A holder failing with such an error is dropped instead of keeping the error.
    pub fn is_caller_bound(&self) -> bool {
        matches!(
            self,
            DiError::RequestContextRequired(_)
                | DiError::RequestEnded { .. }
                | DiError::CreationAborted(_)
                | DiError::ScopePromoted(_)
        )
    }
}

/// A destroy listener that failed during teardown
#[derive(Error, Debug, Clone)]
#[error("Destroy listener of '{instance}' failed: {error}")]
pub struct DestroyFailure {
    pub instance: String,
    pub error: Arc<DynError>,
}

/// One or more listeners failed while an event was emitted
#[derive(Error, Debug, Clone)]
#[error("{} listener(s) failed on {event:?} for '{namespace}'", .failures.len())]
pub struct EmitError {
    pub namespace: String,
    pub event: LifecycleEvent,
    pub failures: Vec<Arc<DynError>>,
}

/// Errors while loading the container configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{name}' has an invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}
