//! Async service locator with scoped lifetimes
//!
//! Types are registered in a [Registry] under a [Token] and resolved lazily through a [Container].
//! - Singletons live as long as the container, or until they are invalidated
//! - Request scoped instances live in a [ScopedContainer] until its request ends
//! - Transients are built on every resolution
//!
//! A singleton that turns out to depend on request scoped instances is promoted to request scope.
//! Invalidating an instance first destroys everything that was built from it.

mod builder;
mod circular;
mod config;
mod container;
mod context;
mod dependency_graph;
mod errors;
mod events;
mod factories;
mod holder;
mod instantiator;
mod invalidator;
mod manager;
mod registry;
mod resolver;
mod token;
mod types;

pub use builder::ContainerBuilder;
pub use config::{ContainerConfig, ENV_DETECT_CYCLES, ENV_PROFILE};
pub use container::{Container, ScopedContainer};
pub use context::{FactoryContext, RequestContext};
pub use dependency_graph::{DependencyGraph, DependencyGraphError, DependencyGraphErrors};
pub use errors::{ConfigError, DestroyFailure, DiError, EmitError};
pub use events::{EventFuture, LifecycleEvent, LifecycleEventBus, ANY_NAMESPACE};
pub use factories::{Dependency, DestroyFuture, DestroyListener, DynFactory, Factory, Injectable};
pub use holder::{HolderSnapshot, HolderStatus};
pub use invalidator::{ClearOptions, ClearReport};
pub use registry::{FactoryKind, FactoryRecord, RegisterOptions, Registry, Scope};
pub use token::{ArgsSchema, InstanceName, ResolveRequest, Token, TokenId};
pub use types::{AnyInstance, DynError, InjectionArgs, Service, TypeInfo};
