//! Decides where an instance lives and whether an existing holder can be reused

use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};

use crate::{
    circular,
    container::Container,
    context::{FactoryContext, RequestContext},
    errors::DiError,
    events::LifecycleEvent,
    factories::DestroyListener,
    instantiator,
    invalidator,
    manager::{Completion, Created, Dependencies, HolderManager, Lookup},
    registry::{FactoryRecord, Scope},
    token::{InstanceName, ResolveRequest},
    types::AnyInstance,
};

/// The holder a construction belongs to
#[derive(Clone)]
pub(crate) struct Owner {
    pub name: InstanceName,
    pub holders: HolderManager,
}

/// Who is asking for an instance
#[derive(Clone, Copy)]
pub(crate) struct Caller<'a> {
    pub request: Option<&'a Arc<RequestContext>>,
    /// Resolutions in progress above this one
    pub chain: &'a [InstanceName],
    pub owner: Option<&'a Owner>,
}
impl<'a> Caller<'a> {
    /// A resolution started from outside of any construction
    pub fn root(request: Option<&'a Arc<RequestContext>>) -> Self {
        Caller {
            request,
            chain: &[],
            owner: None,
        }
    }
}

pub(crate) struct Resolved {
    pub instance: AnyInstance,
    pub name: InstanceName,
    /// Lives in a holder, transients don't
    pub held: bool,
    /// Lives in or depends on a request context
    pub request_bound: bool,
    /// Only set for transients
    pub dependencies: Dependencies,
    /// Only set for transients
    pub listeners: Vec<DestroyListener>,
}
impl Resolved {
    pub fn held(instance: AnyInstance, name: InstanceName, request_bound: bool) -> Self {
        Resolved {
            instance,
            name,
            held: true,
            request_bound,
            dependencies: Dependencies::new(),
            listeners: Vec::new(),
        }
    }
}

/// Resolves `request`, retrying after retryable errors such as a concurrent teardown
pub(crate) fn resolve<'a>(
    container: &'a Container,
    caller: Caller<'a>,
    request: ResolveRequest,
) -> BoxFuture<'a, Result<Resolved, DiError>> {
    async move {
        let config = container.config();

        if config.detect_cycles {
            if let Some(path) = circular::chain_cycle(caller.chain, &request.name) {
                let path = circular::format_path(&path);
                tracing::error!("Circular dependency detected: {}", path);
                return Err(DiError::CircularDependency { path });
            }
        }

        if caller.chain.len() >= config.max_resolution_depth {
            tracing::error!(
                "Resolving '{}' exceeds the maximum depth of {}",
                request.name,
                config.max_resolution_depth
            );
            return Err(DiError::MaxDepthExceeded(config.max_resolution_depth));
        }

        let mut attempt = 1;
        loop {
            match resolve_once(container, caller, &request).await {
                Err(error) if error.is_retryable() && attempt < config.max_resolve_attempts => {
                    tracing::debug!("Resolving '{}' again: {}", request.name, error);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
    .boxed()
}

async fn resolve_once(
    container: &Container,
    caller: Caller<'_>,
    request: &ResolveRequest,
) -> Result<Resolved, DiError> {
    let record = container.registry().get(&request.token)?;

    match record.scope {
        Scope::Transient => build_transient(container, caller, request, &record).await,
        Scope::Singleton => {
            resolve_held(container, caller, request, &record, container.global()).await
        }
        Scope::Request => {
            let Some(context) = caller.request else {
                return Err(DiError::RequestContextRequired(request.name.to_string()));
            };
            if context.is_ended() {
                return Err(DiError::RequestEnded {
                    request_id: context.request_id().to_string(),
                    instance: request.name.to_string(),
                });
            }
            resolve_held(container, caller, request, &record, &context.holders).await
        }
    }
}

async fn resolve_held(
    container: &Container,
    caller: Caller<'_>,
    request: &ResolveRequest,
    record: &FactoryRecord,
    holders: &HolderManager,
) -> Result<Resolved, DiError> {
    let name = &request.name;
    let request_bound = record.scope == Scope::Request;
    let ttl = match record.scope {
        Scope::Singleton => record.ttl,
        _ => None,
    };

    match holders.lookup(name, Some((record.scope, ttl))) {
        Lookup::Ready(instance) => Ok(Resolved::held(instance, name.clone(), request_bound)),
        Lookup::Failed(error) => Err(error),
        Lookup::Pending(pending) => {
            let _edge = caller.owner.map(|owner| WaitingEdge::mark(owner, name));
            if let Some(owner) = caller.owner.filter(|_| container.config().detect_cycles) {
                check_waiting_cycle(container, caller.request, &owner.name, name)?;
            }

            let instance = pending
                .await
                .map_err(|_| DiError::CreationAborted(name.to_string()))??;
            Ok(Resolved::held(instance, name.clone(), request_bound))
        }
        Lookup::Destroying(destroyed) => {
            let _ = destroyed.await;
            Err(DiError::InstanceDestroying(name.to_string()))
        }
        Lookup::Expired => {
            tracing::debug!("'{}' outlived its ttl", name);
            invalidator::invalidate(container, name).await;
            Err(DiError::InstanceDestroying(name.to_string()))
        }
        Lookup::Missing => Err(DiError::InstanceNotFound(name.to_string())),
        Lookup::Closed => Err(ended(caller, name)),
        Lookup::Reserved => create(container, caller, request, record, holders).await,
    }
}

/// Builds the instance for a holder this resolution reserved
async fn create(
    container: &Container,
    caller: Caller<'_>,
    request: &ResolveRequest,
    record: &FactoryRecord,
    holders: &HolderManager,
) -> Result<Resolved, DiError> {
    let name = &request.name;
    let mut guard = CreationGuard {
        holders,
        name,
        armed: true,
    };
    let _edge = caller.owner.map(|owner| WaitingEdge::mark(owner, name));
    let namespace = name.to_string();

    tracing::debug!("Creating '{}' ({:?})", name, record.scope);
    let _ = container
        .events()
        .emit(&namespace, LifecycleEvent::PreCreate)
        .await;

    let owner = Owner {
        name: name.clone(),
        holders: holders.clone(),
    };
    let ctx = FactoryContext::new(container.clone(), &caller, Some(owner), record.scope, request);
    let result = instantiator::instantiate(ctx, record).await;
    guard.armed = false;

    let built = match result {
        Ok(built) => built,
        Err(error) if error.is_caller_bound() => {
            tracing::debug!("Dropping holder of '{}': {}", name, error);
            // Waiters may be in a different situation, they resolve again
            let retry = match error.is_retryable() {
                true => error.clone(),
                false => DiError::CreationAborted(name.to_string()),
            };
            holders.abandon(name, retry);
            return Err(error);
        }
        Err(error) => {
            tracing::error!("Failed to create '{}': {}", name, error);
            holders.fail(name, error.clone());
            return Err(error);
        }
    };

    let instance = built.instance.clone();
    let created = Created {
        instance: built.instance,
        type_info: built.type_info,
        dependencies: built.dependencies,
        listeners: built.listeners,
    };

    match holders.complete(name, created, Some(container.global())) {
        Completion::Done => {}
        Completion::Gone(orphan) => {
            tracing::warn!("'{}' was created after its holder was removed", name);
            invalidator::run_listeners(name, orphan.listeners).await;
            return Err(ended(caller, name));
        }
        Completion::Stale(orphan) => {
            invalidator::run_listeners(name, orphan.listeners).await;
            return Err(DiError::InstanceDestroying(name.to_string()));
        }
    }

    tracing::debug!("Created '{}'", name);
    let _ = container
        .events()
        .emit(&namespace, LifecycleEvent::PostCreate)
        .await;

    Ok(Resolved::held(instance, name.clone(), record.scope == Scope::Request))
}

/// Transients get no holder, every resolution builds a new instance
async fn build_transient(
    container: &Container,
    caller: Caller<'_>,
    request: &ResolveRequest,
    record: &FactoryRecord,
) -> Result<Resolved, DiError> {
    let ctx = FactoryContext::new(
        container.clone(),
        &caller,
        caller.owner.cloned(),
        Scope::Transient,
        request,
    );
    let built = instantiator::instantiate(ctx, record).await?;

    Ok(Resolved {
        instance: built.instance,
        name: request.name.clone(),
        held: false,
        request_bound: built.request_bound,
        dependencies: built.dependencies,
        listeners: built.listeners,
    })
}

/// The request of `caller` ended, or for global holders the creation was cut short
fn ended(caller: Caller<'_>, name: &InstanceName) -> DiError {
    match caller.request {
        Some(context) => DiError::RequestEnded {
            request_id: context.request_id().to_string(),
            instance: name.to_string(),
        },
        None => DiError::CreationAborted(name.to_string()),
    }
}

fn check_waiting_cycle(
    container: &Container,
    request: Option<&Arc<RequestContext>>,
    waiter: &InstanceName,
    target: &InstanceName,
) -> Result<(), DiError> {
    let waiting_for = |name: &InstanceName| {
        let mut edges = container.global().waiting_for(name);
        if let Some(context) = request {
            edges.extend(context.holders.waiting_for(name));
        }
        edges
    };

    match circular::detect_cycle(waiter, target, waiting_for) {
        Some(path) => {
            let path = circular::format_path(&path);
            tracing::error!("Circular dependency detected: {}", path);
            Err(DiError::CircularDependency { path })
        }
        None => Ok(()),
    }
}

/// Abandons a reserved holder if its creation is dropped before it settles
struct CreationGuard<'a> {
    holders: &'a HolderManager,
    name: &'a InstanceName,
    armed: bool,
}
impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Creation of '{}' was dropped", self.name);
            self.holders
                .abandon(self.name, DiError::CreationAborted(self.name.to_string()));
        }
    }
}

/// `owner` waits for `target` as long as this lives
struct WaitingEdge<'a> {
    owner: &'a Owner,
    target: InstanceName,
}
impl<'a> WaitingEdge<'a> {
    fn mark(owner: &'a Owner, target: &InstanceName) -> Self {
        owner.holders.set_waiting(&owner.name, target, true);
        WaitingEdge {
            owner,
            target: target.clone(),
        }
    }
}
impl Drop for WaitingEdge<'_> {
    fn drop(&mut self) {
        self.owner
            .holders
            .set_waiting(&self.owner.name, &self.target, false);
    }
}
