//! Cascading teardown of holders
//!
//! Dependents are always destroyed before the instance they depend on.

use std::{collections::HashSet, sync::Arc};

use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};

use crate::{
    container::Container,
    context::RequestContext,
    errors::DestroyFailure,
    events::LifecycleEvent,
    factories::DestroyListener,
    manager::{DestroyStart, HolderManager},
    token::InstanceName,
};

/// Options of [Container::clear_all]
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearOptions {
    /// Defaults to [crate::ContainerConfig::max_clear_rounds]
    pub max_rounds: Option<usize>,
}

/// Outcome of [Container::clear_all]
#[derive(Debug, Default)]
pub struct ClearReport {
    pub rounds: usize,
    pub failures: Vec<DestroyFailure>,
    /// Holders still present after the last round
    pub remaining: usize,
}

/// A holder manager of the container
#[derive(Clone)]
enum Store {
    Global,
    Request(Arc<RequestContext>),
}
impl Store {
    fn holders<'a>(&'a self, container: &'a Container) -> &'a HolderManager {
        match self {
            Store::Global => container.global(),
            Store::Request(context) => &context.holders,
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            Store::Global => None,
            Store::Request(context) => Some(context.request_id()),
        }
    }
}

fn stores(container: &Container) -> Vec<Store> {
    let mut stores = vec![Store::Global];
    stores.extend(container.request_contexts().into_iter().map(Store::Request));
    stores
}

struct Invalidation<'a> {
    container: &'a Container,
    visited: HashSet<(Option<String>, InstanceName)>,
    failures: Vec<DestroyFailure>,
}

impl<'a> Invalidation<'a> {
    fn new(container: &'a Container) -> Self {
        Invalidation {
            container,
            visited: HashSet::new(),
            failures: Vec::new(),
        }
    }

    /// Stores that may hold dependents of a holder in `store`
    fn dependent_stores(&self, store: &Store) -> Vec<Store> {
        match store {
            // Request holders may depend on globals, never the other way around
            Store::Global => stores(self.container),
            Store::Request(context) => vec![Store::Request(context.clone())],
        }
    }

    fn destroy<'b>(&'b mut self, store: Store, name: InstanceName) -> BoxFuture<'b, ()> {
        async move {
            let key = (store.key().map(str::to_string), name.clone());
            if !self.visited.insert(key) {
                return;
            }

            let holders = store.holders(self.container).clone();
            let listeners = loop {
                match holders.begin_destroy(&name) {
                    DestroyStart::Started(listeners) => break listeners,
                    DestroyStart::Creating(created) => {
                        let _ = created.await;
                    }
                    DestroyStart::AlreadyDestroying(destroyed) => {
                        let _ = destroyed.await;
                        return;
                    }
                    DestroyStart::Missing => return,
                }
            };

            for dependent_store in self.dependent_stores(&store) {
                let dependents = dependent_store.holders(self.container).dependents(&name);
                for dependent in dependents {
                    self.destroy(dependent_store.clone(), dependent).await;
                }
            }

            let namespace = name.to_string();
            tracing::debug!("Destroying '{}'", name);
            let _ = self
                .container
                .events()
                .emit(&namespace, LifecycleEvent::PreDestroy)
                .await;

            let failures = run_listeners(&name, listeners).await;
            self.failures.extend(failures);
            holders.finish_destroy(&name);

            let _ = self
                .container
                .events()
                .emit(&namespace, LifecycleEvent::PostDestroy)
                .await;
        }
        .boxed()
    }
}

/// Destroys `name` wherever it lives, dependents first
pub(crate) async fn invalidate(container: &Container, name: &InstanceName) -> Vec<DestroyFailure> {
    let mut invalidation = Invalidation::new(container);
    for store in stores(container) {
        if store.holders(container).status(name).is_some() {
            invalidation.destroy(store, name.clone()).await;
        }
    }
    invalidation.failures
}

/// Destroys every holder, round after round, until none are left or the round limit is hit
pub(crate) async fn clear_all(container: &Container, max_rounds: usize) -> ClearReport {
    let mut report = ClearReport::default();

    while report.rounds < max_rounds {
        ready(container).await;

        let mut pending = Vec::new();
        for store in stores(container) {
            for name in store.holders(container).names() {
                pending.push((store.clone(), name));
            }
        }
        if pending.is_empty() {
            break;
        }

        report.rounds += 1;
        tracing::debug!("Clearing {} holders, round {}", pending.len(), report.rounds);

        let mut invalidation = Invalidation::new(container);
        for (store, name) in pending {
            invalidation.destroy(store, name).await;
        }
        report.failures.extend(invalidation.failures);
    }

    report.remaining = stores(container)
        .iter()
        .map(|store| store.holders(container).len())
        .sum();
    if report.remaining > 0 {
        tracing::warn!(
            "{} holders remain after {} clear rounds",
            report.remaining,
            report.rounds
        );
    }

    report
}

/// Completes once no holder is creating or destroying
pub(crate) async fn ready(container: &Container) {
    loop {
        let unsettled: Vec<_> = stores(container)
            .iter()
            .flat_map(|store| store.holders(container).unsettled())
            .collect();
        if unsettled.is_empty() {
            return;
        }
        join_all(unsettled).await;
    }
}

/// Runs destroy listeners one after another, failures are logged and collected
pub(crate) async fn run_listeners(
    name: &InstanceName,
    listeners: Vec<DestroyListener>,
) -> Vec<DestroyFailure> {
    let mut failures = Vec::new();
    for listener in listeners {
        if let Err(error) = listener().await {
            tracing::warn!("Destroy listener of '{}' failed: {}", name, error);
            failures.push(DestroyFailure {
                instance: name.to_string(),
                error: Arc::new(error),
            });
        }
    }
    failures
}
