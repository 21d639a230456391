//! Per scope storage of instance holders
//!
//! Every operation takes the lock once and finishes synchronously, so no partially updated state is
//! ever visible across an await point.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use futures::{future::BoxFuture, FutureExt};
use futures_channel::oneshot;

use crate::{
    errors::DiError,
    factories::DestroyListener,
    holder::{CreationResult, HolderSnapshot, HolderState, HolderStatus, InstanceHolder},
    registry::Scope,
    token::InstanceName,
    types::{AnyInstance, TypeInfo},
};

/// Outcome of looking up a holder
pub(crate) enum Lookup {
    /// Created and not expired
    Ready(AnyInstance),
    /// Creation failed, the holder keeps the error until invalidated
    Failed(DiError),
    /// Someone else is creating it
    Pending(oneshot::Receiver<CreationResult>),
    /// It is being torn down
    Destroying(oneshot::Receiver<()>),
    /// Created, but older than its ttl
    Expired,
    /// Not present, a creating holder was inserted for the caller
    Reserved,
    /// Not present
    Missing,
    /// Not present, and the store was drained so nothing can be reserved anymore
    Closed,
}

/// Dependencies of a construction, with the instance each of them resolved to
pub(crate) type Dependencies = HashMap<InstanceName, AnyInstance>;

/// A successful construction
pub(crate) struct Created {
    pub instance: AnyInstance,
    pub type_info: TypeInfo,
    pub dependencies: Dependencies,
    pub listeners: Vec<DestroyListener>,
}

/// Outcome of [HolderManager::complete]
pub(crate) enum Completion {
    Done,
    /// The holder is gone, e.g. because its request ended meanwhile
    Gone(Created),
    /// A dependency was destroyed or replaced meanwhile, the holder was dropped
    Stale(Created),
}

/// Outcome of starting to destroy a holder
pub(crate) enum DestroyStart {
    /// Now destroying, the listeners must be run by the caller
    Started(Vec<DestroyListener>),
    /// Still creating, wait and try again
    Creating(oneshot::Receiver<CreationResult>),
    /// Someone else is destroying it
    AlreadyDestroying(oneshot::Receiver<()>),
    Missing,
}

#[derive(Default)]
struct ManagerState {
    holders: HashMap<InstanceName, InstanceHolder>,
    /// Transpose of the holders' dependency sets
    dependents: HashMap<InstanceName, HashSet<InstanceName>>,
    /// Set once drained, no holder may be reserved afterwards
    closed: bool,
}

#[derive(Clone, Default)]
pub(crate) struct HolderManager {
    state: Arc<Mutex<ManagerState>>,
}

impl HolderManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `name`, inserting a creating holder if `reserve` is given and nothing is there
    pub fn lookup(&self, name: &InstanceName, reserve: Option<(Scope, Option<Duration>)>) -> Lookup {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(holder) = state.holders.get_mut(name) {
            if holder.is_expired(now) {
                return Lookup::Expired;
            }
            return match &holder.state {
                HolderState::Created(instance) => Lookup::Ready(instance.clone()),
                HolderState::Error(error) => Lookup::Failed(error.clone()),
                HolderState::Creating => Lookup::Pending(holder.subscribe()),
                HolderState::Destroying => Lookup::Destroying(holder.subscribe_destroy()),
            };
        }

        match reserve {
            Some(_) if state.closed => Lookup::Closed,
            Some((scope, ttl)) => {
                state
                    .holders
                    .insert(name.clone(), InstanceHolder::creating(name.clone(), scope, ttl));
                Lookup::Reserved
            }
            None => Lookup::Missing,
        }
    }

    /// The created, unexpired instance of `name`
    pub fn peek(&self, name: &InstanceName) -> Option<AnyInstance> {
        let state = self.lock();
        let holder = state.holders.get(name)?;
        match &holder.state {
            HolderState::Created(instance) if !holder.is_expired(Instant::now()) => {
                Some(instance.clone())
            }
            _ => None,
        }
    }

    /// Settles a creating holder with its instance
    ///
    /// Every dependency must still be the created instance it resolved to, looked up here or in
    /// `global`. Otherwise the holder is dropped and its waiters are told to resolve again,
    /// a dependency destroyed meanwhile never gets a new dependent.
    pub fn complete(
        &self,
        name: &InstanceName,
        created: Created,
        global: Option<&HolderManager>,
    ) -> Completion {
        let mut state = self.lock();
        let creating = state
            .holders
            .get(name)
            .is_some_and(|holder| holder.status() == HolderStatus::Creating);
        if !creating {
            return Completion::Gone(created);
        }

        let stale = {
            let global = global
                .filter(|global| !Arc::ptr_eq(&global.state, &self.state))
                .map(HolderManager::lock);
            created
                .dependencies
                .iter()
                .find(|(dependency, instance)| {
                    let current = state.holders.get(*dependency).or_else(|| {
                        global
                            .as_ref()
                            .and_then(|global| global.holders.get(*dependency))
                    });
                    !matches!(
                        current.map(|holder| &holder.state),
                        Some(HolderState::Created(live)) if Arc::ptr_eq(live, *instance)
                    )
                })
                .map(|(dependency, _)| dependency.clone())
        };

        if let Some(dependency) = stale {
            tracing::debug!(
                "'{}' was destroyed while '{}' was being created from it",
                dependency,
                name
            );
            if let Some(mut holder) = state.holders.remove(name) {
                holder.reject(DiError::InstanceDestroying(name.to_string()));
                holder.notify_destroyed();
            }
            return Completion::Stale(created);
        }

        let state = &mut *state;
        let Some(holder) = state.holders.get_mut(name) else {
            return Completion::Gone(created);
        };
        for dependency in created.dependencies.keys() {
            state
                .dependents
                .entry(dependency.clone())
                .or_default()
                .insert(name.clone());
        }
        holder.dependencies = created.dependencies.into_keys().collect();
        holder.destroy_listeners = created.listeners;
        holder.type_info = Some(created.type_info);
        holder.waiting_for.clear();
        holder.settle(Ok(created.instance));
        Completion::Done
    }

    /// Settles a creating holder with an error, kept until the holder is invalidated
    pub fn fail(&self, name: &InstanceName, error: DiError) -> bool {
        let mut state = self.lock();
        match state
            .holders
            .get_mut(name)
            .filter(|holder| holder.status() == HolderStatus::Creating)
        {
            Some(holder) => {
                holder.waiting_for.clear();
                holder.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Removes a creating holder without a result, its waiters receive `error`
    pub fn abandon(&self, name: &InstanceName, error: DiError) {
        let mut state = self.lock();
        let creating = state
            .holders
            .get(name)
            .is_some_and(|holder| holder.status() == HolderStatus::Creating);
        if !creating {
            return;
        }
        if let Some(mut holder) = state.holders.remove(name) {
            holder.reject(error);
            holder.notify_destroyed();
        }
    }

    /// Adds or removes the `name` -> `target` edge of the waiting graph
    pub fn set_waiting(&self, name: &InstanceName, target: &InstanceName, waiting: bool) {
        let mut state = self.lock();
        if let Some(holder) = state.holders.get_mut(name) {
            if waiting {
                holder.waiting_for.insert(target.clone());
            } else {
                holder.waiting_for.remove(target);
            }
        }
    }

    pub fn waiting_for(&self, name: &InstanceName) -> Vec<InstanceName> {
        let state = self.lock();
        state
            .holders
            .get(name)
            .map(|holder| holder.waiting_for.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Moves a created (or failed) holder to destroying and hands out its listeners
    pub fn begin_destroy(&self, name: &InstanceName) -> DestroyStart {
        let mut state = self.lock();
        let Some(holder) = state.holders.get_mut(name) else {
            return DestroyStart::Missing;
        };

        match holder.state {
            HolderState::Creating => DestroyStart::Creating(holder.subscribe()),
            HolderState::Destroying => DestroyStart::AlreadyDestroying(holder.subscribe_destroy()),
            HolderState::Created(_) | HolderState::Error(_) => {
                holder.state = HolderState::Destroying;
                DestroyStart::Started(std::mem::take(&mut holder.destroy_listeners))
            }
        }
    }

    /// Removes a destroying holder and its edges from the reverse index
    pub fn finish_destroy(&self, name: &InstanceName) {
        let mut state = self.lock();
        let Some(mut holder) = state.holders.remove(name) else {
            return;
        };
        for dependency in &holder.dependencies {
            if let Some(dependents) = state.dependents.get_mut(dependency) {
                dependents.remove(name);
                if dependents.is_empty() {
                    state.dependents.remove(dependency);
                }
            }
        }
        holder.notify_destroyed();
    }

    /// Holders whose construction used `name`
    pub fn dependents(&self, name: &InstanceName) -> Vec<InstanceName> {
        let state = self.lock();
        state
            .dependents
            .get(name)
            .map(|dependents| dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<InstanceName> {
        self.lock().holders.keys().cloned().collect()
    }

    pub fn status(&self, name: &InstanceName) -> Option<HolderStatus> {
        self.lock().holders.get(name).map(InstanceHolder::status)
    }

    pub fn len(&self) -> usize {
        self.lock().holders.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Futures completing when the currently creating or destroying holders settle
    pub fn unsettled(&self) -> Vec<BoxFuture<'static, ()>> {
        let mut state = self.lock();
        let mut pending = Vec::new();
        for holder in state.holders.values_mut() {
            match holder.state {
                HolderState::Creating => {
                    let rx = holder.subscribe();
                    pending.push(rx.map(|_| ()).boxed());
                }
                HolderState::Destroying => {
                    let rx = holder.subscribe_destroy();
                    pending.push(rx.map(|_| ()).boxed());
                }
                HolderState::Created(_) | HolderState::Error(_) => {}
            }
        }
        pending
    }

    /// Removes every holder at once and refuses new reservations from then on
    pub fn drain(&self) -> Vec<InstanceHolder> {
        let mut state = self.lock();
        state.closed = true;
        state.dependents.clear();
        state.holders.drain().map(|(_, holder)| holder).collect()
    }

    pub fn snapshot(&self) -> Vec<HolderSnapshot> {
        self.lock().holders.values().map(HolderSnapshot::from).collect()
    }
}
