use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use futures_channel::oneshot;

use crate::{
    errors::DiError,
    factories::DestroyListener,
    registry::Scope,
    token::InstanceName,
    types::{AnyInstance, TypeInfo},
};

pub(crate) type CreationResult = Result<AnyInstance, DiError>;

/// Where a holder is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderStatus {
    Creating,
    Created,
    Destroying,
    Error,
}

pub(crate) enum HolderState {
    Creating,
    Created(AnyInstance),
    Destroying,
    Error(DiError),
}

/// Bookkeeping for one resolved (or resolving) instance
pub(crate) struct InstanceHolder {
    pub name: InstanceName,
    pub state: HolderState,
    pub type_info: Option<TypeInfo>,
    pub scope: Scope,
    /// Everything resolved while this instance was constructed
    pub dependencies: HashSet<InstanceName>,
    /// Instances this one is blocked on right now
    pub waiting_for: HashSet<InstanceName>,
    pub destroy_listeners: Vec<DestroyListener>,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
    waiters: Vec<oneshot::Sender<CreationResult>>,
    destroy_waiters: Vec<oneshot::Sender<()>>,
}

impl InstanceHolder {
    pub fn creating(name: InstanceName, scope: Scope, ttl: Option<Duration>) -> Self {
        InstanceHolder {
            name,
            state: HolderState::Creating,
            type_info: None,
            scope,
            dependencies: HashSet::new(),
            waiting_for: HashSet::new(),
            destroy_listeners: Vec::new(),
            created_at: Instant::now(),
            ttl,
            waiters: Vec::new(),
            destroy_waiters: Vec::new(),
        }
    }

    pub fn status(&self) -> HolderStatus {
        match self.state {
            HolderState::Creating => HolderStatus::Creating,
            HolderState::Created(_) => HolderStatus::Created,
            HolderState::Destroying => HolderStatus::Destroying,
            HolderState::Error(_) => HolderStatus::Error,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.state, HolderState::Created(_))
            && self
                .ttl
                .is_some_and(|ttl| now.saturating_duration_since(self.created_at) > ttl)
    }

    /// Receives the result once creation settles
    pub fn subscribe(&mut self) -> oneshot::Receiver<CreationResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Receives a signal once the holder is removed
    pub fn subscribe_destroy(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.destroy_waiters.push(tx);
        rx
    }

    /// Settles a creating holder and informs all waiters
    pub fn settle(&mut self, result: CreationResult) {
        self.created_at = Instant::now();
        self.state = match &result {
            Ok(instance) => HolderState::Created(instance.clone()),
            Err(error) => HolderState::Error(error.clone()),
        };
        for waiter in self.waiters.drain(..) {
            // A dropped receiver just means the caller is gone
            let _ = waiter.send(result.clone());
        }
    }

    /// Fails all waiters of a holder that will never be created
    pub fn reject(&mut self, error: DiError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Informs everyone waiting for the removal of this holder
    pub fn notify_destroyed(&mut self) {
        for waiter in self.destroy_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

/// Read only view of a holder
#[derive(Debug, Clone)]
pub struct HolderSnapshot {
    pub name: InstanceName,
    pub status: HolderStatus,
    pub scope: Scope,
    pub type_info: Option<TypeInfo>,
    pub dependencies: Vec<InstanceName>,
    pub age: Duration,
}
impl From<&InstanceHolder> for HolderSnapshot {
    fn from(holder: &InstanceHolder) -> Self {
        HolderSnapshot {
            name: holder.name.clone(),
            status: holder.status(),
            scope: holder.scope,
            type_info: holder.type_info,
            dependencies: holder.dependencies.iter().cloned().collect(),
            age: holder.created_at.elapsed(),
        }
    }
}
