//! Contexts handed to user code while instances are constructed, and per request state

use std::{
    any::Any,
    collections::HashMap,
    fmt::Debug,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Instant,
};

use futures::FutureExt;

use crate::{
    container::Container,
    errors::DiError,
    factories::DestroyListener,
    holder::HolderSnapshot,
    manager::{Dependencies, HolderManager},
    registry::Scope,
    resolver::{self, Caller, Owner, Resolved},
    token::{InstanceName, ResolveRequest, Token},
    types::{downcast_instance, AnyInstance, DynError, ErasedArgs, InjectionArgs, Service},
};

/// Handle passed to constructors and factories
///
/// Everything resolved through it is recorded as a dependency of the instance being built,
/// so invalidating one of those dependencies tears this instance down as well.
pub struct FactoryContext {
    container: Container,
    request: Option<Arc<RequestContext>>,
    /// Nearest holder in the chain, transients have none of their own
    pub(crate) owner: Option<Owner>,
    pub(crate) scope: Scope,
    /// Ongoing resolutions, ending with this one
    pub(crate) chain: Vec<InstanceName>,
    name: InstanceName,
    args: Option<ErasedArgs>,
    pub(crate) prefetched: HashMap<InstanceName, AnyInstance>,
    tracked: Mutex<Tracked>,
    request_bound: AtomicBool,
}

#[derive(Default)]
pub(crate) struct Tracked {
    pub dependencies: Dependencies,
    pub listeners: Vec<DestroyListener>,
}

impl Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("request", &self.request_id())
            .finish()
    }
}

impl FactoryContext {
    pub(crate) fn new(
        container: Container,
        caller: &Caller<'_>,
        owner: Option<Owner>,
        scope: Scope,
        request: &ResolveRequest,
    ) -> Self {
        let mut chain = caller.chain.to_vec();
        chain.push(request.name.clone());

        FactoryContext {
            container,
            request: caller.request.cloned(),
            owner,
            scope,
            chain,
            name: request.name.clone(),
            args: request.args.clone(),
            prefetched: HashMap::new(),
            tracked: Mutex::new(Tracked::default()),
            request_bound: AtomicBool::new(false),
        }
    }

    /// Name of the instance being built
    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Id of the request this construction happens in
    pub fn request_id(&self) -> Option<&str> {
        self.request.as_ref().map(|request| request.request_id())
    }

    /// The request this construction happens in
    pub fn request(&self) -> Option<&Arc<RequestContext>> {
        self.request.as_ref()
    }

    /// Arguments the instance is built with
    pub fn args<A: InjectionArgs>(&self) -> Result<&A, DiError> {
        self.erased_args()
            .and_then(|args| args.downcast_ref::<A>())
            .ok_or_else(|| DiError::InvalidArguments {
                token: self.name.to_string(),
                reason: format!("expected arguments of type '{}'", std::any::type_name::<A>()),
            })
    }

    pub(crate) fn erased_args(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.args.as_deref()
    }

    /// Resolves `token`, waiting for it to be constructed if needed
    pub async fn inject<T: Service>(&self, token: &Token<T>) -> Result<Arc<T>, DiError> {
        self.inject_request(token.request()).await
    }

    /// Resolves a parameterized `token` for `args`
    pub async fn inject_with<T: Service, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
        args: A,
    ) -> Result<Arc<T>, DiError> {
        self.inject_request(token.request_with(args)?).await
    }

    /// Returns `token` if it was declared as a dependency or is already cached
    ///
    /// Never waits: anything else fails with [DiError::NotResolvedSynchronously]
    pub fn sync_inject<T: Service>(&self, token: &Token<T>) -> Result<Arc<T>, DiError> {
        self.sync_request(token.request())
    }

    pub fn sync_inject_with<T: Service, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
        args: A,
    ) -> Result<Arc<T>, DiError> {
        self.sync_request(token.request_with(args)?)
    }

    /// Runs `listener` once the instance being built is destroyed
    pub fn add_destroy_listener<F, Fut>(&self, listener: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        self.tracked()
            .listeners
            .push(Box::new(move || listener().boxed()));
    }

    async fn inject_request<T: Service>(&self, request: ResolveRequest) -> Result<Arc<T>, DiError> {
        let name = request.name.clone();
        let instance = self.resolve(request).await?;
        downcast(&name, instance)
    }

    /// Resolves a request as a dependency of this construction
    pub(crate) async fn resolve(&self, request: ResolveRequest) -> Result<AnyInstance, DiError> {
        let caller = Caller {
            request: self.request.as_ref(),
            chain: &self.chain,
            owner: self.owner.as_ref(),
        };
        let resolved = resolver::resolve(&self.container, caller, request).await?;
        Ok(self.track(resolved))
    }

    fn sync_request<T: Service>(&self, request: ResolveRequest) -> Result<Arc<T>, DiError> {
        if let Some(instance) = self.prefetched.get(&request.name) {
            return downcast(&request.name, instance.clone());
        }

        let scope = self.container.registry().get(&request.token)?.scope;
        let cached = match (scope, &self.request) {
            (Scope::Singleton, _) => self.container.global().peek(&request.name),
            (Scope::Request, Some(context)) => context.holders.peek(&request.name),
            (Scope::Request, None) => {
                return Err(DiError::RequestContextRequired(request.name.to_string()))
            }
            (Scope::Transient, _) => None,
        };

        match cached {
            Some(instance) => {
                let resolved = Resolved::held(instance, request.name.clone(), scope == Scope::Request);
                downcast(&request.name, self.track(resolved))
            }
            None => Err(DiError::NotResolvedSynchronously(request.name.to_string())),
        }
    }

    /// Records a resolved instance as a dependency
    fn track(&self, resolved: Resolved) -> AnyInstance {
        if resolved.request_bound {
            self.request_bound.store(true, Ordering::Release);
        }

        let mut tracked = self.tracked();
        if resolved.held {
            tracked
                .dependencies
                .insert(resolved.name, resolved.instance.clone());
        } else {
            // A transient has no holder, depend on what it depends on
            tracked.dependencies.extend(resolved.dependencies);
            tracked.listeners.extend(resolved.listeners);
        }
        resolved.instance
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether anything request scoped was resolved so far
    pub(crate) fn is_request_bound(&self) -> bool {
        self.request_bound.load(Ordering::Acquire)
    }

    pub(crate) fn into_tracked(self) -> Tracked {
        self.tracked.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast<T: Service>(name: &InstanceName, instance: AnyInstance) -> Result<Arc<T>, DiError> {
    downcast_instance(instance).map_err(|expected| DiError::FactoryTokenNotResolved {
        token: name.to_string(),
        expected: expected.type_name,
    })
}

/// State of one active request
pub struct RequestContext {
    request_id: Arc<str>,
    pub(crate) holders: HolderManager,
    metadata: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    /// Destroy listeners of transients resolved directly in this request
    pub(crate) listeners: Mutex<Vec<(InstanceName, Vec<DestroyListener>)>>,
    priority: i32,
    created_at: Instant,
    ended: AtomicBool,
}

impl Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("holders", &self.holders.len())
            .field("priority", &self.priority)
            .finish()
    }
}

impl RequestContext {
    pub(crate) fn new(request_id: Arc<str>, priority: i32) -> Self {
        RequestContext {
            request_id,
            holders: HolderManager::new(),
            metadata: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            priority,
            created_at: Instant::now(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn set_metadata<V: Service>(&self, key: impl Into<String>, value: V) {
        self.lock_metadata().insert(key.into(), Arc::new(value));
    }

    /// Metadata stored under `key`, if it is a `V`
    pub fn metadata<V: Service>(&self, key: &str) -> Option<Arc<V>> {
        let value = self.lock_metadata().get(key)?.clone();
        value.downcast::<V>().ok()
    }

    pub fn remove_metadata(&self, key: &str) -> bool {
        self.lock_metadata().remove(key).is_some()
    }

    /// Holders currently living in this request
    pub fn holders(&self) -> Vec<HolderSnapshot> {
        self.holders.snapshot()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    pub(crate) fn clear_metadata(&self) {
        self.lock_metadata().clear();
    }

    pub(crate) fn add_listeners(&self, name: InstanceName, listeners: Vec<DestroyListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, listeners));
    }

    pub(crate) fn take_listeners(&self) -> Vec<(InstanceName, Vec<DestroyListener>)> {
        std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_metadata(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Any + Send + Sync>>> {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
