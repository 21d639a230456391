use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::join_all;

use crate::{
    config::ContainerConfig,
    context::RequestContext,
    errors::{DestroyFailure, DiError},
    events::{LifecycleEvent, LifecycleEventBus},
    holder::{HolderSnapshot, HolderStatus, InstanceHolder},
    invalidator::{self, ClearOptions, ClearReport},
    manager::HolderManager,
    registry::Registry,
    resolver::{self, Caller},
    token::{InstanceName, ResolveRequest, Token},
    types::{downcast_instance, InjectionArgs, Service},
};

/// Service locator resolving registered tokens
///
/// Cloning is cheap, all clones share the same registry and instances.
#[derive(Clone)]
pub struct Container(Arc<ContainerInner>);
struct ContainerInner {
    registry: Arc<Registry>,
    global: HolderManager,
    requests: Mutex<HashMap<Arc<str>, Arc<RequestContext>>>,
    events: LifecycleEventBus,
    config: ContainerConfig,
}
impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("tokens", &self.0.registry.tokens().len())
            .field("holders", &self.0.global.len())
            .field("requests", &self.lock_requests().len())
            .field("config", &self.0.config)
            .finish()
    }
}

impl Container {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, ContainerConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: ContainerConfig) -> Self {
        Container(Arc::new(ContainerInner {
            registry,
            global: HolderManager::new(),
            requests: Mutex::new(HashMap::new()),
            events: LifecycleEventBus::new(),
            config,
        }))
    }

    /// Resolves `token`, constructing it if needed
    pub async fn get<T: Service>(&self, token: &Token<T>) -> Result<Arc<T>, DiError> {
        self.resolve_root(None, token.request()).await
    }

    /// Resolves a parameterized `token`, equal arguments resolve to the same instance
    pub async fn get_with<T: Service, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
        args: A,
    ) -> Result<Arc<T>, DiError> {
        self.resolve_root(None, token.request_with(args)?).await
    }

    /// The created singleton of `token`, without constructing anything
    pub fn get_cached<T: Service>(&self, token: &Token<T>) -> Option<Arc<T>> {
        let instance = self.0.global.peek(token.request().name())?;
        downcast_instance(instance).ok()
    }

    pub(crate) async fn resolve_root<T: Service>(
        &self,
        request: Option<&Arc<RequestContext>>,
        resolve: ResolveRequest,
    ) -> Result<Arc<T>, DiError> {
        let name = resolve.name.clone();
        let resolved = resolver::resolve(self, Caller::root(request), resolve).await?;

        if !resolved.held && !resolved.listeners.is_empty() {
            match request {
                Some(context) => context.add_listeners(name.clone(), resolved.listeners),
                None => tracing::debug!(
                    "Transient '{}' was resolved outside of a request, its destroy listeners never run",
                    name
                ),
            }
        }

        downcast_instance(resolved.instance).map_err(|expected| DiError::FactoryTokenNotResolved {
            token: name.to_string(),
            expected: expected.type_name,
        })
    }

    /// Starts a request, its request scoped instances live until [Container::end_request]
    pub fn begin_request(&self, request_id: impl Into<Arc<str>>) -> Result<ScopedContainer, DiError> {
        self.begin_request_with_priority(request_id, 0)
    }

    pub fn begin_request_with_priority(
        &self,
        request_id: impl Into<Arc<str>>,
        priority: i32,
    ) -> Result<ScopedContainer, DiError> {
        let request_id = request_id.into();
        let mut requests = self.lock_requests();
        if requests.contains_key(&request_id) {
            return Err(DiError::DuplicateRequest(request_id.to_string()));
        }

        tracing::debug!("Beginning request '{}'", request_id);
        let context = Arc::new(RequestContext::new(request_id.clone(), priority));
        requests.insert(request_id, context.clone());

        Ok(ScopedContainer {
            container: self.clone(),
            context,
        })
    }

    /// Handle of an active request
    pub fn scoped(&self, request_id: &str) -> Option<ScopedContainer> {
        let context = self.lock_requests().get(request_id)?.clone();
        Some(ScopedContainer {
            container: self.clone(),
            context,
        })
    }

    /// Ends a request, destroying all of its instances concurrently
    ///
    /// Ending an unknown request only logs a warning.
    pub async fn end_request(&self, request_id: &str) -> Vec<DestroyFailure> {
        let Some(context) = self.lock_requests().remove(request_id) else {
            tracing::warn!("Tried to end unknown request '{}'", request_id);
            return Vec::new();
        };
        context.mark_ended();

        let holders = context.holders.drain();
        let transients = context.take_listeners();
        tracing::debug!(
            "Ending request '{}' with {} holders",
            request_id,
            holders.len()
        );

        let teardowns = holders
            .into_iter()
            .map(|holder| self.teardown(&context, holder));
        let mut failures: Vec<DestroyFailure> =
            join_all(teardowns).await.into_iter().flatten().collect();

        let transient_teardowns = transients
            .into_iter()
            .map(|(name, listeners)| async move { invalidator::run_listeners(&name, listeners).await });
        failures.extend(join_all(transient_teardowns).await.into_iter().flatten());

        context.clear_metadata();
        failures
    }

    async fn teardown(&self, context: &RequestContext, mut holder: InstanceHolder) -> Vec<DestroyFailure> {
        if holder.status() == HolderStatus::Creating {
            holder.reject(DiError::RequestEnded {
                request_id: context.request_id().to_string(),
                instance: holder.name.to_string(),
            });
            holder.notify_destroyed();
            return Vec::new();
        }

        let namespace = holder.name.to_string();
        let _ = self.0.events.emit(&namespace, LifecycleEvent::PreDestroy).await;
        let listeners = std::mem::take(&mut holder.destroy_listeners);
        let failures = invalidator::run_listeners(&holder.name, listeners).await;
        holder.notify_destroyed();
        let _ = self.0.events.emit(&namespace, LifecycleEvent::PostDestroy).await;
        failures
    }

    /// Destroys `name` and, before it, everything depending on it
    pub async fn invalidate(&self, name: &InstanceName) -> Vec<DestroyFailure> {
        invalidator::invalidate(self, name).await
    }

    /// Invalidates every instance of `token`, whatever arguments it was built with
    pub async fn invalidate_token<T: Service, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
    ) -> Vec<DestroyFailure> {
        let mut names: Vec<InstanceName> = self.0.global.names();
        for context in self.request_contexts() {
            names.extend(context.holders.names());
        }
        names.retain(|name| name.token() == token.id());
        names.sort_by_key(ToString::to_string);
        names.dedup();

        let mut failures = Vec::new();
        for name in names {
            failures.extend(self.invalidate(&name).await);
        }
        failures
    }

    /// Destroys all instances, waiting for ongoing creations first
    pub async fn clear_all(&self, options: ClearOptions) -> ClearReport {
        let max_rounds = options.max_rounds.unwrap_or(self.0.config.max_clear_rounds);
        invalidator::clear_all(self, max_rounds).await
    }

    /// Completes once no instance is being created or destroyed
    pub async fn ready(&self) {
        invalidator::ready(self).await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.0.registry
    }

    pub fn events(&self) -> &LifecycleEventBus {
        &self.0.events
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.0.config
    }

    /// Name of the unparameterized instance of `token`
    pub fn instance_name<T: Service, A: InjectionArgs>(token: &Token<T, A>) -> InstanceName {
        InstanceName::of(token.id())
    }

    /// Singletons and their state
    pub fn holders(&self) -> Vec<HolderSnapshot> {
        self.0.global.snapshot()
    }

    pub fn active_requests(&self) -> Vec<String> {
        self.lock_requests().keys().map(|id| id.to_string()).collect()
    }

    pub(crate) fn global(&self) -> &HolderManager {
        &self.0.global
    }

    pub(crate) fn request_contexts(&self) -> Vec<Arc<RequestContext>> {
        self.lock_requests().values().cloned().collect()
    }

    fn lock_requests(&self) -> MutexGuard<'_, HashMap<Arc<str>, Arc<RequestContext>>> {
        self.0.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Container bound to one active request
#[derive(Clone, Debug)]
pub struct ScopedContainer {
    container: Container,
    context: Arc<RequestContext>,
}

impl ScopedContainer {
    pub async fn get<T: Service>(&self, token: &Token<T>) -> Result<Arc<T>, DiError> {
        self.container
            .resolve_root(Some(&self.context), token.request())
            .await
    }

    pub async fn get_with<T: Service, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
        args: A,
    ) -> Result<Arc<T>, DiError> {
        self.container
            .resolve_root(Some(&self.context), token.request_with(args)?)
            .await
    }

    /// The created instance of `token` in this request, or the created singleton
    pub fn get_cached<T: Service>(&self, token: &Token<T>) -> Option<Arc<T>> {
        let request = token.request();
        let instance = self
            .context
            .holders
            .peek(request.name())
            .or_else(|| self.container.global().peek(request.name()))?;
        downcast_instance(instance).ok()
    }

    pub async fn invalidate(&self, name: &InstanceName) -> Vec<DestroyFailure> {
        self.container.invalidate(name).await
    }

    pub fn set_metadata<V: Service>(&self, key: impl Into<String>, value: V) {
        self.context.set_metadata(key, value)
    }

    pub fn metadata<V: Service>(&self, key: &str) -> Option<Arc<V>> {
        self.context.metadata(key)
    }

    pub fn request_id(&self) -> &str {
        self.context.request_id()
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.context
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Ends the request, see [Container::end_request]
    pub async fn end(self) -> Vec<DestroyFailure> {
        self.container.end_request(self.context.request_id()).await
    }
}
