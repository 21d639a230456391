use std::{any::Any, future::Future, marker::PhantomData, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    context::FactoryContext,
    errors::DiError,
    token::{ResolveRequest, Token, TokenId},
    types::{AnyInstance, DynError, InjectionArgs, Service, TypeInfo},
};

/// Future of a destroy listener
pub type DestroyFuture = BoxFuture<'static, Result<(), DynError>>;
/// Runs once when the instance it belongs to is torn down
pub type DestroyListener = Box<dyn FnOnce() -> DestroyFuture + Send>;

/// A type the container can construct itself (class registration)
///
/// Construction happens in two phases:
/// 1. Everything returned by [Injectable::dependencies] is resolved
/// 2. [Injectable::construct] runs, and can pick those up synchronously with [FactoryContext::sync_inject]
///
/// Anything not declared up front can still be resolved with [FactoryContext::inject].
pub trait Injectable: Service + Sized {
    /// Dependencies resolved before `construct` is called
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Builds the instance
    fn construct(ctx: &FactoryContext) -> impl Future<Output = Result<Self, DynError>> + Send + '_;

    /// Called once after construction, a failure fails the resolution
    fn on_service_init(&self) -> impl Future<Output = Result<(), DynError>> + Send + '_ {
        async { Ok(()) }
    }

    /// Called when the instance is invalidated or its request ends
    fn on_service_destroy(&self) -> impl Future<Output = Result<(), DynError>> + Send + '_ {
        async { Ok(()) }
    }
}

/// A factory providing instances of a given type (factory registration)
pub trait Factory: Send + Sync + 'static {
    type Provides: Service;
    type Args: InjectionArgs + Clone;

    /// Dependencies resolved before `create` is called
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Creates a new instance for the given arguments
    fn create<'a>(
        &'a self,
        ctx: &'a FactoryContext,
        args: Self::Args,
    ) -> impl Future<Output = Result<Self::Provides, DynError>> + Send + 'a;

    /// Called once after `create`, a failure fails the resolution
    fn on_service_init<'a>(
        &'a self,
        _instance: &'a Self::Provides,
    ) -> impl Future<Output = Result<(), DynError>> + Send + 'a {
        async { Ok(()) }
    }

    /// Called when an instance this factory created is invalidated or its request ends
    fn on_service_destroy<'a>(
        &'a self,
        _instance: &'a Self::Provides,
    ) -> impl Future<Output = Result<(), DynError>> + Send + 'a {
        async { Ok(()) }
    }
}

/// A dependency declared before construction
pub struct Dependency {
    token: TokenId,
    pub(crate) request: Result<ResolveRequest, DiError>,
}
impl Dependency {
    pub fn on<T: Service>(token: &Token<T>) -> Self {
        Dependency {
            token: token.id().clone(),
            request: Ok(token.request()),
        }
    }

    /// Depends on a parameterized token - invalid arguments fail the construction
    pub fn with_args<T: Service, A: InjectionArgs>(token: &Token<T, A>, args: A) -> Self {
        Dependency {
            token: token.id().clone(),
            request: token.request_with(args),
        }
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }
}

/// Wrapper Trait for factories, providing instances of Any
pub trait DynFactory: Send + Sync {
    /// The type this factory produces
    fn supplies(&self) -> TypeInfo;

    /// Returns a list of dependencies resolved before construction
    fn dependencies(&self) -> Vec<Dependency>;

    /// Constructs a new instance, arguments are taken from the context
    fn create<'a>(&'a self, ctx: &'a FactoryContext)
        -> BoxFuture<'a, Result<AnyInstance, DynError>>;

    /// Runs the init hook of a freshly created instance
    fn on_init<'a>(&'a self, instance: &'a AnyInstance) -> BoxFuture<'a, Result<(), DynError>>;

    /// Listener running the destroy hook of the instance, if there is one
    fn destroy_listener(&self, instance: &AnyInstance) -> Option<DestroyListener>;
}

/// [DynFactory] of an [Injectable]
pub(crate) struct ClassFactory<T>(PhantomData<fn() -> T>);
impl<T> ClassFactory<T> {
    pub(crate) fn new() -> Self {
        ClassFactory(PhantomData)
    }
}
impl<T: Injectable> DynFactory for ClassFactory<T> {
    fn supplies(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        T::dependencies()
    }

    fn create<'a>(
        &'a self,
        ctx: &'a FactoryContext,
    ) -> BoxFuture<'a, Result<AnyInstance, DynError>> {
        async move {
            let instance = T::construct(ctx).await?;
            Ok(Arc::new(instance) as AnyInstance)
        }
        .boxed()
    }

    fn on_init<'a>(&'a self, instance: &'a AnyInstance) -> BoxFuture<'a, Result<(), DynError>> {
        async move {
            match instance.downcast_ref::<T>() {
                Some(instance) => instance.on_service_init().await,
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn destroy_listener(&self, instance: &AnyInstance) -> Option<DestroyListener> {
        let instance = Arc::downcast::<T>(instance.clone()).ok()?;
        Some(Box::new(move || {
            async move { instance.on_service_destroy().await }.boxed()
        }))
    }
}

/// [DynFactory] of a [Factory]
///
/// Shared, so destroy listeners can outlive the borrow they were created from
pub(crate) struct FnFactory<F>(pub(crate) Arc<F>);
impl<F: Factory> DynFactory for FnFactory<F> {
    fn supplies(&self) -> TypeInfo {
        TypeInfo::of::<F::Provides>()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.0.dependencies()
    }

    fn create<'a>(
        &'a self,
        ctx: &'a FactoryContext,
    ) -> BoxFuture<'a, Result<AnyInstance, DynError>> {
        async move {
            let args = factory_args::<F::Args>(ctx)?;
            let instance = self.0.create(ctx, args).await?;
            Ok(Arc::new(instance) as AnyInstance)
        }
        .boxed()
    }

    fn on_init<'a>(&'a self, instance: &'a AnyInstance) -> BoxFuture<'a, Result<(), DynError>> {
        async move {
            match instance.downcast_ref::<F::Provides>() {
                Some(instance) => self.0.on_service_init(instance).await,
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn destroy_listener(&self, instance: &AnyInstance) -> Option<DestroyListener> {
        let instance = Arc::downcast::<F::Provides>(instance.clone()).ok()?;
        let factory = self.0.clone();
        Some(Box::new(move || {
            async move { factory.on_service_destroy(&instance).await }.boxed()
        }))
    }
}

/// Arguments for a factory call - a factory taking `()` may be called without arguments
fn factory_args<A: InjectionArgs + Clone>(ctx: &FactoryContext) -> Result<A, DiError> {
    let args = match ctx.erased_args() {
        Some(args) => args.downcast_ref::<A>(),
        None => (&() as &dyn Any).downcast_ref::<A>(),
    };

    args.cloned().ok_or_else(|| DiError::InvalidArguments {
        token: ctx.name().to_string(),
        reason: format!("factory expects '{}'", std::any::type_name::<A>()),
    })
}

/// [DynFactory] handing out an already created value
pub(crate) struct ValueFactory<T>(pub(crate) Arc<T>);
impl<T: Service> DynFactory for ValueFactory<T> {
    fn supplies(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn create<'a>(
        &'a self,
        _ctx: &'a FactoryContext,
    ) -> BoxFuture<'a, Result<AnyInstance, DynError>> {
        let instance: AnyInstance = self.0.clone();
        async move { Ok(instance) }.boxed()
    }

    fn on_init<'a>(&'a self, _instance: &'a AnyInstance) -> BoxFuture<'a, Result<(), DynError>> {
        async { Ok(()) }.boxed()
    }

    fn destroy_listener(&self, _instance: &AnyInstance) -> Option<DestroyListener> {
        None
    }
}
