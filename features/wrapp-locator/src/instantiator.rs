use futures::future::try_join_all;

use crate::{
    context::{FactoryContext, Tracked},
    errors::DiError,
    factories::DestroyListener,
    invalidator,
    manager::Dependencies,
    registry::{FactoryRecord, Scope},
    types::{AnyInstance, TypeInfo},
};

/// A constructed and initialized instance
pub(crate) struct Built {
    pub instance: AnyInstance,
    pub type_info: TypeInfo,
    pub dependencies: Dependencies,
    pub listeners: Vec<DestroyListener>,
    pub request_bound: bool,
}

/// Constructs the target of `record`
///
/// 1. Declared dependencies are resolved concurrently
/// 2. The target is created, it can pick those up with `sync_inject`
/// 3. The init hook runs, its failure fails the construction
///
/// A failed attempt releases whatever it acquired: destroy listeners registered so far run
/// before the error is returned, the destroy hook too once the instance exists.
pub(crate) async fn instantiate(
    mut ctx: FactoryContext,
    record: &FactoryRecord,
) -> Result<Built, DiError> {
    let target = &record.target;

    let requests = target
        .dependencies()
        .into_iter()
        .map(|dependency| dependency.request)
        .collect::<Result<Vec<_>, _>>()?;

    if !requests.is_empty() {
        let ctx_ref = &ctx;
        let prefetched = try_join_all(requests.into_iter().map(|request| async move {
            let name = request.name.clone();
            ctx_ref.resolve(request).await.map(|instance| (name, instance))
        }))
        .await;
        match prefetched {
            Ok(prefetched) => ctx.prefetched.extend(prefetched),
            Err(error) => return Err(discard(ctx, None, error).await),
        }
    }

    // Promote before running user code if possible
    if let Err(error) = promote_if_request_bound(&ctx) {
        return Err(discard(ctx, None, error).await);
    }

    let created = target.create(&ctx).await;
    let instance = match created {
        Ok(instance) => instance,
        Err(error) => {
            let error = DiError::from_user(ctx.name(), error);
            return Err(discard(ctx, None, error).await);
        }
    };

    if let Err(error) = promote_if_request_bound(&ctx) {
        let hook = target.destroy_listener(&instance);
        return Err(discard(ctx, hook, error).await);
    }

    let initialized = target.on_init(&instance).await;
    if let Err(error) = initialized {
        let error = DiError::from_user(ctx.name(), error);
        let hook = target.destroy_listener(&instance);
        return Err(discard(ctx, hook, error).await);
    }

    let request_bound = ctx.is_request_bound();
    let destroy_hook = target.destroy_listener(&instance);
    let Tracked {
        dependencies,
        mut listeners,
    } = ctx.into_tracked();
    listeners.extend(destroy_hook);

    Ok(Built {
        instance,
        type_info: target.supplies(),
        dependencies,
        listeners,
        request_bound,
    })
}

/// Runs the listeners of an attempt that is thrown away, then hands back its error
async fn discard(ctx: FactoryContext, hook: Option<DestroyListener>, error: DiError) -> DiError {
    let name = ctx.name().clone();
    let mut listeners = ctx.into_tracked().listeners;
    listeners.extend(hook);

    if !listeners.is_empty() {
        tracing::debug!(
            "Releasing {} destroy listeners of discarded '{}': {}",
            listeners.len(),
            name,
            error
        );
        invalidator::run_listeners(&name, listeners).await;
    }
    error
}

/// A singleton depending on request scoped instances becomes request scoped itself
fn promote_if_request_bound(ctx: &FactoryContext) -> Result<(), DiError> {
    if ctx.scope != Scope::Singleton || !ctx.is_request_bound() {
        return Ok(());
    }

    tracing::debug!(
        "'{}' depends on request scoped instances, promoting it to request scope",
        ctx.name()
    );
    ctx.container()
        .registry()
        .update_scope(ctx.name().token(), Scope::Request);
    Err(DiError::ScopePromoted(ctx.name().to_string()))
}
