use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tracing_subscriber::EnvFilter;
use wrapp_locator::{
    ClearOptions, Container, ContainerBuilder, ContainerConfig, Dependency, DynError,
    FactoryContext, Injectable, RegisterOptions, Token,
};

static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let container = ContainerBuilder::new()
        .config(ContainerConfig::from_env()?)
        .add::<Counter>(RegisterOptions::singleton())
        .add::<RequestUser>(RegisterOptions::request())
        .add::<Greeter>(RegisterOptions::singleton())
        .build_checked()?;

    futures::executor::block_on(run(container))
}

async fn run(container: Container) -> Result<(), DynError> {
    let counter = container.get(&Token::<Counter>::of()).await?;
    println!("counter #{}", counter.id);

    for user in ["alice", "bob"] {
        let request = container.begin_request(format!("req-{user}"))?;
        request.set_metadata("user", user.to_string());

        let greeter = request.get(&Token::<Greeter>::of()).await?;
        println!("{}", greeter.greet());
        request.end().await;
    }

    container
        .invalidate(&Container::instance_name(&Token::<Counter>::of()))
        .await;
    let counter = container.get(&Token::<Counter>::of()).await?;
    println!("counter #{} after invalidation", counter.id);

    let report = container.clear_all(ClearOptions::default()).await;
    println!("{:?}", report);
    Ok(())
}

#[derive(Debug)]
struct Counter {
    id: usize,
}
impl Injectable for Counter {
    async fn construct(_ctx: &FactoryContext) -> Result<Self, DynError> {
        Ok(Counter {
            id: CONSTRUCTED.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn on_service_destroy(&self) -> Result<(), DynError> {
        println!("counter #{} destroyed", self.id);
        Ok(())
    }
}

#[derive(Debug)]
struct RequestUser(Arc<String>);
impl Injectable for RequestUser {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let user = ctx
            .request()
            .and_then(|request| request.metadata::<String>("user"))
            .ok_or("no user in request")?;
        Ok(RequestUser(user))
    }
}

/// Declared as a singleton, promoted to request scope because it needs the user
#[derive(Debug)]
struct Greeter {
    user: Arc<RequestUser>,
    counter: Arc<Counter>,
}
impl Greeter {
    fn greet(&self) -> String {
        format!("Hello {} (counter #{})", self.user.0, self.counter.id)
    }
}
impl Injectable for Greeter {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::on(&Token::<RequestUser>::of()),
            Dependency::on(&Token::<Counter>::of()),
        ]
    }

    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        Ok(Greeter {
            user: ctx.sync_inject(&Token::<RequestUser>::of())?,
            counter: ctx.sync_inject(&Token::<Counter>::of())?,
        })
    }
}
