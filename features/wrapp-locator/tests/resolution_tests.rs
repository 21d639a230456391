//! Tests for resolving singletons, transients, parameterized tokens and factories

mod common;

use std::{sync::Arc, time::Duration};

use common::{builder, calls, log, Calls, Counter, Log};
use rstest::rstest;
use serde::Serialize;
use wrapp_locator::{
    Container, Dependency, DiError, DynError, Factory, FactoryContext, HolderStatus, Injectable,
    RegisterOptions, Token,
};

#[rstest]
#[tokio::test]
async fn test_singleton_is_constructed_once() {
    let container = builder()
        .add::<Counter>(RegisterOptions::singleton())
        .build();
    let token = Token::<Counter>::of();

    let first = container.get(&token).await.unwrap();
    for _ in 0..4 {
        let again = container.get(&token).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    assert_eq!(first.id, 1);
    assert_eq!(calls(&container).await, 1);
}

#[rstest]
#[tokio::test]
async fn test_transient_is_constructed_every_time() {
    let container = builder()
        .add::<Counter>(RegisterOptions::transient())
        .build();
    let token = Token::<Counter>::of();

    let first = container.get(&token).await.unwrap();
    let second = container.get(&token).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(calls(&container).await, 2);
    assert!(container.get_cached(&token).is_none());
}

struct Slow {
    id: usize,
}
impl Injectable for Slow {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let calls = ctx.inject(&Token::<Calls>::of()).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(Slow { id: calls.next() })
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_share_one_construction() {
    let container = builder().add::<Slow>(RegisterOptions::singleton()).build();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move { container.get(&Token::<Slow>::of()).await })
        })
        .collect();

    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap().unwrap());
    }

    assert!(instances.iter().all(|slow| Arc::ptr_eq(slow, &instances[0])));
    assert_eq!(instances[0].id, 1);
    assert_eq!(calls(&container).await, 1);
}

#[derive(Serialize, Clone)]
struct PoolArgs {
    size: u32,
}

struct Pool {
    size: u32,
}
impl Injectable for Pool {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let args = ctx.args::<PoolArgs>()?;
        Ok(Pool { size: args.size })
    }
}

fn pool_token() -> Token<Pool, PoolArgs> {
    Token::with_schema("pool", |args: PoolArgs| {
        if args.size == 0 {
            Err("size must be positive".to_string())
        } else {
            Ok(args)
        }
    })
}

#[rstest]
#[tokio::test]
async fn test_equal_arguments_share_an_instance() {
    let token = pool_token();
    let container = builder()
        .add_as(&token, RegisterOptions::singleton())
        .build();

    let small = container.get_with(&token, PoolArgs { size: 4 }).await.unwrap();
    let small_again = container.get_with(&token, PoolArgs { size: 4 }).await.unwrap();
    let large = container.get_with(&token, PoolArgs { size: 8 }).await.unwrap();

    assert!(Arc::ptr_eq(&small, &small_again));
    assert!(!Arc::ptr_eq(&small, &large));
    assert_eq!((small.size, large.size), (4, 8));
}

#[rstest]
#[tokio::test]
async fn test_schema_rejects_arguments_before_construction() {
    let token = pool_token();
    let container = builder()
        .add_as(&token, RegisterOptions::singleton())
        .build();

    let err = container
        .get_with(&token, PoolArgs { size: 0 })
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DiError::InvalidArguments { ref token, .. } if token == "pool"));
    assert!(container.holders().iter().all(|holder| holder.name.token() != token.id()));
}

#[rstest]
#[tokio::test]
async fn test_unregistered_token_is_factory_not_found() {
    let container = Container::new(Default::default());
    let err = container.get(&Token::<Counter>::of()).await.err().unwrap();
    assert!(matches!(err, DiError::FactoryNotFound(ref name) if name == "Counter"));
}

struct Host(String);

struct UrlFactory {
    scheme: &'static str,
}
impl Factory for UrlFactory {
    type Provides = String;
    type Args = ();

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::on(&Token::<Host>::of())]
    }

    async fn create<'a>(
        &'a self,
        ctx: &'a FactoryContext,
        _args: (),
    ) -> Result<String, DynError> {
        let host = ctx.sync_inject(&Token::<Host>::of())?;
        Ok(format!("{}://{}", self.scheme, host.0))
    }
}

#[rstest]
#[tokio::test]
async fn test_factory_receives_declared_dependencies() {
    let url = Token::<String>::new("url");
    let container = builder()
        .add_instance(&Token::<Host>::of(), Host("example.org".to_string()))
        .add_factory(&url, UrlFactory { scheme: "https" }, RegisterOptions::singleton())
        .build();

    let resolved = container.get(&url).await.unwrap();
    assert_eq!(resolved.as_str(), "https://example.org");

    let holder = container
        .holders()
        .into_iter()
        .find(|holder| holder.name.token() == url.id())
        .unwrap();
    assert_eq!(holder.status, HolderStatus::Created);
    assert_eq!(
        holder.dependencies,
        vec![Container::instance_name(&Token::<Host>::of())]
    );
}

#[rstest]
#[tokio::test]
async fn test_higher_priority_registration_wins() {
    let url = Token::<String>::new("url");
    let container = builder()
        .add_instance(&Token::<Host>::of(), Host("example.org".to_string()))
        .add_factory(&url, UrlFactory { scheme: "http" }, RegisterOptions::singleton())
        .add_factory(
            &url,
            UrlFactory { scheme: "https" },
            RegisterOptions::singleton().with_priority(10),
        )
        .build();

    assert_eq!(container.get(&url).await.unwrap().as_str(), "https://example.org");
    assert_eq!(container.registry().get_all(url.id()).len(), 2);
}

/// Uses `sync_inject` without declaring the dependency
struct Impatient;
impl Injectable for Impatient {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        ctx.sync_inject(&Token::<Counter>::of())?;
        Ok(Impatient)
    }
}

#[rstest]
#[tokio::test]
async fn test_sync_inject_of_unresolved_dependency_fails() {
    let container = builder()
        .add::<Counter>(RegisterOptions::singleton())
        .add::<Impatient>(RegisterOptions::transient())
        .build();

    let err = container.get(&Token::<Impatient>::of()).await.err().unwrap();
    assert!(matches!(err, DiError::NotResolvedSynchronously(ref name) if name == "Counter"));

    // Once the dependency is cached it is available synchronously
    container.get(&Token::<Counter>::of()).await.unwrap();
    assert!(container.get(&Token::<Impatient>::of()).await.is_ok());
}

struct Broken;
impl Injectable for Broken {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        ctx.inject(&Token::<Calls>::of()).await?.next();
        Err("connection refused".into())
    }
}

#[rstest]
#[tokio::test]
async fn test_construction_error_is_kept_until_invalidated() {
    let container = builder().add::<Broken>(RegisterOptions::singleton()).build();
    let token = Token::<Broken>::of();

    for _ in 0..2 {
        let err = container.get(&token).await.err().unwrap();
        assert!(matches!(err, DiError::Unknown { ref token, .. } if token == "Broken"));
        assert!(err.to_string().contains("connection refused"));
    }
    assert_eq!(calls(&container).await, 1);

    container.invalidate(&Container::instance_name(&token)).await;
    assert!(container.get(&token).await.is_err());
    assert_eq!(calls(&container).await, 2);
}

struct FailsInit;
impl Injectable for FailsInit {
    async fn construct(_ctx: &FactoryContext) -> Result<Self, DynError> {
        Ok(FailsInit)
    }

    async fn on_service_init(&self) -> Result<(), DynError> {
        Err("not ready".into())
    }
}

#[rstest]
#[tokio::test]
async fn test_failing_init_hook_fails_resolution() {
    let container = builder()
        .add::<FailsInit>(RegisterOptions::singleton())
        .build();

    let err = container.get(&Token::<FailsInit>::of()).await.err().unwrap();

    assert!(matches!(err, DiError::Unknown { .. }));
    assert!(container.get_cached(&Token::<FailsInit>::of()).is_none());
}

struct HalfOpen;
impl Injectable for HalfOpen {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let log = ctx.inject(&Token::<Log>::of()).await?;
        ctx.add_destroy_listener(move || async move {
            log.push("socket closed");
            Ok::<(), DynError>(())
        });
        Err("handshake failed".into())
    }
}

#[rstest]
#[tokio::test]
async fn test_failed_construction_runs_its_listeners() {
    let container = builder()
        .add::<HalfOpen>(RegisterOptions::singleton())
        .build();

    let err = container.get(&Token::<HalfOpen>::of()).await.err().unwrap();

    assert!(err.to_string().contains("handshake failed"));
    assert_eq!(log(&container).await.entries(), vec!["socket closed"]);
}

struct Connection {
    log: Arc<Log>,
}

/// Opens connections, and sees them through their lifecycle
struct ConnectionFactory {
    fail_init: bool,
}
impl Factory for ConnectionFactory {
    type Provides = Connection;
    type Args = ();

    async fn create<'a>(
        &'a self,
        ctx: &'a FactoryContext,
        _args: (),
    ) -> Result<Connection, DynError> {
        Ok(Connection {
            log: ctx.inject(&Token::<Log>::of()).await?,
        })
    }

    async fn on_service_init<'a>(&'a self, connection: &'a Connection) -> Result<(), DynError> {
        connection.log.push("opened");
        if self.fail_init {
            return Err("no route to host".into());
        }
        Ok(())
    }

    async fn on_service_destroy<'a>(&'a self, connection: &'a Connection) -> Result<(), DynError> {
        connection.log.push("closed");
        Ok(())
    }
}

#[rstest]
#[case::initialized(false, vec!["opened"])]
#[case::failed_init(true, vec!["opened", "closed"])]
#[tokio::test]
async fn test_factory_lifecycle_hooks(#[case] fail_init: bool, #[case] after_get: Vec<&str>) {
    let token = Token::<Connection>::new("connection");
    let container = builder()
        .add_factory(&token, ConnectionFactory { fail_init }, RegisterOptions::singleton())
        .build();

    assert_eq!(container.get(&token).await.is_err(), fail_init);
    assert_eq!(log(&container).await.entries(), after_get);

    container.invalidate(&Container::instance_name(&token)).await;

    assert_eq!(log(&container).await.entries(), vec!["opened", "closed"]);
}
