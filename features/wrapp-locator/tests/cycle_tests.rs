//! Circular dependencies, with and without cycle detection

mod common;

use std::time::Duration;

use common::builder;
use rstest::rstest;
use wrapp_locator::{
    Container, ContainerConfig, DiError, DynError, FactoryContext, Injectable, RegisterOptions,
    Token,
};

struct Alpha;
impl Injectable for Alpha {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        ctx.inject(&Token::<Beta>::of()).await?;
        Ok(Alpha)
    }
}

struct Beta;
impl Injectable for Beta {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        ctx.inject(&Token::<Alpha>::of()).await?;
        Ok(Beta)
    }
}

fn alpha_beta(config: ContainerConfig) -> Container {
    builder()
        .config(config)
        .add::<Alpha>(RegisterOptions::singleton())
        .add::<Beta>(RegisterOptions::singleton())
        .build()
}

#[rstest]
#[tokio::test]
async fn test_cycle_within_one_resolution_reports_path() {
    let container = alpha_beta(ContainerConfig::development());

    let err = container.get(&Token::<Alpha>::of()).await.err().unwrap();

    assert!(
        matches!(err, DiError::CircularDependency { ref path } if path == "Alpha -> Beta -> Alpha"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn test_cycle_without_detection_never_completes() {
    let container = alpha_beta(ContainerConfig::production());

    let result =
        tokio::time::timeout(Duration::from_millis(100), container.get(&Token::<Alpha>::of())).await;

    assert!(result.is_err(), "a cycle can't resolve without detection");
}

struct SlowAlpha;
impl Injectable for SlowAlpha {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.inject(&Token::<SlowBeta>::of()).await?;
        Ok(SlowAlpha)
    }
}

struct SlowBeta;
impl Injectable for SlowBeta {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.inject(&Token::<SlowAlpha>::of()).await?;
        Ok(SlowBeta)
    }
}

#[rstest]
#[tokio::test]
async fn test_cycle_between_concurrent_resolutions_fails_both() {
    let container = builder()
        .config(ContainerConfig::development())
        .add::<SlowAlpha>(RegisterOptions::singleton())
        .add::<SlowBeta>(RegisterOptions::singleton())
        .build();

    let alpha_token = Token::<SlowAlpha>::of();
    let beta_token = Token::<SlowBeta>::of();
    let (alpha, beta) = tokio::join!(
        container.get(&alpha_token),
        container.get(&beta_token)
    );

    assert!(matches!(alpha, Err(DiError::CircularDependency { .. })));
    assert!(matches!(beta, Err(DiError::CircularDependency { .. })));
}

/// Transients get no holder, so only the chain can reveal the loop
struct Loop;
impl Injectable for Loop {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        ctx.inject(&Token::<Loop>::of()).await?;
        Ok(Loop)
    }
}

#[rstest]
#[tokio::test]
async fn test_transient_loop_hits_depth_limit_without_detection() {
    let container = builder()
        .config(ContainerConfig::production().with_max_resolution_depth(10))
        .add::<Loop>(RegisterOptions::transient())
        .build();

    let err = container.get(&Token::<Loop>::of()).await.err().unwrap();

    assert!(matches!(err, DiError::MaxDepthExceeded(10)), "unexpected error: {err}");
}

#[rstest]
#[tokio::test]
async fn test_transient_loop_is_detected() {
    let container = builder()
        .config(ContainerConfig::development())
        .add::<Loop>(RegisterOptions::transient())
        .build();

    let err = container.get(&Token::<Loop>::of()).await.err().unwrap();

    assert!(matches!(err, DiError::CircularDependency { ref path } if path == "Loop -> Loop"));
}

struct Leaf;
impl Injectable for Leaf {
    async fn construct(_ctx: &FactoryContext) -> Result<Self, DynError> {
        Ok(Leaf)
    }
}

struct Diamond;
impl Injectable for Diamond {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let first_token = Token::<Leaf>::of();
        let second_token = Token::<Leaf>::of();
        let (first, second) = tokio::join!(
            ctx.inject(&first_token),
            ctx.inject(&second_token)
        );
        first?;
        second?;
        Ok(Diamond)
    }
}

#[rstest]
#[tokio::test]
async fn test_shared_dependency_is_not_a_cycle() {
    let container = builder()
        .config(ContainerConfig::development())
        .add::<Leaf>(RegisterOptions::singleton())
        .add::<Diamond>(RegisterOptions::singleton())
        .build();

    assert!(container.get(&Token::<Diamond>::of()).await.is_ok());
}
