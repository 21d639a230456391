#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use wrapp_locator::{Container, ContainerBuilder, DynError, FactoryContext, Injectable, Token};

/// Records the order things happen in
#[derive(Default)]
pub struct Log(Mutex<Vec<String>>);
impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Counts constructions
#[derive(Default)]
pub struct Calls(AtomicUsize);
impl Calls {
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builder with a [Log] and a [Calls] instance registered
pub fn builder() -> ContainerBuilder {
    ContainerBuilder::new()
        .add_instance(&Token::<Log>::of(), Log::default())
        .add_instance(&Token::<Calls>::of(), Calls::default())
}

pub async fn log(container: &Container) -> Arc<Log> {
    container.get(&Token::<Log>::of()).await.unwrap()
}

pub async fn calls(container: &Container) -> usize {
    container.get(&Token::<Calls>::of()).await.unwrap().count()
}

/// Numbered by construction order
pub struct Counter {
    pub id: usize,
}
impl Injectable for Counter {
    async fn construct(ctx: &FactoryContext) -> Result<Self, DynError> {
        let calls = ctx.inject(&Token::<Calls>::of()).await?;
        Ok(Counter { id: calls.next() })
    }
}
