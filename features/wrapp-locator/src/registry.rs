//! Maps tokens to the factory records able to produce them

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    dependency_graph::{DependencyGraph, DependencyGraphErrors},
    errors::DiError,
    factories::{ClassFactory, DynFactory, Factory, FnFactory, Injectable, ValueFactory},
    token::{Token, TokenId},
    types::{InjectionArgs, Service},
};

/// Lifetime of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One instance for the whole container
    Singleton,
    /// One instance per request
    Request,
    /// A new instance for every resolution
    Transient,
}

/// How the target of a record is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    /// An [Injectable] constructing itself
    Class,
    /// A [Factory] or a registered value
    Factory,
}

/// A registered way to produce the value behind a token
#[derive(Clone)]
pub struct FactoryRecord {
    pub scope: Scope,
    /// The token the target was first registered under
    pub original_token: TokenId,
    pub target: Arc<dyn DynFactory>,
    pub kind: FactoryKind,
    /// Highest priority wins
    pub priority: i32,
    /// Singletons older than this are rebuilt on next access
    pub ttl: Option<Duration>,
}
impl Debug for FactoryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRecord")
            .field("scope", &self.scope)
            .field("original_token", &self.original_token)
            .field("target", &self.target.supplies().type_name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Options used when registering
#[derive(Debug, Clone, Copy)]
pub struct RegisterOptions {
    pub scope: Scope,
    pub priority: i32,
    pub ttl: Option<Duration>,
}
impl Default for RegisterOptions {
    fn default() -> Self {
        Self::singleton()
    }
}
impl RegisterOptions {
    pub fn singleton() -> Self {
        Self::scoped(Scope::Singleton)
    }

    pub fn request() -> Self {
        Self::scoped(Scope::Request)
    }

    pub fn transient() -> Self {
        Self::scoped(Scope::Transient)
    }

    pub fn scoped(scope: Scope) -> Self {
        RegisterOptions {
            scope,
            priority: 0,
            ttl: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only applies to singletons
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Registry of all factory records, optionally layered on top of a parent registry.
///
/// Lookups fall through to the parent when a token is not registered locally.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<TokenId, Vec<FactoryRecord>>>,
    parent: Option<Arc<Registry>>,
}
impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (token, records) in factories.iter() {
            map.entry(token, records);
        }
        map.finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Registry>) -> Self {
        Registry {
            factories: Default::default(),
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Registry>> {
        self.parent.as_ref()
    }

    /// Adds a candidate for `token`
    pub fn set(&self, token: &TokenId, record: FactoryRecord) {
        tracing::debug!(
            "Registering {} for '{}' ({:?}, priority {})",
            record.target.supplies().type_name,
            token,
            record.scope,
            record.priority
        );
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        let records = factories.entry(token.clone()).or_default();
        records.push(record);
        // Stable, so equal priorities keep registration order
        records.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// The highest priority record for `token`
    pub fn get(&self, token: &TokenId) -> Result<FactoryRecord, DiError> {
        {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = factories.get(token).and_then(|records| records.first()) {
                return Ok(record.clone());
            }
        }

        match &self.parent {
            Some(parent) => parent.get(token),
            None => Err(DiError::FactoryNotFound(token.to_string())),
        }
    }

    /// All records for `token`, highest priority first
    pub fn get_all(&self, token: &TokenId) -> Vec<FactoryRecord> {
        {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(records) = factories.get(token).filter(|records| !records.is_empty()) {
                return records.clone();
            }
        }

        match &self.parent {
            Some(parent) => parent.get_all(token),
            None => Vec::new(),
        }
    }

    pub fn has(&self, token: &TokenId) -> bool {
        let local = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories.get(token).is_some_and(|records| !records.is_empty())
        };
        local || self.parent.as_ref().is_some_and(|parent| parent.has(token))
    }

    /// Removes all records of `token`, from the parent if it is not registered here
    ///
    /// Returns false if nothing was removed
    pub fn delete(&self, token: &TokenId) -> bool {
        let removed = {
            let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
            factories.remove(token).is_some()
        };
        removed || self.parent.as_ref().is_some_and(|parent| parent.delete(token))
    }

    /// Changes the scope of every record of `token`
    ///
    /// Returns false if the token is unknown
    pub fn update_scope(&self, token: &TokenId, scope: Scope) -> bool {
        {
            let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(records) = factories.get_mut(token) {
                for record in records.iter_mut() {
                    record.scope = scope;
                }
                return true;
            }
        }

        self.parent
            .as_ref()
            .is_some_and(|parent| parent.update_scope(token, scope))
    }

    /// All registered tokens, including the parent's
    pub fn tokens(&self) -> Vec<TokenId> {
        let mut tokens: Vec<TokenId> = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories.keys().cloned().collect()
        };
        if let Some(parent) = &self.parent {
            for token in parent.tokens() {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    /// Registers `T` under its implicit token
    pub fn register<T: Injectable>(&self, options: RegisterOptions) -> Token<T> {
        let token = Token::<T>::of();
        self.register_as(&token, options);
        token
    }

    /// Registers `T` under an explicit token, arguments are available through [crate::FactoryContext::args]
    pub fn register_as<T: Injectable, A: InjectionArgs>(
        &self,
        token: &Token<T, A>,
        options: RegisterOptions,
    ) {
        self.set_target(token.id(), Arc::new(ClassFactory::<T>::new()), FactoryKind::Class, options);
    }

    /// Registers a factory producing the token's type
    pub fn register_factory<F: Factory>(
        &self,
        token: &Token<F::Provides, F::Args>,
        factory: F,
        options: RegisterOptions,
    ) {
        self.set_target(
            token.id(),
            Arc::new(FnFactory(Arc::new(factory))),
            FactoryKind::Factory,
            options,
        );
    }

    /// Registers an already created singleton value
    pub fn register_instance<T: Service>(&self, token: &Token<T>, value: T) {
        self.register_shared(token, Arc::new(value));
    }

    /// Registers an already created and shared singleton value
    pub fn register_shared<T: Service>(&self, token: &Token<T>, value: Arc<T>) {
        self.set_target(
            token.id(),
            Arc::new(ValueFactory(value)),
            FactoryKind::Factory,
            RegisterOptions::singleton(),
        );
    }

    fn set_target(
        &self,
        token: &TokenId,
        target: Arc<dyn DynFactory>,
        kind: FactoryKind,
        options: RegisterOptions,
    ) {
        self.set(
            token,
            FactoryRecord {
                scope: options.scope,
                original_token: token.clone(),
                target,
                kind,
                priority: options.priority,
                ttl: options.ttl,
            },
        );
    }

    /// Checks declared dependencies for missing registrations and cycles
    pub fn validate(&self) -> Result<(), DependencyGraphErrors> {
        DependencyGraph::new(self).check()
    }
}
