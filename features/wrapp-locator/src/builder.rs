use std::sync::Arc;

use crate::{
    config::ContainerConfig,
    container::Container,
    dependency_graph::DependencyGraphErrors,
    factories::{Factory, Injectable},
    registry::{RegisterOptions, Registry},
    token::Token,
    types::{InjectionArgs, Service},
};

//////////////////////////////////////////////////////////////////////
///
/// Setting up a container has two parts.
/// 1. The builder, where one registers all classes, factories and instances
/// 2. The container, resolving them lazily on first use

pub struct ContainerBuilder {
    registry: Registry,
    config: ContainerConfig,
}
impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder {
            registry: Registry::new(),
            config: ContainerConfig::default(),
        }
    }

    /// Tokens not registered here are looked up in `parent`
    pub fn with_parent(parent: Arc<Registry>) -> Self {
        ContainerBuilder {
            registry: Registry::with_parent(parent),
            config: ContainerConfig::default(),
        }
    }
}
impl ContainerBuilder {
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers `T` under its implicit token
    pub fn add<T: Injectable>(self, options: RegisterOptions) -> Self {
        self.registry.register::<T>(options);
        self
    }

    pub fn add_as<T: Injectable, A: InjectionArgs>(
        self,
        token: &Token<T, A>,
        options: RegisterOptions,
    ) -> Self {
        self.registry.register_as(token, options);
        self
    }

    pub fn add_factory<F: Factory>(
        self,
        token: &Token<F::Provides, F::Args>,
        factory: F,
        options: RegisterOptions,
    ) -> Self {
        self.registry.register_factory(token, factory, options);
        self
    }

    pub fn add_instance<T: Service>(self, token: &Token<T>, instance: T) -> Self {
        self.registry.register_instance(token, instance);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn build(self) -> Container {
        tracing::debug!(
            "Building container with {} registered tokens",
            self.registry.tokens().len()
        );
        Container::with_config(Arc::new(self.registry), self.config)
    }

    /// Like [ContainerBuilder::build], but checks declared dependencies first
    pub fn build_checked(self) -> Result<Container, DependencyGraphErrors> {
        self.registry.validate()?;
        Ok(self.build())
    }
}
