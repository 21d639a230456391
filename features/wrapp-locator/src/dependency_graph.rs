use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::{errors::DiError, registry::Registry, token::TokenId};

/// Graph of all declared dependencies in a registry
/// Used to find missing registrations and circular dependencies before anything is resolved
///
/// Only dependencies declared up front are known, whatever a constructor resolves on its own is not.
pub struct DependencyGraph {
    map: BTreeMap<String, DependencyGraphEntry>,
    names: HashMap<TokenId, String>,
}
impl DependencyGraph {
    pub fn new(registry: &Registry) -> Self {
        let mut graph = Self {
            map: Default::default(),
            names: Default::default(),
        };

        for token in registry.tokens() {
            let Ok(record) = registry.get(&token) else {
                continue;
            };
            let dependencies = record
                .target
                .dependencies()
                .into_iter()
                .map(|dependency| {
                    let token = dependency.token().clone();
                    dependency.request.map(|_| token)
                })
                .collect();
            graph.add(token, dependencies);
        }

        graph
    }

    fn add(&mut self, token: TokenId, dependencies: Vec<Result<TokenId, DiError>>) {
        // Names of explicit tokens may repeat, the key must not
        let key = format!("{token:?}");
        self.names.insert(token.clone(), key.clone());
        self.map
            .insert(key, DependencyGraphEntry { token, dependencies });
    }

    /// Tokens the registered target of `token` declares as dependencies
    pub fn dependencies_of(&self, token: &TokenId) -> Vec<TokenId> {
        self.names
            .get(token)
            .and_then(|key| self.map.get(key))
            .map(|entry| {
                entry
                    .dependencies
                    .iter()
                    .filter_map(|dependency| dependency.as_ref().ok().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for entry in self.map.values() {
            let mut dependency_chain = Vec::new();
            check_recurse(
                self,
                &mut checked,
                &mut errors,
                &mut dependency_chain,
                entry,
            );
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse(
            graph: &DependencyGraph,
            checked: &mut HashSet<TokenId>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<TokenId>,
            entry: &DependencyGraphEntry,
        ) {
            // Circular Dependency Check
            if let Some(start) = dependency_chain.iter().position(|token| token == &entry.token) {
                let mut chain: Vec<String> = dependency_chain[start..]
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                chain.push(entry.token.to_string());

                errors.push(DependencyGraphError::CircularDependency {
                    chain: chain.join(" -> "),
                });
                return;
            }

            // Skip other checks if already checked
            if !checked.insert(entry.token.clone()) {
                return;
            };

            dependency_chain.push(entry.token.clone());

            for dependency in &entry.dependencies {
                let dependency = match dependency {
                    Ok(dependency) => dependency,
                    Err(error) => {
                        errors.push(DependencyGraphError::InvalidDependency {
                            required_by: entry.token.to_string(),
                            error: error.clone(),
                        });
                        continue;
                    }
                };

                let Some(next_entry) = graph
                    .names
                    .get(dependency)
                    .and_then(|key| graph.map.get(key))
                else {
                    errors.push(DependencyGraphError::MissingDependency {
                        dependency: dependency.to_string(),
                        required_by: entry.token.to_string(),
                    });
                    continue;
                };

                check_recurse(graph, checked, errors, dependency_chain, next_entry);
            }

            dependency_chain.pop();
        }
    }
}

struct DependencyGraphEntry {
    token: TokenId,
    dependencies: Vec<Result<TokenId, DiError>>,
}

#[derive(Error, Debug, Clone)]
pub enum DependencyGraphError {
    #[error("'{required_by}' needs '{dependency}' but it is missing")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },
    #[error("'{required_by}' declares an invalid dependency: {error}")]
    InvalidDependency { required_by: String, error: DiError },
    #[error("A Circular Dependency exists: {chain} - Consider resolving one side with `inject` inside the constructor")]
    CircularDependency { chain: String },
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}
