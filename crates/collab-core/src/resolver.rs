use crate::config::EngineConfig;
use crate::error::{CollabError, Result};
use crate::manifest::DEFAULT_CACHE_STRATEGY;
use crate::registry::Registry;
use crate::store::{Artifact, ArtifactStore};
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::BTreeMap;

/// Applied to a command's base duration when optimization data is available.
pub const OPTIMIZATION_DURATION_FACTOR: f64 = 0.8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationData {
    pub artifact: Artifact,
    pub enhancement_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub pre_steps: Vec<String>,
    pub post_steps: Vec<String>,
    pub cache_strategy: String,
    /// Seconds.
    pub estimated_duration: f64,
    pub optimization_available: bool,
    pub data_sources: Vec<String>,
}

/// Everything a command needs to know before it runs. Built fresh for every
/// call and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub command: String,
    pub available_data: BTreeMap<String, Artifact>,
    pub optimization_data: BTreeMap<String, OptimizationData>,
    pub missing_dependencies: Vec<String>,
    pub execution_plan: ExecutionPlan,
}

impl ExecutionContext {
    /// True when every required dependency has an artifact. Whether to run
    /// anyway is the caller's call.
    pub fn is_ready(&self) -> bool {
        self.missing_dependencies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<'a> {
    ws: &'a Workspace,
    config: &'a EngineConfig,
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(ws: &'a Workspace, config: &'a EngineConfig, registry: &'a Registry) -> Self {
        Self {
            ws,
            config,
            registry,
        }
    }

    /// Build the execution context for `command`.
    ///
    /// Unknown commands are a configuration error. Missing required
    /// dependencies are reported in the context, not as an error; stale
    /// artifacts still satisfy them. Optional dependencies only use fresh
    /// artifacts and are skipped silently when absent.
    pub fn resolve(&self, command: &str) -> Result<ExecutionContext> {
        let descriptor = self
            .registry
            .discover(self.ws, self.config, command)
            .ok_or_else(|| CollabError::UnknownCommand(command.to_string()))?;
        let store = ArtifactStore::new(self.ws);
        let manifest = descriptor.manifest();

        let mut available_data = BTreeMap::new();
        let mut missing_dependencies = Vec::new();
        for dep in descriptor.required_deps() {
            match lookup(&store, dep, None, true)? {
                Some(artifact) => {
                    available_data.insert(dep.clone(), artifact);
                }
                None if !missing_dependencies.contains(dep) => {
                    missing_dependencies.push(dep.clone());
                }
                None => {}
            }
        }

        let mut optimization_data = BTreeMap::new();
        for dep in manifest.iter().flat_map(|m| &m.dependencies.optional) {
            if optimization_data.contains_key(&dep.command) {
                continue;
            }
            if let Some(artifact) = lookup(&store, &dep.command, dep.output_type.as_deref(), false)? {
                optimization_data.insert(
                    dep.command.clone(),
                    OptimizationData {
                        artifact,
                        enhancement_note: dep.enhancement.clone(),
                    },
                );
            }
        }

        let base_duration = descriptor
            .entry
            .avg_duration()
            .unwrap_or(self.config.default_duration_secs);
        let optimization_available = !optimization_data.is_empty();
        let estimated_duration = if optimization_available {
            base_duration * OPTIMIZATION_DURATION_FACTOR
        } else {
            base_duration
        };

        let execution_plan = ExecutionPlan {
            pre_steps: manifest
                .map(|m| m.collaboration.pre_execution_behavior.clone())
                .unwrap_or_default(),
            post_steps: manifest
                .map(|m| m.collaboration.post_execution_behavior.clone())
                .unwrap_or_default(),
            cache_strategy: manifest
                .map(|m| m.cache_strategy())
                .unwrap_or(DEFAULT_CACHE_STRATEGY)
                .to_string(),
            estimated_duration,
            optimization_available,
            data_sources: optimization_data.keys().cloned().collect(),
        };

        tracing::debug!(
            command,
            available = available_data.len(),
            missing = missing_dependencies.len(),
            optimizations = optimization_data.len(),
            "dependencies resolved"
        );
        Ok(ExecutionContext {
            command: command.to_string(),
            available_data,
            optimization_data,
            missing_dependencies,
            execution_plan,
        })
    }
}

/// Shared artifact lookup for a declared dependency. A name that can't be a
/// command has no artifacts.
fn lookup(
    store: &ArtifactStore<'_>,
    command: &str,
    output_type: Option<&str>,
    include_stale: bool,
) -> Result<Option<Artifact>> {
    match store.find_shared(command, output_type, include_stale) {
        Err(CollabError::InvalidName { value, .. }) => {
            tracing::warn!(dependency = %value, "manifest names an invalid dependency");
            Ok(None)
        }
        other => other,
    }
}
