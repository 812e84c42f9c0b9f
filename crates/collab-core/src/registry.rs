use crate::config::EngineConfig;
use crate::error::Result;
use crate::manifest::{self, Manifest, ManifestState};
use crate::workspace::Workspace;
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Registry file types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHints {
    /// Average execution time in seconds.
    #[serde(default)]
    pub avg_execution_time: Option<f64>,
    #[serde(default)]
    pub cache_hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub location: String,
    /// Registry-declared manifest path, lowest precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceHints>,
}

impl CommandEntry {
    pub fn avg_duration(&self) -> Option<f64> {
        self.performance_metrics
            .as_ref()
            .and_then(|p| p.avg_execution_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    #[serde(default)]
    pub sequence: Vec<String>,
    #[serde(default)]
    pub estimated_total_time: f64,
}

impl WorkflowPattern {
    /// Whether this pattern covers exactly `requested`, ignoring order.
    pub fn matches(&self, requested: &BTreeSet<&str>) -> bool {
        let own: BTreeSet<&str> = self.sequence.iter().map(String::as_str).collect();
        &own == requested
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub commands: BTreeMap<String, CommandEntry>,
    #[serde(default)]
    pub workflow_patterns: BTreeMap<String, WorkflowPattern>,
}

/// A registry entry together with its lazily loaded manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    pub entry: CommandEntry,
    pub manifest: ManifestState,
}

impl CommandDescriptor {
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.manifest()
    }

    pub fn required_deps(&self) -> &[String] {
        self.manifest()
            .map(|m| m.dependencies.required.as_slice())
            .unwrap_or(&[])
    }
}

impl Registry {
    /// Load the catalogue. Never fails: a missing or corrupt registry is empty.
    pub fn load(ws: &Workspace) -> Self {
        io::read_yaml_or_default(&paths::registry_path(ws.root()))
    }

    pub fn save(&self, ws: &Workspace) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&paths::registry_path(ws.root()), data.as_bytes())
    }

    /// Read-modify-write the registry file.
    pub fn update<R>(ws: &Workspace, mutate: impl FnOnce(&mut Registry) -> R) -> Result<R> {
        io::update_yaml(&paths::registry_path(ws.root()), mutate)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(name)
    }

    /// Look up `name` and load its manifest. Unknown names yield `None`.
    pub fn discover(
        &self,
        ws: &Workspace,
        config: &EngineConfig,
        name: &str,
    ) -> Option<CommandDescriptor> {
        let entry = self.commands.get(name)?;
        if paths::validate_command_name(name).is_err() {
            tracing::warn!(command = name, "registry entry has an unusable name");
            return None;
        }
        let manifest = manifest::load(ws, config, name, entry.manifest.as_deref());
        Some(CommandDescriptor {
            name: name.to_string(),
            entry: entry.clone(),
            manifest,
        })
    }

    /// Every known command with its manifest, in name order.
    pub fn discover_all(&self, ws: &Workspace, config: &EngineConfig) -> Vec<CommandDescriptor> {
        self.commands
            .keys()
            .filter_map(|name| self.discover(ws, config, name))
            .collect()
    }
}
