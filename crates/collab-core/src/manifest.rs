//! Per-command manifests: declared dependencies, outputs and collaboration policy.

use crate::config::EngineConfig;
use crate::paths;
use crate::types::SharingPolicy;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_STRATEGY: &str = "session_based";

// ---------------------------------------------------------------------------
// Manifest file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestHeader {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalDependency {
    pub command: String,
    /// When absent, any output of `command` qualifies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default)]
    pub enhancement: String,
}

impl OptionalDependency {
    pub fn accepts(&self, command: &str, output_type: &str) -> bool {
        self.command == command
            && self
                .output_type
                .as_deref()
                .map_or(true, |t| t == output_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<OptionalDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredOutput {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    crate::types::DEFAULT_FORMAT.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaborationPolicy {
    #[serde(default)]
    pub pre_execution_behavior: Vec<String>,
    #[serde(default)]
    pub post_execution_behavior: Vec<String>,
    /// Kept as free text so an unknown policy doesn't invalidate the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sharing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub command: ManifestHeader,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub outputs: Vec<DeclaredOutput>,
    #[serde(default)]
    pub collaboration: CollaborationPolicy,
}

impl Manifest {
    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document is a manifest that declares nothing.
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data)
    }

    pub fn cache_strategy(&self) -> &str {
        self.collaboration
            .cache_strategy
            .as_deref()
            .unwrap_or(DEFAULT_CACHE_STRATEGY)
    }

    /// The declared sharing policy, if any. Unknown values are logged and ignored.
    pub fn sharing_policy(&self) -> Option<SharingPolicy> {
        let raw = self.collaboration.output_sharing.as_deref()?;
        match raw.parse() {
            Ok(policy) => Some(policy),
            Err(e) => {
                tracing::warn!(command = %self.command.name, error = %e, "ignoring output_sharing");
                None
            }
        }
    }

    pub fn declared_format(&self, output_type: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.output_type == output_type)
            .map(|o| o.format.as_str())
    }

    pub fn depends_optionally_on(&self, command: &str, output_type: &str) -> bool {
        self.dependencies
            .optional
            .iter()
            .any(|d| d.accepts(command, output_type))
    }
}

// ---------------------------------------------------------------------------
// ManifestState
// ---------------------------------------------------------------------------

/// Whether a command has a usable manifest. `Absent` covers both a missing
/// file and one that failed to parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ManifestState {
    #[default]
    Absent,
    Loaded { path: PathBuf, manifest: Manifest },
}

impl ManifestState {
    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            ManifestState::Absent => None,
            ManifestState::Loaded { manifest, .. } => Some(manifest),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ManifestState::Absent => None,
            ManifestState::Loaded { path, .. } => Some(path),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ManifestState::Loaded { .. })
    }
}

/// Candidate manifest locations for `command`, highest precedence first:
/// project-local override, user-global, registry-declared.
pub fn candidate_paths(
    ws: &Workspace,
    config: &EngineConfig,
    command: &str,
    declared: Option<&Path>,
) -> Vec<PathBuf> {
    let mut candidates = vec![paths::local_manifest(ws.root(), command)];
    candidates.extend(config.user_manifest(command));
    candidates.extend(declared.map(|p| ws.resolve_path(p)));
    candidates
}

/// Load the first existing manifest among the candidates. A corrupt first
/// match degrades to `Absent`; lower-precedence files are not consulted.
pub fn load(
    ws: &Workspace,
    config: &EngineConfig,
    command: &str,
    declared: Option<&Path>,
) -> ManifestState {
    let Some(path) = candidate_paths(ws, config, command, declared)
        .into_iter()
        .find(|p| p.is_file())
    else {
        return ManifestState::Absent;
    };

    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(command, path = %path.display(), error = %e, "unreadable manifest");
            return ManifestState::Absent;
        }
    };
    match Manifest::parse(&data) {
        Ok(manifest) => ManifestState::Loaded { path, manifest },
        Err(e) => {
            tracing::warn!(command, path = %path.display(), error = %e, "corrupt manifest");
            ManifestState::Absent
        }
    }
}
