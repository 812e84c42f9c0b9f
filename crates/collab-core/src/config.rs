use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine tuning, read from `config.yaml` at the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hours until a freshly stored artifact goes stale.
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    /// Base duration for commands the registry has no metrics for.
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: f64,
    /// User-global manifests live here as `<command>.yaml`.
    #[serde(default = "default_user_manifest_dir")]
    pub user_manifest_dir: Option<PathBuf>,
    /// Maximum number of store events kept in the project context.
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
}

fn default_cache_ttl_hours() -> i64 {
    24
}

fn default_duration_secs() -> f64 {
    60.0
}

fn default_user_manifest_dir() -> Option<PathBuf> {
    home::home_dir().map(|h| h.join(".config").join("collab").join("manifests"))
}

fn default_activity_limit() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_hours: default_cache_ttl_hours(),
            default_duration_secs: default_duration_secs(),
            user_manifest_dir: default_user_manifest_dir(),
            activity_limit: default_activity_limit(),
        }
    }
}

impl EngineConfig {
    /// Load the workspace config. A missing or unparsable file yields defaults.
    pub fn load(root: &Path) -> Self {
        crate::io::read_yaml_or_default(&paths::config_path(root))
    }

    /// Artifact lifetime. An out-of-range `cache_ttl_hours` falls back to the default.
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.cache_ttl_hours).unwrap_or_else(|| {
            tracing::warn!(
                cache_ttl_hours = self.cache_ttl_hours,
                "cache_ttl_hours out of range, using default"
            );
            chrono::Duration::hours(default_cache_ttl_hours())
        })
    }

    /// User-global manifest path for `command`, if a user manifest dir is configured.
    pub fn user_manifest(&self, command: &str) -> Option<PathBuf> {
        self.user_manifest_dir
            .as_ref()
            .map(|dir| dir.join(format!("{command}.yaml")))
    }
}
