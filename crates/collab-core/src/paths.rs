use crate::error::{CollabError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const COMMANDS_DIR: &str = "commands";
pub const SHARED_DIR: &str = "shared";
pub const SESSIONS_DIR: &str = "sessions";

pub const OUTPUTS_DIR: &str = "outputs";
pub const NOTIFICATIONS_DIR: &str = "notifications";

pub const REGISTRY_FILE: &str = "registry.yaml";
pub const CONFIG_FILE: &str = "config.yaml";
pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const KNOWLEDGE_FILE: &str = "shared/team-knowledge.yaml";
pub const PROJECT_CONTEXT_FILE: &str = "shared/project-context.yaml";
pub const SESSION_LOG_FILE: &str = "engine.log";

/// Suffix shared by every artifact metadata sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn registry_path(root: &Path) -> PathBuf {
    root.join(REGISTRY_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn command_dir(root: &Path, command: &str) -> PathBuf {
    root.join(COMMANDS_DIR).join(command)
}

/// Project-local manifest override for `command`.
pub fn local_manifest(root: &Path, command: &str) -> PathBuf {
    command_dir(root, command).join(MANIFEST_FILE)
}

pub fn outputs_dir(root: &Path, command: &str) -> PathBuf {
    command_dir(root, command).join(OUTPUTS_DIR)
}

pub fn notifications_dir(root: &Path, command: &str) -> PathBuf {
    command_dir(root, command).join(NOTIFICATIONS_DIR)
}

pub fn knowledge_path(root: &Path) -> PathBuf {
    root.join(KNOWLEDGE_FILE)
}

pub fn project_context_path(root: &Path) -> PathBuf {
    root.join(PROJECT_CONTEXT_FILE)
}

pub fn session_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join(SESSIONS_DIR).join(session_id)
}

pub fn session_log(root: &Path, session_id: &str) -> PathBuf {
    session_dir(root, session_id).join(SESSION_LOG_FILE)
}

/// Sidecar filename for an artifact content filename: `report.md` → `.report.md.meta.yaml`.
pub fn sidecar_name(content_filename: &str) -> String {
    format!(".{content_filename}{SIDECAR_SUFFIX}")
}

/// Inverse of [`sidecar_name`]. Returns `None` for anything that isn't a sidecar.
pub fn content_name_for_sidecar(sidecar: &str) -> Option<&str> {
    sidecar
        .strip_prefix('.')?
        .strip_suffix(SIDECAR_SUFFIX)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").unwrap())
}

fn validate(kind: &'static str, value: &str) -> Result<()> {
    if value.len() > 64 || !name_re().is_match(value) {
        return Err(CollabError::InvalidName {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Command names become directory names, so they must not escape the workspace.
pub fn validate_command_name(name: &str) -> Result<()> {
    validate("command name", name)
}

/// Output types are embedded in artifact filenames.
pub fn validate_output_type(output_type: &str) -> Result<()> {
    validate("output type", output_type)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
