//! Artifact store: content files paired with hidden YAML metadata sidecars
//! under `commands/<name>/outputs/`.
//!
//! A write puts the content file in place first and the sidecar second, each
//! through an atomic rename. Scans only consider sidecars, so a reader racing
//! a writer either sees the whole artifact or nothing.

use crate::error::Result;
use crate::types::{extension_for_format, ConfidenceLevel, SharingPolicy};
use crate::workspace::Workspace;
use crate::{io, paths};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Sidecar format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpecification {
    #[serde(rename = "type")]
    pub output_type: String,
    pub format: String,
    pub size_bytes: u64,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub quality_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationData {
    #[serde(default)]
    pub intended_consumers: Vec<String>,
    pub sharing_policy: SharingPolicy,
    pub cache_expires: DateTime<Utc>,
}

/// Everything recorded about one artifact, laid out as in its sidecar file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub metadata: ProducerInfo,
    pub output_specification: OutputSpecification,
    pub quality_metrics: QualityMetrics,
    pub collaboration_data: CollaborationData,
}

impl ArtifactMetadata {
    pub fn command(&self) -> &str {
        &self.metadata.command
    }

    pub fn output_type(&self) -> &str {
        &self.output_specification.output_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_metrics.quality_score
    }

    pub fn sharing_policy(&self) -> SharingPolicy {
        self.collaboration_data.sharing_policy
    }

    /// Stale artifacts may still satisfy required dependencies, never optional ones.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.collaboration_data.cache_expires <= now
    }
}

/// Longest lifetime an artifact can be given, in either direction.
pub const MAX_CACHE_TTL_DAYS: i64 = 36_500;

/// Bound `ttl` so that `timestamp + ttl` stays representable and serializable.
fn clamp_ttl(ttl: Duration) -> Duration {
    let max = Duration::days(MAX_CACHE_TTL_DAYS);
    ttl.clamp(-max, max)
}

/// Deterministic digest used for integrity checks and dedupe.
pub fn content_hash(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub content: String,
    pub content_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    fn file_name(&self) -> &str {
        self.content_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Ordering key for "newest wins": timestamp, then version, then filename.
    fn recency_key(&self) -> (DateTime<Utc>, u32, &str) {
        (
            self.metadata.timestamp(),
            self.metadata.metadata.version,
            self.file_name(),
        )
    }
}

/// Caller-resolved metadata for a new artifact. The store fills in the
/// timestamp, version, hash and size figures.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub command: String,
    pub output_type: String,
    pub session_id: String,
    pub format: String,
    pub quality_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub sharing_policy: SharingPolicy,
    pub cache_ttl: Duration,
    pub intended_consumers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub content_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: ArtifactMetadata,
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ArtifactStore<'a> {
    ws: &'a Workspace,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    /// Persist `content` and its sidecar.
    pub fn write(&self, content: &str, draft: ArtifactDraft) -> Result<StoredArtifact> {
        paths::validate_command_name(&draft.command)?;
        paths::validate_output_type(&draft.output_type)?;

        let version = self.latest_version(&draft.command, &draft.output_type)? + 1;
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!(
            "{}_{}_{}.{}",
            draft.output_type,
            now.format("%Y%m%dT%H%M%S%.6fZ"),
            &suffix[..8],
            extension_for_format(&draft.format)
        );
        let dir = paths::outputs_dir(self.ws.root(), &draft.command);
        let content_path = dir.join(&filename);
        let metadata_path = dir.join(paths::sidecar_name(&filename));

        let metadata = ArtifactMetadata {
            metadata: ProducerInfo {
                command: draft.command,
                timestamp: now,
                version,
                session_id: draft.session_id,
            },
            output_specification: OutputSpecification {
                output_type: draft.output_type,
                format: draft.format,
                size_bytes: content.len() as u64,
                line_count: content.lines().count(),
            },
            quality_metrics: QualityMetrics {
                quality_score: draft.quality_score,
                confidence_level: draft.confidence_level,
                content_hash: content_hash(content.as_bytes()),
            },
            collaboration_data: CollaborationData {
                intended_consumers: draft.intended_consumers,
                sharing_policy: draft.sharing_policy,
                cache_expires: now + clamp_ttl(draft.cache_ttl),
            },
        };

        io::atomic_write(&content_path, content.as_bytes())?;
        let sidecar = serde_yaml::to_string(&metadata)?;
        io::atomic_write(&metadata_path, sidecar.as_bytes())?;

        tracing::debug!(
            command = %metadata.command(),
            output_type = %metadata.output_type(),
            version,
            path = %content_path.display(),
            "artifact stored"
        );
        Ok(StoredArtifact {
            content_path,
            metadata_path,
            metadata,
        })
    }

    /// Newest artifact of `command`, optionally restricted to `output_type`.
    /// With `include_stale == false`, expired artifacts are skipped.
    pub fn find(
        &self,
        command: &str,
        output_type: Option<&str>,
        include_stale: bool,
    ) -> Result<Option<Artifact>> {
        self.latest_where(command, output_type, include_stale, |_| true)
    }

    /// Like [`find`](Self::find), but ignores artifacts not shared with other commands.
    pub fn find_shared(
        &self,
        command: &str,
        output_type: Option<&str>,
        include_stale: bool,
    ) -> Result<Option<Artifact>> {
        self.latest_where(command, output_type, include_stale, |a| {
            a.metadata.sharing_policy().is_shared()
        })
    }

    /// All readable artifacts of `command`, oldest first.
    pub fn history(&self, command: &str, output_type: Option<&str>) -> Result<Vec<Artifact>> {
        let mut artifacts = self.scan(command)?;
        artifacts.retain(|a| output_type.map_or(true, |t| a.metadata.output_type() == t));
        artifacts.sort_by(|a, b| a.recency_key().cmp(&b.recency_key()));
        Ok(artifacts)
    }

    /// Highest version recorded for `(command, output_type)`, 0 when none.
    pub fn latest_version(&self, command: &str, output_type: &str) -> Result<u32> {
        Ok(self
            .scan(command)?
            .iter()
            .filter(|a| a.metadata.output_type() == output_type)
            .map(|a| a.metadata.metadata.version)
            .max()
            .unwrap_or(0))
    }

    fn latest_where(
        &self,
        command: &str,
        output_type: Option<&str>,
        include_stale: bool,
        keep: impl Fn(&Artifact) -> bool,
    ) -> Result<Option<Artifact>> {
        let now = Utc::now();
        Ok(self
            .scan(command)?
            .into_iter()
            .filter(|a| output_type.map_or(true, |t| a.metadata.output_type() == t))
            .filter(|a| include_stale || !a.metadata.is_stale(now))
            .filter(|a| keep(a))
            .max_by(|a, b| a.recency_key().cmp(&b.recency_key())))
    }

    /// Read every intact artifact in `command`'s outputs directory.
    fn scan(&self, command: &str) -> Result<Vec<Artifact>> {
        paths::validate_command_name(command)?;
        let dir = paths::outputs_dir(self.ws.root(), command);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(content_name) = name.to_str().and_then(paths::content_name_for_sidecar)
            else {
                continue;
            };
            if let Some(artifact) = read_artifact(&dir, command, content_name, &entry.path())? {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }
}

/// Load one sidecar and its content. Corrupt or half-written artifacts are
/// logged and skipped; only unexpected I/O errors are returned.
fn read_artifact(
    dir: &Path,
    command: &str,
    content_name: &str,
    metadata_path: &Path,
) -> Result<Option<Artifact>> {
    let Some(raw) = read_optional(metadata_path)? else {
        return Ok(None);
    };
    let Some(raw) = decode_utf8(metadata_path, raw) else {
        return Ok(None);
    };
    let metadata: ArtifactMetadata = match serde_yaml::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %metadata_path.display(), error = %e, "skipping corrupt artifact metadata");
            return Ok(None);
        }
    };
    if metadata.command() != command {
        tracing::warn!(
            path = %metadata_path.display(),
            producer = %metadata.command(),
            "skipping artifact filed under the wrong command"
        );
        return Ok(None);
    }

    let content_path = dir.join(content_name);
    let Some(content) = read_optional(&content_path)? else {
        tracing::warn!(path = %content_path.display(), "artifact content missing");
        return Ok(None);
    };
    let Some(content) = decode_utf8(&content_path, content) else {
        return Ok(None);
    };
    if content_hash(content.as_bytes()) != metadata.quality_metrics.content_hash {
        tracing::warn!(path = %content_path.display(), "artifact content does not match its hash");
        return Ok(None);
    }

    Ok(Some(Artifact {
        content,
        content_path,
        metadata_path: metadata_path.to_path_buf(),
        metadata,
    }))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Artifact files are text. Anything else is corrupt and skipped.
fn decode_utf8(path: &Path, bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping artifact file that is not valid UTF-8");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
