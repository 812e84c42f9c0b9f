//! Library surface: one [`Engine`] is one session bound to a workspace.
//!
//! Callers resolve before running a command externally and store its output
//! afterwards. Nothing here launches processes or holds state across calls
//! beyond the session identity; every call re-reads the shared files so that
//! concurrent sessions see each other's writes.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::knowledge::{InsightRules, KnowledgeBase, ProjectContext};
use crate::manifest::{self, ManifestState};
use crate::notify::{self, Notification, StoreEffects};
use crate::paths;
use crate::recommend::{Recommender, WorkflowRecommendation};
use crate::registry::{CommandDescriptor, CommandEntry, Registry, WorkflowPattern};
use crate::resolver::{ExecutionContext, Resolver};
use crate::session::{LogLevel, Session};
use crate::store::{Artifact, ArtifactDraft, ArtifactStore, StoredArtifact};
use crate::types::{ConfidenceLevel, SharingPolicy, DEFAULT_FORMAT};
use crate::workspace::Workspace;
use serde_json::json;
use std::path::PathBuf;

/// Per-call overrides for [`Engine::store`]. Unset fields fall back to the
/// producer's manifest, then to engine defaults.
#[derive(Debug, Clone, Default)]
pub struct ArtifactOptions {
    pub format: Option<String>,
    pub quality_score: Option<f64>,
    pub confidence_level: Option<ConfidenceLevel>,
    pub sharing_policy: Option<SharingPolicy>,
    pub cache_ttl: Option<chrono::Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    pub artifact: StoredArtifact,
    pub effects: StoreEffects,
}

#[derive(Debug)]
pub struct Engine {
    workspace: Workspace,
    config: EngineConfig,
    session: Session,
    insight_rules: InsightRules,
}

impl Engine {
    /// Open the workspace at `root` with its own `config.yaml` (or defaults).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let workspace = Workspace::init(root)?;
        let config = EngineConfig::load(workspace.root());
        Self::start(workspace, config)
    }

    pub fn with_config(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        Self::start(Workspace::init(root)?, config)
    }

    fn start(workspace: Workspace, config: EngineConfig) -> Result<Self> {
        let session = Session::start(&workspace, &config)?;
        tracing::info!(session = %session.id(), root = %workspace.root().display(), "engine session started");
        Ok(Self {
            workspace,
            config,
            session,
            insight_rules: InsightRules::default(),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn insight_rules_mut(&mut self) -> &mut InsightRules {
        &mut self.insight_rules
    }

    fn registry(&self) -> Registry {
        Registry::load(&self.workspace)
    }

    // ---------------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------------

    /// Descriptor and manifest for `name`, or `None` if the registry doesn't know it.
    pub fn discover(&self, name: &str) -> Option<CommandDescriptor> {
        self.registry().discover(&self.workspace, &self.config, name)
    }

    /// Add or replace a registry entry. The map key is `name`.
    pub fn register_command(&self, name: &str, mut entry: CommandEntry) -> Result<()> {
        paths::validate_command_name(name)?;
        entry.name = name.to_string();
        Registry::update(&self.workspace, |r| {
            r.commands.insert(name.to_string(), entry);
        })?;
        self.session
            .log(LogLevel::Info, "command_registered", json!({ "command": name }));
        Ok(())
    }

    pub fn record_workflow_pattern(&self, name: &str, pattern: WorkflowPattern) -> Result<()> {
        Registry::update(&self.workspace, |r| {
            r.workflow_patterns.insert(name.to_string(), pattern);
        })?;
        self.session
            .log(LogLevel::Info, "pattern_recorded", json!({ "pattern": name }));
        Ok(())
    }

    // ---------------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------------

    pub fn resolve(&self, command: &str) -> Result<ExecutionContext> {
        let registry = self.registry();
        let result = Resolver::new(&self.workspace, &self.config, &registry).resolve(command);
        match &result {
            Ok(ctx) => self.session.log(
                LogLevel::Info,
                "resolved",
                json!({
                    "command": command,
                    "available": ctx.available_data.keys().collect::<Vec<_>>(),
                    "missing": ctx.missing_dependencies,
                    "optimizations": ctx.execution_plan.data_sources,
                    "estimated_duration": ctx.execution_plan.estimated_duration,
                }),
            ),
            Err(e) => self.session.log(
                LogLevel::Warn,
                "resolve_failed",
                json!({ "command": command, "error": e.to_string() }),
            ),
        }
        result
    }

    pub fn recommend(&self, requested: &[&str]) -> Result<WorkflowRecommendation> {
        let registry = self.registry();
        let result = Recommender::new(&self.workspace, &self.config, &registry).recommend(requested);
        match &result {
            Ok(rec) => self.session.log(
                LogLevel::Info,
                "recommended",
                json!({ "requested": requested, "sequence": rec.sequence }),
            ),
            Err(e) => self.session.log(
                LogLevel::Warn,
                "recommend_failed",
                json!({ "requested": requested, "error": e.to_string() }),
            ),
        }
        result
    }

    // ---------------------------------------------------------------------------
    // Artifacts
    // ---------------------------------------------------------------------------

    /// Store a command's output and run the post-store fan-out.
    pub fn store(
        &self,
        command: &str,
        content: &str,
        output_type: &str,
        options: ArtifactOptions,
    ) -> Result<StoreOutcome> {
        paths::validate_command_name(command)?;
        paths::validate_output_type(output_type)?;

        let registry = self.registry();
        let producer = match registry.discover(&self.workspace, &self.config, command) {
            Some(d) => d.manifest,
            None => manifest::load(&self.workspace, &self.config, command, None),
        };
        let consumers = notify::potential_consumers(
            &self.workspace,
            &self.config,
            &registry,
            command,
            output_type,
        );

        let draft = build_draft(
            command,
            output_type,
            self.session.id(),
            &producer,
            &self.config,
            options,
            consumers,
        );
        let artifact = match ArtifactStore::new(&self.workspace).write(content, draft) {
            Ok(a) => a,
            Err(e) => {
                self.session.log(
                    LogLevel::Warn,
                    "store_failed",
                    json!({ "command": command, "output_type": output_type, "error": e.to_string() }),
                );
                return Err(e);
            }
        };

        let effects =
            notify::on_artifact_stored(&self.workspace, &self.config, &self.insight_rules, &artifact);
        self.session.log(
            LogLevel::Info,
            "stored",
            json!({
                "command": command,
                "output_type": output_type,
                "version": artifact.metadata.metadata.version,
                "path": artifact.content_path.display().to_string(),
                "notified": effects.notified,
                "failed": effects.failed,
            }),
        );
        Ok(StoreOutcome { artifact, effects })
    }

    pub fn find(
        &self,
        command: &str,
        output_type: Option<&str>,
        include_stale: bool,
    ) -> Result<Option<Artifact>> {
        ArtifactStore::new(&self.workspace).find(command, output_type, include_stale)
    }

    pub fn history(&self, command: &str, output_type: Option<&str>) -> Result<Vec<Artifact>> {
        ArtifactStore::new(&self.workspace).history(command, output_type)
    }

    // ---------------------------------------------------------------------------
    // Shared state
    // ---------------------------------------------------------------------------

    pub fn notifications(&self, command: &str) -> Result<Vec<Notification>> {
        notify::pending(&self.workspace, command)
    }

    pub fn acknowledge_notifications(&self, command: &str) -> Result<usize> {
        let removed = notify::acknowledge(&self.workspace, command)?;
        self.session.log(
            LogLevel::Debug,
            "notifications_acknowledged",
            json!({ "command": command, "removed": removed }),
        );
        Ok(removed)
    }

    pub fn knowledge(&self) -> KnowledgeBase {
        KnowledgeBase::load(&self.workspace)
    }

    pub fn project_context(&self) -> ProjectContext {
        ProjectContext::load(&self.workspace)
    }
}

/// Merge per-call options, the producer's manifest and config defaults.
fn build_draft(
    command: &str,
    output_type: &str,
    session_id: &str,
    producer: &ManifestState,
    config: &EngineConfig,
    options: ArtifactOptions,
    intended_consumers: Vec<String>,
) -> ArtifactDraft {
    let manifest = producer.manifest();
    ArtifactDraft {
        command: command.to_string(),
        output_type: output_type.to_string(),
        session_id: session_id.to_string(),
        format: options
            .format
            .or_else(|| manifest.and_then(|m| m.declared_format(output_type)).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        quality_score: options.quality_score.unwrap_or(0.0),
        confidence_level: options.confidence_level.unwrap_or_default(),
        sharing_policy: options
            .sharing_policy
            .or_else(|| manifest.and_then(|m| m.sharing_policy()))
            .unwrap_or_default(),
        cache_ttl: options.cache_ttl.unwrap_or_else(|| config.cache_ttl()),
        intended_consumers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Engine {
        let config = EngineConfig {
            user_manifest_dir: None,
            ..EngineConfig::default()
        };
        Engine::with_config(dir.path(), config).unwrap()
    }

    #[test]
    fn store_defaults_come_from_manifest() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        io::atomic_write(
            &paths::local_manifest(dir.path(), "analyzer"),
            b"outputs:\n  - {type: scores, format: yaml}\ncollaboration:\n  output_sharing: on_request\n",
        )
        .unwrap();

        let out = engine
            .store("analyzer", "a: 1\n", "scores", ArtifactOptions::default())
            .unwrap();
        let m = &out.artifact.metadata;
        assert_eq!(m.output_specification.format, "yaml");
        assert!(out.artifact.content_path.to_string_lossy().ends_with(".yaml"));
        assert_eq!(m.sharing_policy(), SharingPolicy::OnRequest);
        assert_eq!(m.metadata.session_id, engine.session().id());
        assert_eq!(
            m.collaboration_data.cache_expires,
            m.timestamp() + chrono::Duration::hours(24)
        );
    }

    #[test]
    fn options_override_manifest() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        io::atomic_write(
            &paths::local_manifest(dir.path(), "analyzer"),
            b"collaboration:\n  output_sharing: on_request\n",
        )
        .unwrap();
        let out = engine
            .store(
                "analyzer",
                "x",
                "report",
                ArtifactOptions {
                    sharing_policy: Some(SharingPolicy::Private),
                    quality_score: Some(0.42),
                    confidence_level: Some(ConfidenceLevel::Low),
                    ..ArtifactOptions::default()
                },
            )
            .unwrap();
        let m = &out.artifact.metadata;
        assert_eq!(m.sharing_policy(), SharingPolicy::Private);
        assert_eq!(m.quality_score(), 0.42);
        assert_eq!(m.quality_metrics.confidence_level, ConfidenceLevel::Low);
        assert_eq!(m.output_specification.format, DEFAULT_FORMAT);
    }

    #[test]
    fn defaults_without_manifest() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let out = engine
            .store("adhoc", "x", "report", ArtifactOptions::default())
            .unwrap();
        assert_eq!(out.artifact.metadata.sharing_policy(), SharingPolicy::Immediate);
        assert_eq!(out.artifact.metadata.quality_metrics.confidence_level, ConfidenceLevel::Medium);
    }

    #[test]
    fn oversized_ttl_is_stored_not_panicking() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let out = engine
            .store(
                "analyzer",
                "x",
                "report",
                ArtifactOptions {
                    cache_ttl: Some(chrono::Duration::MAX),
                    ..ArtifactOptions::default()
                },
            )
            .unwrap();
        assert!(!out.artifact.metadata.is_stale(chrono::Utc::now()));
        assert!(engine.find("analyzer", None, false).unwrap().is_some());
    }

    #[test]
    fn register_command_then_discover() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(engine.discover("analyzer").is_none());
        engine
            .register_command("analyzer", CommandEntry::default())
            .unwrap();
        let d = engine.discover("analyzer").unwrap();
        assert_eq!(d.entry.name, "analyzer");
        assert_eq!(d.manifest, ManifestState::Absent);
        assert!(engine.register_command("../evil", CommandEntry::default()).is_err());
    }

    #[test]
    fn session_log_records_operations() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.register_command("analyzer", CommandEntry::default()).unwrap();
        engine
            .store("analyzer", "x", "report", ArtifactOptions::default())
            .unwrap();
        engine.resolve("analyzer").unwrap();
        assert!(engine.resolve("ghost").is_err());

        let events: Vec<String> = engine
            .session()
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.event)
            .collect();
        assert_eq!(
            events,
            ["session_started", "command_registered", "stored", "resolved", "resolve_failed"]
        );
    }
}
