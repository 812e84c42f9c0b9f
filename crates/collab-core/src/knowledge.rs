//! Workspace-wide shared state: the team knowledge base and the project
//! context. Both are single YAML files under `shared/`, mutated only through
//! read-modify-write with an atomic rename. Entries are appended or
//! overwritten per key, never deleted.

use crate::error::Result;
use crate::session::Session;
use crate::store::ArtifactMetadata;
use crate::workspace::Workspace;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// KnowledgeBase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutputRecord {
    pub last_output_type: String,
    pub last_quality_score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub insight_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub command_outputs: BTreeMap<String, CommandOutputRecord>,
    #[serde(default)]
    pub insights: Vec<Insight>,
}

impl KnowledgeBase {
    pub fn load(ws: &Workspace) -> Self {
        io::read_yaml_or_default(&paths::knowledge_path(ws.root()))
    }

    /// Record a freshly stored artifact and any insights derived from it.
    /// Returns the insights that were appended.
    pub fn record_output(
        ws: &Workspace,
        metadata: &ArtifactMetadata,
        rules: &InsightRules,
    ) -> Result<Vec<Insight>> {
        let insights = rules.derive(metadata);
        let appended = insights.clone();
        io::update_yaml(&paths::knowledge_path(ws.root()), |kb: &mut KnowledgeBase| {
            kb.command_outputs.insert(
                metadata.command().to_string(),
                CommandOutputRecord {
                    last_output_type: metadata.output_type().to_string(),
                    last_quality_score: metadata.quality_score(),
                    last_updated: metadata.timestamp(),
                },
            );
            kb.insights.extend(insights);
        })?;
        Ok(appended)
    }

    pub fn insights_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Insight> + 'a {
        self.insights.iter().filter(move |i| i.source == source)
    }
}

// ---------------------------------------------------------------------------
// Insight rules
// ---------------------------------------------------------------------------

/// Builds an insight from a stored artifact's metadata.
pub type InsightGenerator = fn(&ArtifactMetadata) -> Insight;

/// Table of `output_type → insight generator`. New output types register a
/// generator here instead of touching the store or notifier.
#[derive(Clone)]
pub struct InsightRules {
    rules: HashMap<String, InsightGenerator>,
}

impl std::fmt::Debug for InsightRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.rules.keys().collect();
        types.sort();
        f.debug_struct("InsightRules").field("output_types", &types).finish()
    }
}

impl InsightRules {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Add or replace the generator for `output_type`.
    pub fn register(&mut self, output_type: impl Into<String>, generator: InsightGenerator) {
        self.rules.insert(output_type.into(), generator);
    }

    pub fn derive(&self, metadata: &ArtifactMetadata) -> Vec<Insight> {
        self.rules
            .get(metadata.output_type())
            .map(|generate| generate(metadata))
            .into_iter()
            .collect()
    }
}

impl Default for InsightRules {
    fn default() -> Self {
        let mut rules = Self::empty();
        rules.register("implementation_plan", implementation_strategy);
        rules.register("risk_assessment", risk_profile);
        rules.register("financial_analysis", financial_outlook);
        rules.register("market_research", market_landscape);
        rules
    }
}

fn insight(insight_type: &str, m: &ArtifactMetadata, what: &str) -> Insight {
    Insight {
        insight_type: insight_type.to_string(),
        source: m.command().to_string(),
        timestamp: m.timestamp(),
        summary: format!(
            "{} v{} available ({what}, quality {:.2})",
            m.output_type(),
            m.metadata.version,
            m.quality_score()
        ),
    }
}

fn implementation_strategy(m: &ArtifactMetadata) -> Insight {
    insight("implementation_strategy", m, "implementation roadmap")
}

fn risk_profile(m: &ArtifactMetadata) -> Insight {
    insight("risk_profile", m, "risk factors and mitigations")
}

fn financial_outlook(m: &ArtifactMetadata) -> Insight {
    insight("financial_outlook", m, "financial projections")
}

fn market_landscape(m: &ArtifactMetadata) -> Insight {
    insight("market_landscape", m, "market sizing and competitors")
}

// ---------------------------------------------------------------------------
// ProjectContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub started_at: DateTime<Utc>,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub session_id: String,
    pub command: String,
    pub output_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
    #[serde(default)]
    pub recent_activity: Vec<ActivityEntry>,
}

impl ProjectContext {
    pub fn load(ws: &Workspace) -> Self {
        io::read_yaml_or_default(&paths::project_context_path(ws.root()))
    }

    /// Register a session, keeping only the `limit` most recently started.
    pub fn record_session(ws: &Workspace, session: &Session, limit: usize) -> Result<()> {
        io::update_yaml(&paths::project_context_path(ws.root()), |ctx: &mut ProjectContext| {
            ctx.sessions.insert(
                session.id().to_string(),
                SessionRecord {
                    started_at: session.started_at(),
                    log_path: session.log_path().to_path_buf(),
                },
            );
            if ctx.sessions.len() > limit {
                let mut by_age: Vec<(DateTime<Utc>, String)> = ctx
                    .sessions
                    .iter()
                    .map(|(id, r)| (r.started_at, id.clone()))
                    .collect();
                by_age.sort();
                let excess = by_age.len() - limit;
                for (_, id) in by_age.into_iter().take(excess) {
                    ctx.sessions.remove(&id);
                }
            }
        })
    }

    /// Append a store event, keeping only the newest `limit` entries.
    pub fn record_activity(
        ws: &Workspace,
        metadata: &ArtifactMetadata,
        limit: usize,
    ) -> Result<()> {
        io::update_yaml(&paths::project_context_path(ws.root()), |ctx: &mut ProjectContext| {
            ctx.recent_activity.push(ActivityEntry {
                session_id: metadata.metadata.session_id.clone(),
                command: metadata.command().to_string(),
                output_type: metadata.output_type().to_string(),
                timestamp: metadata.timestamp(),
            });
            if ctx.recent_activity.len() > limit {
                ctx.recent_activity
                    .drain(..ctx.recent_activity.len() - limit);
            }
        })
    }
}
