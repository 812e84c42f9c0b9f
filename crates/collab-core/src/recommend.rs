//! Execution-order advice for a set of requested commands.
//!
//! A registered workflow pattern covering exactly the requested set wins.
//! Otherwise the order comes from Kahn's algorithm over the required
//! dependencies among the requested commands, processed in waves so that
//! every wave is a group of commands that can run side by side.

use crate::config::EngineConfig;
use crate::error::{CollabError, Result};
use crate::registry::{CommandDescriptor, Registry};
use crate::store::ArtifactStore;
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Taken verbatim from the named workflow pattern.
    Pattern(String),
    /// Computed from the manifests' required dependencies.
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRecommendation {
    pub sequence: Vec<String>,
    pub parallel_groups: Vec<Vec<String>>,
    /// Required dependencies outside the requested set that have never produced output.
    pub missing_dependencies: Vec<String>,
    /// Requested names the registry doesn't know; left out of the sequence.
    pub unknown_commands: Vec<String>,
    /// Seconds along the critical path.
    pub estimated_total_duration: f64,
    pub source: RecommendationSource,
}

pub struct Recommender<'a> {
    ws: &'a Workspace,
    config: &'a EngineConfig,
    registry: &'a Registry,
}

impl<'a> Recommender<'a> {
    pub fn new(ws: &'a Workspace, config: &'a EngineConfig, registry: &'a Registry) -> Self {
        Self {
            ws,
            config,
            registry,
        }
    }

    pub fn recommend(&self, requested: &[&str]) -> Result<WorkflowRecommendation> {
        let mut order: Vec<&str> = Vec::new();
        for &name in requested {
            if !order.contains(&name) {
                order.push(name);
            }
        }
        let requested_set: BTreeSet<&str> = order.iter().copied().collect();

        let mut known: Vec<CommandDescriptor> = Vec::new();
        let mut unknown_commands = Vec::new();
        for &name in &order {
            match self.registry.discover(self.ws, self.config, name) {
                Some(d) => known.push(d),
                None => unknown_commands.push(name.to_string()),
            }
        }

        let missing_dependencies = self.missing_outside(&known, &requested_set)?;

        if let Some((name, pattern)) = self
            .registry
            .workflow_patterns
            .iter()
            .find(|(_, p)| p.matches(&requested_set))
        {
            tracing::debug!(pattern = %name, "workflow pattern matched");
            return Ok(WorkflowRecommendation {
                sequence: pattern.sequence.clone(),
                parallel_groups: pattern.sequence.iter().map(|c| vec![c.clone()]).collect(),
                missing_dependencies,
                unknown_commands,
                estimated_total_duration: pattern.estimated_total_time,
                source: RecommendationSource::Pattern(name.clone()),
            });
        }

        let graph = Graph::build(&known, self.config.default_duration_secs);
        let parallel_groups = graph.waves()?;
        let sequence: Vec<String> = parallel_groups.iter().flatten().cloned().collect();
        let estimated_total_duration = graph.critical_path(&sequence);

        Ok(WorkflowRecommendation {
            sequence,
            parallel_groups,
            missing_dependencies,
            unknown_commands,
            estimated_total_duration,
            source: RecommendationSource::Computed,
        })
    }

    /// Required deps outside the requested set with no discoverable artifact.
    /// Stale artifacts count as present.
    fn missing_outside(
        &self,
        known: &[CommandDescriptor],
        requested: &BTreeSet<&str>,
    ) -> Result<Vec<String>> {
        let store = ArtifactStore::new(self.ws);
        let mut missing = BTreeSet::new();
        for d in known {
            for dep in d.required_deps() {
                if requested.contains(dep.as_str()) || missing.contains(dep) {
                    continue;
                }
                // Names that can't be valid commands can't have artifacts either.
                let found = match store.find_shared(dep, None, true) {
                    Ok(found) => found.is_some(),
                    Err(CollabError::InvalidName { .. }) => false,
                    Err(e) => return Err(e),
                };
                if !found {
                    missing.insert(dep.clone());
                }
            }
        }
        Ok(missing.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

struct Graph {
    /// Nodes in requested order.
    nodes: Vec<String>,
    /// `deps[i]`: indices of the nodes `i` requires.
    deps: Vec<Vec<usize>>,
    durations: Vec<f64>,
}

impl Graph {
    fn build(known: &[CommandDescriptor], default_duration: f64) -> Self {
        let index: HashMap<&str, usize> = known
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();
        let deps = known
            .iter()
            .map(|d| {
                let mut edges: Vec<usize> = d
                    .required_deps()
                    .iter()
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect();
                edges.sort_unstable();
                edges.dedup();
                edges
            })
            .collect();
        Self {
            nodes: known.iter().map(|d| d.name.clone()).collect(),
            deps,
            durations: known
                .iter()
                .map(|d| d.entry.avg_duration().unwrap_or(default_duration))
                .collect(),
        }
    }

    /// Kahn's algorithm, one wave per topological depth.
    fn waves(&self) -> Result<Vec<Vec<String>>> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut wave: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut waves = Vec::new();
        let mut placed = 0;
        while !wave.is_empty() {
            let mut next = Vec::new();
            for &node in &wave {
                for &dependent in &dependents[node] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            placed += wave.len();
            waves.push(wave.iter().map(|&i| self.nodes[i].clone()).collect());
            wave = next;
        }

        if placed < n {
            let cycle: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].clone())
                .collect();
            return Err(CollabError::DependencyCycle(cycle));
        }
        Ok(waves)
    }

    /// Longest duration-weighted path, visiting nodes in topological order.
    fn critical_path(&self, sequence: &[String]) -> f64 {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut finish = vec![0.0_f64; self.nodes.len()];
        for name in sequence {
            let i = index[name.as_str()];
            let start = self.deps[i]
                .iter()
                .map(|&d| finish[d])
                .fold(0.0, f64::max);
            finish[i] = start + self.durations[i];
        }
        finish.into_iter().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactDraft;
    use crate::types::{ConfidenceLevel, SharingPolicy};
    use crate::{io, paths};
    use tempfile::TempDir;

    const REGISTRY: &str = r#"
commands:
  a: {name: a, performance_metrics: {avg_execution_time: 10}}
  b: {name: b, performance_metrics: {avg_execution_time: 20}}
  c: {name: c, performance_metrics: {avg_execution_time: 30}}
  d: {name: d, performance_metrics: {avg_execution_time: 5}}
  x: {name: x}
  y: {name: y}
workflow_patterns:
  full_review:
    sequence: [d, a]
    estimated_total_time: 99
"#;

    fn setup(dir: &TempDir, manifests: &[(&str, &str)]) -> (Workspace, EngineConfig, Registry) {
        let ws = Workspace::init(dir.path()).unwrap();
        std::fs::write(paths::registry_path(ws.root()), REGISTRY).unwrap();
        for (name, body) in manifests {
            io::atomic_write(&paths::local_manifest(ws.root(), name), body.as_bytes()).unwrap();
        }
        let config = EngineConfig {
            user_manifest_dir: None,
            ..EngineConfig::default()
        };
        let registry = Registry::load(&ws);
        (ws, config, registry)
    }

    fn requires(deps: &str) -> String {
        format!("dependencies:\n  required: [{deps}]\n")
    }

    #[test]
    fn chain_is_sequenced_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let (b, c) = (requires("a"), requires("b"));
        let (ws, config, reg) = setup(&dir, &[("b", &b), ("c", &c)]);

        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["c", "a", "b"])
            .unwrap();
        assert_eq!(rec.sequence, ["a", "b", "c"]);
        assert_eq!(rec.parallel_groups, [vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(rec.estimated_total_duration, 60.0);
        assert_eq!(rec.source, RecommendationSource::Computed);
        assert!(rec.missing_dependencies.is_empty());
    }

    #[test]
    fn independent_commands_share_a_group() {
        let dir = TempDir::new().unwrap();
        let (ws, config, reg) = setup(&dir, &[]);
        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["a", "b"])
            .unwrap();
        assert_eq!(rec.parallel_groups, [vec!["a", "b"]]);
        assert_eq!(rec.estimated_total_duration, 20.0);
    }

    #[test]
    fn diamond_uses_critical_path() {
        let dir = TempDir::new().unwrap();
        let (b, c, d) = (requires("a"), requires("a"), requires("b, c"));
        let (ws, config, reg) = setup(&dir, &[("b", &b), ("c", &c), ("d", &d)]);
        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["d", "c", "b", "a"])
            .unwrap();
        assert_eq!(rec.parallel_groups, [vec!["a"], vec!["c", "b"], vec!["d"]]);
        // a(10) → c(30) → d(5)
        assert_eq!(rec.estimated_total_duration, 45.0);
    }

    #[test]
    fn cycle_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (requires("b"), requires("a"));
        let (ws, config, reg) = setup(&dir, &[("a", &a), ("b", &b)]);
        let err = Recommender::new(&ws, &config, &reg)
            .recommend(&["a", "b", "c"])
            .unwrap_err();
        match err {
            CollabError::DependencyCycle(nodes) => assert_eq!(nodes, ["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn pattern_is_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let (ws, config, reg) = setup(&dir, &[]);
        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["a", "d"])
            .unwrap();
        assert_eq!(rec.sequence, ["d", "a"]);
        assert_eq!(rec.estimated_total_duration, 99.0);
        assert_eq!(
            rec.source,
            RecommendationSource::Pattern("full_review".to_string())
        );
    }

    #[test]
    fn external_required_deps_without_output_are_missing() {
        let dir = TempDir::new().unwrap();
        let (b, c) = (requires("a, x"), requires("y"));
        let (ws, config, reg) = setup(&dir, &[("b", &b), ("c", &c)]);
        ArtifactStore::new(&ws)
            .write(
                "done",
                ArtifactDraft {
                    command: "y".to_string(),
                    output_type: "report".to_string(),
                    session_id: "s".to_string(),
                    format: "markdown".to_string(),
                    quality_score: 0.5,
                    confidence_level: ConfidenceLevel::Low,
                    sharing_policy: SharingPolicy::Immediate,
                    cache_ttl: chrono::Duration::seconds(-1),
                    intended_consumers: Vec::new(),
                },
            )
            .unwrap();

        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["b", "c"])
            .unwrap();
        assert_eq!(rec.missing_dependencies, ["a", "x"]);
        assert_eq!(rec.parallel_groups, [vec!["b", "c"]]);
    }

    #[test]
    fn unknown_commands_are_flagged() {
        let dir = TempDir::new().unwrap();
        let (ws, config, reg) = setup(&dir, &[]);
        let rec = Recommender::new(&ws, &config, &reg)
            .recommend(&["a", "ghost", "a"])
            .unwrap();
        assert_eq!(rec.unknown_commands, ["ghost"]);
        assert_eq!(rec.sequence, ["a"]);
    }
}
