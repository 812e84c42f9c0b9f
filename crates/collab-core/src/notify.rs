//! Post-store fan-out: knowledge base update, insight extraction, and
//! notifications pushed into the inboxes of commands that declared an
//! optional interest in the new output.
//!
//! Delivery is fire-and-forget. The artifact is already durable when this
//! runs, so every failure here is logged and reported, never propagated.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::knowledge::{Insight, InsightRules, KnowledgeBase, ProjectContext};
use crate::registry::Registry;
use crate::store::StoredArtifact;
use crate::workspace::Workspace;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    DependencyAvailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub source_command: String,
    pub output_type: String,
    pub quality_score: f64,
    pub timestamp: DateTime<Utc>,
    /// Content file of the artifact that triggered the notification.
    pub artifact: PathBuf,
}

/// What happened after an artifact was stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreEffects {
    pub insights: Vec<Insight>,
    pub notified: Vec<String>,
    pub failed: Vec<String>,
    pub knowledge_updated: bool,
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

/// Every registered command whose manifest lists an optional dependency on
/// `(producer, output_type)`, in name order.
pub fn potential_consumers(
    ws: &Workspace,
    config: &EngineConfig,
    registry: &Registry,
    producer: &str,
    output_type: &str,
) -> Vec<String> {
    registry
        .discover_all(ws, config)
        .into_iter()
        .filter(|d| d.name != producer)
        .filter(|d| {
            d.manifest()
                .is_some_and(|m| m.depends_optionally_on(producer, output_type))
        })
        .map(|d| d.name)
        .collect()
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Update shared state and notify `stored`'s intended consumers.
pub fn on_artifact_stored(
    ws: &Workspace,
    config: &EngineConfig,
    rules: &InsightRules,
    stored: &StoredArtifact,
) -> StoreEffects {
    let metadata = &stored.metadata;
    let mut effects = StoreEffects::default();

    match KnowledgeBase::record_output(ws, metadata, rules) {
        Ok(insights) => {
            effects.insights = insights;
            effects.knowledge_updated = true;
        }
        Err(e) => {
            tracing::warn!(command = %metadata.command(), error = %e, "knowledge base update failed");
        }
    }

    if let Err(e) = ProjectContext::record_activity(ws, metadata, config.activity_limit) {
        tracing::warn!(command = %metadata.command(), error = %e, "project context update failed");
    }

    if !metadata.sharing_policy().pushes_notifications() {
        return effects;
    }

    let notification = Notification {
        event: NotificationEvent::DependencyAvailable,
        source_command: metadata.command().to_string(),
        output_type: metadata.output_type().to_string(),
        quality_score: metadata.quality_score(),
        timestamp: metadata.timestamp(),
        artifact: stored.content_path.clone(),
    };
    for consumer in &metadata.collaboration_data.intended_consumers {
        match deliver(ws, consumer, &notification) {
            Ok(()) => effects.notified.push(consumer.clone()),
            Err(e) => {
                tracing::warn!(consumer = %consumer, error = %e, "notification delivery failed");
                effects.failed.push(consumer.clone());
            }
        }
    }
    effects
}

fn deliver(ws: &Workspace, consumer: &str, notification: &Notification) -> Result<()> {
    paths::validate_command_name(consumer)?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let filename = format!(
        "{}_{}_{}_{}.yaml",
        notification.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
        notification.source_command,
        notification.output_type,
        &suffix[..8]
    );
    let path = paths::notifications_dir(ws.root(), consumer).join(filename);
    let data = serde_yaml::to_string(notification)?;
    io::atomic_write(&path, data.as_bytes())
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

fn inbox(ws: &Workspace, command: &str) -> Result<Vec<(PathBuf, Notification)>> {
    paths::validate_command_name(command)?;
    let dir = paths::notifications_dir(ws.root(), command);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let data = match String::from_utf8(bytes) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping notification that is not valid UTF-8");
                continue;
            }
        };
        match serde_yaml::from_str::<Notification>(&data) {
            Ok(n) => entries.push((path, n)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt notification");
            }
        }
    }
    entries.sort_by(|(pa, a), (pb, b)| (a.timestamp, pa).cmp(&(b.timestamp, pb)));
    Ok(entries)
}

/// Pending notifications for `command`, oldest first.
pub fn pending(ws: &Workspace, command: &str) -> Result<Vec<Notification>> {
    Ok(inbox(ws, command)?.into_iter().map(|(_, n)| n).collect())
}

/// Remove every readable notification from `command`'s inbox.
/// Returns how many were removed.
pub fn acknowledge(ws: &Workspace, command: &str) -> Result<usize> {
    let mut removed = 0;
    for (path, _) in inbox(ws, command)? {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArtifactDraft, ArtifactStore};
    use crate::types::{ConfidenceLevel, SharingPolicy};
    use tempfile::TempDir;

    const REGISTRY: &str = r#"
commands:
  analyzer: {name: analyzer}
  strategist: {name: strategist}
  reporter: {name: reporter}
  auditor: {name: auditor}
"#;

    fn setup(dir: &TempDir) -> (Workspace, EngineConfig) {
        let ws = Workspace::init(dir.path()).unwrap();
        std::fs::write(paths::registry_path(ws.root()), REGISTRY).unwrap();
        let manifest = |name: &str, body: &str| {
            io::atomic_write(&paths::local_manifest(ws.root(), name), body.as_bytes()).unwrap();
        };
        manifest(
            "strategist",
            "dependencies:\n  optional:\n    - {command: analyzer, output_type: report, enhancement: context}\n",
        );
        manifest(
            "reporter",
            "dependencies:\n  optional:\n    - {command: analyzer, enhancement: anything}\n",
        );
        manifest(
            "auditor",
            "dependencies:\n  required: [analyzer]\n",
        );
        let config = EngineConfig {
            user_manifest_dir: None,
            ..EngineConfig::default()
        };
        (ws, config)
    }

    fn store(
        ws: &Workspace,
        output_type: &str,
        policy: SharingPolicy,
        consumers: Vec<String>,
    ) -> StoredArtifact {
        ArtifactStore::new(ws)
            .write(
                "body",
                ArtifactDraft {
                    command: "analyzer".to_string(),
                    output_type: output_type.to_string(),
                    session_id: "s".to_string(),
                    format: "markdown".to_string(),
                    quality_score: 0.75,
                    confidence_level: ConfidenceLevel::Medium,
                    sharing_policy: policy,
                    cache_ttl: chrono::Duration::hours(1),
                    intended_consumers: consumers,
                },
            )
            .unwrap()
    }

    #[test]
    fn consumers_match_optional_deps_only() {
        let dir = TempDir::new().unwrap();
        let (ws, config) = setup(&dir);
        let reg = Registry::load(&ws);
        assert_eq!(
            potential_consumers(&ws, &config, &reg, "analyzer", "report"),
            ["reporter", "strategist"]
        );
        assert_eq!(
            potential_consumers(&ws, &config, &reg, "analyzer", "scores"),
            ["reporter"]
        );
        assert!(potential_consumers(&ws, &config, &reg, "strategist", "report").is_empty());
    }

    #[test]
    fn fan_out_writes_one_notification_per_consumer() {
        let dir = TempDir::new().unwrap();
        let (ws, config) = setup(&dir);
        let consumers = vec!["reporter".to_string(), "strategist".to_string()];
        let stored = store(&ws, "report", SharingPolicy::Immediate, consumers.clone());

        let effects = on_artifact_stored(&ws, &config, &InsightRules::default(), &stored);
        assert_eq!(effects.notified, consumers);
        assert!(effects.failed.is_empty());
        assert!(effects.knowledge_updated);

        let inbox = pending(&ws, "strategist").unwrap();
        assert_eq!(inbox.len(), 1);
        let n = &inbox[0];
        assert_eq!(n.event, NotificationEvent::DependencyAvailable);
        assert_eq!(n.source_command, "analyzer");
        assert_eq!(n.output_type, "report");
        assert_eq!(n.quality_score, 0.75);
        assert_eq!(n.artifact, stored.content_path);
        assert!(pending(&ws, "auditor").unwrap().is_empty());
    }

    #[test]
    fn one_failed_delivery_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        let (ws, config) = setup(&dir);
        // A file where the inbox directory should be makes delivery fail.
        std::fs::create_dir_all(paths::command_dir(ws.root(), "reporter")).unwrap();
        std::fs::write(paths::notifications_dir(ws.root(), "reporter"), "not a dir").unwrap();

        let stored = store(
            &ws,
            "report",
            SharingPolicy::Immediate,
            vec!["reporter".to_string(), "strategist".to_string()],
        );
        let effects = on_artifact_stored(&ws, &config, &InsightRules::default(), &stored);
        assert_eq!(effects.failed, ["reporter"]);
        assert_eq!(effects.notified, ["strategist"]);
        assert_eq!(pending(&ws, "strategist").unwrap().len(), 1);
    }

    #[test]
    fn on_request_sharing_skips_push() {
        let dir = TempDir::new().unwrap();
        let (ws, config) = setup(&dir);
        let stored = store(
            &ws,
            "report",
            SharingPolicy::OnRequest,
            vec!["strategist".to_string()],
        );
        let effects = on_artifact_stored(&ws, &config, &InsightRules::default(), &stored);
        assert!(effects.notified.is_empty());
        assert!(effects.knowledge_updated);
        assert!(pending(&ws, "strategist").unwrap().is_empty());
    }

    #[test]
    fn acknowledge_clears_inbox() {
        let dir = TempDir::new().unwrap();
        let (ws, config) = setup(&dir);
        for _ in 0..2 {
            let stored = store(
                &ws,
                "report",
                SharingPolicy::Immediate,
                vec!["strategist".to_string()],
            );
            on_artifact_stored(&ws, &config, &InsightRules::default(), &stored);
        }
        let inbox = pending(&ws, "strategist").unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox[0].timestamp <= inbox[1].timestamp);

        assert_eq!(acknowledge(&ws, "strategist").unwrap(), 2);
        assert!(pending(&ws, "strategist").unwrap().is_empty());
    }

    #[test]
    fn corrupt_notification_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (ws, _) = setup(&dir);
        io::atomic_write(
            &paths::notifications_dir(ws.root(), "strategist").join("bad.yaml"),
            b"event: [",
        )
        .unwrap();
        assert!(pending(&ws, "strategist").unwrap().is_empty());
    }

    #[test]
    fn non_utf8_notification_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (ws, _) = setup(&dir);
        let inbox_dir = paths::notifications_dir(ws.root(), "strategist");
        io::atomic_write(&inbox_dir.join("bad.yaml"), &[0xff, 0xfe, 0x00, 0x80]).unwrap();
        let notification = Notification {
            event: NotificationEvent::DependencyAvailable,
            source_command: "analyzer".to_string(),
            output_type: "report".to_string(),
            quality_score: 0.5,
            timestamp: Utc::now(),
            artifact: PathBuf::from("commands/analyzer/outputs/report.md"),
        };
        deliver(&ws, "strategist", &notification).unwrap();

        assert_eq!(pending(&ws, "strategist").unwrap(), [notification]);
        assert_eq!(acknowledge(&ws, "strategist").unwrap(), 1);
        assert!(pending(&ws, "strategist").unwrap().is_empty());
    }
}
