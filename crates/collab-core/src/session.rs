use crate::config::EngineConfig;
use crate::error::Result;
use crate::knowledge::ProjectContext;
use crate::workspace::Workspace;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Log records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// One JSON line in a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub level: LogLevel,
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One engine instantiation. Owns an id and a private log; all other state
/// lives in the shared workspace.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    log_path: PathBuf,
}

impl Session {
    /// Start a new session against `ws` and record it in the project context.
    pub fn start(ws: &Workspace, config: &EngineConfig) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Self {
            log_path: paths::session_log(ws.root(), &id),
            started_at: Utc::now(),
            id,
        };
        io::ensure_dir(&paths::session_dir(ws.root(), &session.id))?;
        session.log(
            LogLevel::Info,
            "session_started",
            serde_json::json!({ "workspace": ws.root().display().to_string() }),
        );
        if let Err(e) = ProjectContext::record_session(ws, &session, config.activity_limit) {
            tracing::warn!(session = %session.id, error = %e, "failed to register session in project context");
        }
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append a record to the session log. Logging never fails the caller.
    pub fn log(&self, level: LogLevel, event: &str, detail: serde_json::Value) {
        let record = LogRecord {
            timestamp: Utc::now(),
            session_id: self.id.clone(),
            level,
            event: event.to_string(),
            detail,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line + "\n",
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "unserializable session log record");
                return;
            }
        };
        if let Err(e) = io::append_text(&self.log_path, &line) {
            tracing::warn!(session = %self.id, error = %e, "failed to write session log");
        }
    }

    /// Read back every parseable record in this session's log.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read(&self.log_path)?;
        let data = String::from_utf8_lossy(&raw);
        let mut records = Vec::new();
        for (n, line) in data.lines().enumerate() {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %self.log_path.display(), line = n + 1, error = %e, "skipping corrupt session log line");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sessions_get_unique_ids_and_logs() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        let a = Session::start(&ws, &EngineConfig::default()).unwrap();
        let b = Session::start(&ws, &EngineConfig::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.log_path(), b.log_path());
        assert!(a.log_path().starts_with(dir.path().join("sessions").join(a.id())));
    }

    #[test]
    fn log_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        let s = Session::start(&ws, &EngineConfig::default()).unwrap();
        s.log(
            LogLevel::Warn,
            "corrupt_sidecar",
            serde_json::json!({ "path": "x" }),
        );

        let records = s.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, "session_started");
        assert_eq!(records[1].level, LogLevel::Warn);
        assert!(records.iter().all(|r| r.session_id == s.id()));
    }

    #[test]
    fn session_is_registered_in_project_context() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        let s = Session::start(&ws, &EngineConfig::default()).unwrap();
        let ctx = ProjectContext::load(&ws);
        assert!(ctx.sessions.contains_key(s.id()));
    }

    #[test]
    fn corrupt_log_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        let s = Session::start(&ws, &EngineConfig::default()).unwrap();
        io::append_text(s.log_path(), "{not json\n").unwrap();
        s.log(LogLevel::Info, "after", serde_json::Value::Null);

        let events: Vec<String> = s.records().unwrap().into_iter().map(|r| r.event).collect();
        assert_eq!(events, ["session_started", "after"]);
    }

    #[test]
    fn project_context_keeps_newest_sessions() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        let config = EngineConfig {
            activity_limit: 2,
            ..EngineConfig::default()
        };
        let first = Session::start(&ws, &config).unwrap();
        let second = Session::start(&ws, &config).unwrap();
        let third = Session::start(&ws, &config).unwrap();

        let ctx = ProjectContext::load(&ws);
        assert_eq!(ctx.sessions.len(), 2);
        assert!(!ctx.sessions.contains_key(first.id()));
        assert!(ctx.sessions.contains_key(second.id()));
        assert!(ctx.sessions.contains_key(third.id()));
    }
}
