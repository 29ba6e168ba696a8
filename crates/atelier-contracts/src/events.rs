use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TargetSelected,
    DispatchCompleted,
    JobSubmitted,
    JobPolled,
    JobCompleted,
    JobFailed,
    JobTimedOut,
    JobCancelled,
    ArtifactStored,
    StorageDegraded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TargetSelected => "target_selected",
            EventKind::DispatchCompleted => "dispatch_completed",
            EventKind::JobSubmitted => "job_submitted",
            EventKind::JobPolled => "job_polled",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobFailed => "job_failed",
            EventKind::JobTimedOut => "job_timed_out",
            EventKind::JobCancelled => "job_cancelled",
            EventKind::ArtifactStored => "artifact_stored",
            EventKind::StorageDegraded => "storage_degraded",
        }
    }
}

/// Append-only job event log (`events.jsonl`).
///
/// - every line carries `type`, `session_id` and `ts`
/// - payload keys are merged first; the reserved keys always win
/// - a disabled log accepts events and writes nothing
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Option<Arc<EventLogInner>>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn open(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Some(Arc::new(EventLogInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            })),
        }
    }

    pub fn open_new_session(path: impl Into<PathBuf>) -> Self {
        Self::open(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.as_ref().map(|inner| inner.path.as_path())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.session_id.as_str())
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Option<Value>> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(None);
        };

        let mut event = payload;
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = inner.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)
            .with_context(|| format!("failed to open {}", inner.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Some(Value::Object(event)))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::open(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("handle".to_string(), Value::String("operations/abc".to_string()));
        let emitted = log.emit(EventKind::JobSubmitted, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(Some(parsed.clone()), emitted);
        assert_eq!(parsed["type"], Value::String("job_submitted".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["handle"], Value::String("operations/abc".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn reserved_keys_cannot_be_overridden() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::open(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        payload.insert(
            "session_id".to_string(),
            Value::String("someone-else".to_string()),
        );
        let emitted = log.emit(EventKind::JobPolled, payload)?.unwrap_or_default();

        assert_eq!(emitted["type"], Value::String("job_polled".to_string()));
        assert_eq!(emitted["session_id"], Value::String("session-123".to_string()));
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventLog::open_new_session(&path);

        log.emit(EventKind::JobSubmitted, EventPayload::new())?;
        log.emit(EventKind::JobCompleted, EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("job_submitted".to_string()));
        assert_eq!(second["type"], Value::String("job_completed".to_string()));
        assert_eq!(first["session_id"], second["session_id"]);
        Ok(())
    }

    #[test]
    fn disabled_log_writes_nothing() -> anyhow::Result<()> {
        let log = EventLog::disabled();
        assert!(!log.is_enabled());
        assert!(log.emit(EventKind::ArtifactStored, EventPayload::new())?.is_none());
        Ok(())
    }
}
