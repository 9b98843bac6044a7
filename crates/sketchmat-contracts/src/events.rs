use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

/// Everything a session records in its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStarted,
    TurnRouted,
    TurnFailed,
    ImageSaved,
    GallerySaveFailed,
    HistorySelected,
    ParametersUpdated,
    ImagineFinished,
    PreviewExported,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEvent::SessionStarted => "session_started",
            SessionEvent::TurnRouted => "turn_routed",
            SessionEvent::TurnFailed => "turn_failed",
            SessionEvent::ImageSaved => "image_saved",
            SessionEvent::GallerySaveFailed => "gallery_save_failed",
            SessionEvent::HistorySelected => "history_selected",
            SessionEvent::ParametersUpdated => "parameters_updated",
            SessionEvent::ImagineFinished => "imagine_finished",
            SessionEvent::PreviewExported => "preview_exported",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only `events.jsonl` for one chat session.
///
/// Each line is a compact JSON object with `type`, `session_id`, a
/// per-writer `seq` starting at 1 and an RFC 3339 `ts`. Payload keys are
/// merged in, except that they cannot replace those four.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        // Held across the write so `seq` matches line order.
        let mut next_seq = self
            .shared
            .next_seq
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;

        let mut record = payload;
        record.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        record.insert("type".to_string(), Value::from(event.as_str()));
        record.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        record.insert("seq".to_string(), Value::from(*next_seq));
        record.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        if let Some(parent) = self
            .shared
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .and_then(|mut file| file.write_all(&line))
            .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;

        *next_seq += 1;
        Ok(Value::Object(record))
    }
}

/// Every event in a log, oldest first. A missing file reads as empty.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{} line {} is not JSON", path.display(), idx + 1))
        })
        .collect()
}
