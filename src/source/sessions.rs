//! Session log reader.
//!
//! Each session is a `<id>.jsonl` file of newline-delimited events. Only the
//! final event matters, so files are read backwards from the end.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::status::truncate_chars;

/// Maximum length of the task summary taken from the last event.
pub const MAX_TASK_CHARS: usize = 100;

/// Task label used when the last event carries no content.
pub const DEFAULT_TASK: &str = "Active session";

const SESSION_EXTENSION: &str = "jsonl";
const EXCLUDED_MARKERS: &[&str] = &[".deleted.", ".reset.", ".lock"];
const TAIL_CHUNK: u64 = 8 * 1024;

/// Normalized view of one session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// File stem of the log.
    pub id: String,
    /// Timestamp of the most recent event, in ms since epoch.
    pub last_event_at: i64,
    /// Short summary of the most recent event.
    pub current_task: String,
}

/// Shape of a single log line. Everything is optional.
#[derive(Debug, Default, Deserialize)]
struct SessionEvent {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct EventMessage {
    #[serde(default)]
    content: Option<Value>,
}

/// Read every active session log under `dir`.
///
/// `now_ms` stands in for events whose timestamp is missing or unparseable.
pub fn read_sessions(dir: &Path, now_ms: i64) -> BTreeMap<String, SessionRecord> {
    let mut sessions = BTreeMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Sessions directory missing, nothing to read");
            return sessions;
        }
        Err(e) => {
            let err = SourceError::Unavailable {
                path: dir.to_path_buf(),
                source: e,
            };
            warn!("{err}");
            return sessions;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !is_session_log(&path) {
            continue;
        }
        match read_session_file(&path, now_ms) {
            Ok(Some(record)) => {
                sessions.insert(record.id.clone(), record);
            }
            Ok(None) => debug!(file = %path.display(), "Session log has no events, skipping"),
            Err(e) => warn!("Skipping session log: {e}"),
        }
    }

    sessions
}

/// Whether a path names an active session log.
pub fn is_session_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.extension().and_then(|e| e.to_str()) == Some(SESSION_EXTENSION)
        && !EXCLUDED_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Parse the last event of one log. `Ok(None)` means the log is empty.
pub fn read_session_file(path: &Path, now_ms: i64) -> Result<Option<SessionRecord>, SourceError> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| SourceError::Malformed {
            path: path.to_path_buf(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;

    let line = read_last_line(path).map_err(|e| SourceError::Unavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let Some(line) = line else {
        return Ok(None);
    };

    let event: SessionEvent = serde_json::from_str(&line).map_err(|e| malformed(path, e))?;

    let last_event_at = event
        .timestamp
        .as_ref()
        .map(|ts| parse_timestamp(ts, now_ms))
        .unwrap_or(now_ms);

    Ok(Some(SessionRecord {
        id,
        last_event_at,
        current_task: event_task(&event),
    }))
}

fn malformed(path: &Path, e: impl std::fmt::Display) -> SourceError {
    SourceError::Malformed {
        path: PathBuf::from(path),
        reason: e.to_string(),
    }
}

/// Return the last non-blank line of a file without reading all of it.
///
/// Chunks are read backwards and kept in read order; only the newest chunk
/// is searched for the line start, so the cost is linear in the line length.
pub fn read_last_line(path: &Path) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let mut pos = file.seek(SeekFrom::End(0))?;
    // chunks[0] is the one nearest the end of the file
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut found_content = false;

    while pos > 0 {
        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;

        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;

        // newline search stops at the last content byte while none has been seen yet
        let search_end = if found_content {
            Some(chunk.len())
        } else {
            chunk
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map(|end| {
                    found_content = true;
                    end
                })
        };

        let line_start =
            search_end.and_then(|end| chunk[..end].iter().rposition(|&b| b == b'\n'));
        match line_start {
            Some(newline) => {
                chunks.push(chunk.split_off(newline + 1));
                break;
            }
            None => chunks.push(chunk),
        }
    }

    let total: usize = chunks.iter().map(Vec::len).sum();
    let mut line = Vec::with_capacity(total);
    for chunk in chunks.iter().rev() {
        line.extend_from_slice(chunk);
    }

    let text = String::from_utf8_lossy(&line);
    let trimmed = text.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Interpret an event timestamp as ms since epoch.
///
/// Numbers are milliseconds. Strings are RFC 3339 / ISO-8601 datetimes or
/// unix seconds. Anything else, and zero, falls back to `now_ms`.
pub fn parse_timestamp(ts: &Value, now_ms: i64) -> i64 {
    match ts {
        Value::Number(n) => match n.as_f64() {
            Some(ms) if ms != 0.0 && ms.is_finite() => ms as i64,
            _ => now_ms,
        },
        Value::String(s) => parse_timestamp_str(s.trim()).unwrap_or(now_ms),
        _ => now_ms,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if s.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.timestamp_millis());
        }
        return NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    s.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .map(|secs| (secs * 1000.0) as i64)
}

fn event_task(event: &SessionEvent) -> String {
    let content = event
        .content
        .as_ref()
        .or_else(|| event.message.as_ref().and_then(|m| m.content.as_ref()));

    match content.and_then(content_text) {
        Some(text) => truncate_chars(text.trim(), MAX_TASK_CHARS),
        None => DEFAULT_TASK.to_string(),
    }
}

/// Flatten string or `[{type: "text", text}]` content into plain text.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            (!texts.is_empty()).then(|| texts.join(" "))
        }
        _ => None,
    }
}
