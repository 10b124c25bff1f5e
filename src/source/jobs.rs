//! Cron job list reader.
//!
//! The job list is a single JSON document, `{"jobs": [...]}`. Each entry is
//! decoded on its own so one bad job never hides the rest.

use std::io;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SourceError;

/// Outcome of a job's most recent run as recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastRunStatus {
    Ok,
    Error,
    #[serde(other)]
    Unknown,
}

/// Expression-based schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub tz: Option<String>,
}

/// Run bookkeeping maintained by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default)]
    pub last_status: Option<LastRunStatus>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub last_duration_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub consecutive_errors: Option<u32>,
}

/// Where a job's output is delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDelivery {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// What a job sends when it fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// One scheduled job as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: JobSchedule,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub delivery: JobDelivery,
    #[serde(default)]
    pub payload: JobPayload,
    #[serde(default)]
    pub session_target: Option<String>,
    #[serde(default)]
    pub wake_mode: Option<String>,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            enabled: true,
            schedule: JobSchedule::default(),
            state: JobState::default(),
            delivery: JobDelivery::default(),
            payload: JobPayload::default(),
            session_target: None,
            wake_mode: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Accept integer or float milliseconds; anything else reads as absent.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite())
        .map(|ms| ms as i64))
}

/// Accept any non-negative number, floats included; anything else reads as absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32))
}

/// Read the job list at `path`, in file order.
pub fn read_jobs(path: &Path) -> Vec<JobRecord> {
    match load_jobs(path) {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!("Ignoring job list: {e}");
            Vec::new()
        }
    }
}

fn load_jobs(path: &Path) -> Result<Vec<JobRecord>, SourceError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(file = %path.display(), "Job list missing, nothing to read");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(SourceError::Unavailable {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let document: Value = serde_json::from_str(&raw).map_err(|e| SourceError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let entries = match document {
        Value::Object(mut obj) => match obj.remove("jobs") {
            Some(Value::Array(entries)) => entries,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(SourceError::Malformed {
                    path: path.to_path_buf(),
                    reason: "\"jobs\" is not an array".to_string(),
                });
            }
        },
        Value::Array(entries) => entries,
        _ => {
            return Err(SourceError::Malformed {
                path: path.to_path_buf(),
                reason: "expected an object with a \"jobs\" array".to_string(),
            });
        }
    };

    let mut jobs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<JobRecord>(entry) {
            Ok(job) if job.id.trim().is_empty() => {
                warn!(file = %path.display(), index, name = %job.name, "Skipping job without an id");
            }
            Ok(job) => jobs.push(job),
            Err(e) => warn!(file = %path.display(), index, "Skipping malformed job: {e}"),
        }
    }
    Ok(jobs)
}
