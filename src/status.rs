//! Status derivation.
//!
//! Pure mapping from normalized source records to the rows the remote
//! store holds. Every default for a missing source field is resolved here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::source::{JobRecord, LastRunStatus, SessionRecord};

/// Sessions with an event newer than this are working.
pub const WORKING_WINDOW_MS: i64 = 5 * 60 * 1000;
/// Sessions with an event newer than this (but not working) are idle.
pub const IDLE_WINDOW_MS: i64 = 30 * 60 * 1000;

pub const MAX_AGENT_NAME_CHARS: usize = 50;
pub const MAX_PAYLOAD_CHARS: usize = 500;

/// Derived state of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Working,
    Idle,
    Completed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::Idle => write!(f, "idle"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Derived state of a cron job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CronState {
    Stopped,
    Pending,
    Running,
    Failed,
}

impl fmt::Display for CronState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Map the age of a session's last event to a state.
pub fn session_state(last_event_at: i64, now_ms: i64) -> AgentState {
    let elapsed = now_ms.saturating_sub(last_event_at);
    if elapsed < WORKING_WINDOW_MS {
        AgentState::Working
    } else if elapsed < IDLE_WINDOW_MS {
        AgentState::Idle
    } else {
        AgentState::Completed
    }
}

/// Map a job's enable flag and run bookkeeping to a state.
///
/// A missing `next_run_at` counts as 0, so an ok job with no next run is
/// `running`. A job that never ran is `failed`, same as an errored one.
pub fn job_state(job: &JobRecord, now_ms: i64) -> CronState {
    if !job.enabled {
        return CronState::Stopped;
    }
    match job.state.last_status {
        Some(LastRunStatus::Ok) => {
            if job.state.next_run_at_ms.unwrap_or(0) > now_ms {
                CronState::Pending
            } else {
                CronState::Running
            }
        }
        _ => CronState::Failed,
    }
}

/// Remote-facing status of one agent session. Keyed by `agent_name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub agent_name: String,
    pub status: AgentState,
    pub task_name: String,
    /// First-seen time; written on insert only.
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub details: AgentDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDetails {
    pub session_id: String,
}

impl AgentStatus {
    pub fn derive(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            agent_name: truncate_chars(&record.id, MAX_AGENT_NAME_CHARS),
            status: session_state(record.last_event_at, now.timestamp_millis()),
            task_name: record.current_task.clone(),
            started_at: millis_to_datetime(record.last_event_at),
            updated_at: now,
            details: AgentDetails {
                session_id: record.id.clone(),
            },
        }
    }

    /// Fields rewritten when the row already exists.
    pub fn patch(&self) -> Value {
        json!({
            "status": self.status,
            "task_name": self.task_name,
            "updated_at": self.updated_at,
            "details": self.details,
        })
    }
}

/// Remote-facing status of one cron job. Keyed by `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronStatus {
    pub job_id: String,
    pub name: String,
    pub enabled: bool,
    pub status: CronState,
    pub schedule_expr: String,
    pub timezone: String,
    pub session_target: String,
    pub wake_mode: String,
    pub payload_message: String,
    pub model: String,
    pub delivery_mode: String,
    pub delivery_channel: String,
    pub delivery_target: String,
    pub last_run_at: Option<DateTime<Utc>>,
    /// `ok`, `error`, `unknown`, or `never` when the job has no recorded run.
    pub last_status: String,
    pub last_duration_ms: i64,
    pub consecutive_errors: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CronStatus {
    pub fn derive(job: &JobRecord, now: DateTime<Utc>) -> Self {
        let state = &job.state;
        let last_status = match state.last_status {
            Some(LastRunStatus::Ok) => "ok",
            Some(LastRunStatus::Error) => "error",
            Some(LastRunStatus::Unknown) => "unknown",
            None => "never",
        };

        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            enabled: job.enabled,
            status: job_state(job, now.timestamp_millis()),
            schedule_expr: job.schedule.expr.clone().unwrap_or_default(),
            timezone: job.schedule.tz.clone().unwrap_or_default(),
            session_target: job.session_target.clone().unwrap_or_default(),
            wake_mode: job.wake_mode.clone().unwrap_or_default(),
            payload_message: job
                .payload
                .message
                .as_deref()
                .map(|m| truncate_chars(m, MAX_PAYLOAD_CHARS))
                .unwrap_or_default(),
            model: job.payload.model.clone().unwrap_or_default(),
            delivery_mode: job.delivery.mode.clone().unwrap_or_default(),
            delivery_channel: job.delivery.channel.clone().unwrap_or_default(),
            delivery_target: job.delivery.to.clone().unwrap_or_default(),
            last_run_at: state.last_run_at_ms.filter(|&ms| ms != 0).map(millis_to_datetime),
            last_status: last_status.to_string(),
            last_duration_ms: state.last_duration_ms.unwrap_or(0),
            consecutive_errors: state.consecutive_errors.unwrap_or(0),
            next_run_at: state.next_run_at_ms.filter(|&ms| ms != 0).map(millis_to_datetime),
            updated_at: now,
        }
    }
}

/// Append-only activity entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    pub agent_name: Option<String>,
    pub activity_type: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityEvent {
    /// Summary written after each completed cycle.
    pub fn sync_summary(agents: usize, jobs: usize, failed: usize, now: DateTime<Utc>) -> Self {
        Self {
            agent_name: None,
            activity_type: "sync".to_string(),
            description: format!("Synced {agents} agents and {jobs} cron jobs ({failed} failed)"),
            recorded_at: now,
        }
    }
}

/// Out-of-range values clamp to the epoch rather than failing.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Keep at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}
