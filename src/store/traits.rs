//! `RemoteStore` trait — the request/response surface of the status store.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;

/// Tables the daemon writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// One row per agent, keyed by `agent_name`.
    AgentStatus,
    /// One row per cron job, keyed by `job_id`.
    CronJobs,
    /// Append-only activity entries.
    ActivityLog,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentStatus => "agent_status",
            Self::CronJobs => "cron_jobs",
            Self::ActivityLog => "activity_log",
        }
    }

    /// Natural key column, or `None` for append-only tables.
    pub fn key_column(&self) -> Option<&'static str> {
        match self {
            Self::AgentStatus => Some("agent_name"),
            Self::CronJobs => Some("job_id"),
            Self::ActivityLog => None,
        }
    }

    pub(crate) fn require_key(&self) -> Result<&'static str, RemoteError> {
        self.key_column().ok_or_else(|| RemoteError::Request {
            table: self.name().to_string(),
            reason: "table is append-only".to_string(),
        })
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backend-agnostic remote store.
///
/// Rows are JSON objects. Keyed operations match on the table's natural
/// key column.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the row whose key column equals `key`, if any.
    async fn select(&self, table: Table, key: &str) -> Result<Option<Value>, RemoteError>;

    /// Insert a new row.
    async fn insert(&self, table: Table, row: &Value) -> Result<(), RemoteError>;

    /// Apply `patch` to the row whose key column equals `key`.
    async fn update(&self, table: Table, key: &str, patch: &Value) -> Result<(), RemoteError>;
}
