//! On-disk sources: per-session event logs and the cron job list.
//!
//! Readers never fail the batch. Missing sources yield empty results and
//! malformed records are skipped with a warning.

pub mod jobs;
pub mod sessions;

pub use jobs::{JobDelivery, JobPayload, JobRecord, JobSchedule, JobState, LastRunStatus, read_jobs};
pub use sessions::{SessionRecord, read_sessions};
