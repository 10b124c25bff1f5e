//! Best-effort activity summary after each cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::status::ActivityEvent;
use crate::store::{RemoteStore, Table};

/// Appends one summary row to the activity log per cycle.
pub struct ActivityNotifier {
    store: Arc<dyn RemoteStore>,
    call_timeout: Duration,
}

impl ActivityNotifier {
    pub fn new(store: Arc<dyn RemoteStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// Record a sync summary. Errors are logged and swallowed.
    ///
    /// Returns whether the entry was written.
    pub async fn notify_sync(&self, agents: usize, jobs: usize, failed: usize) -> bool {
        let event = ActivityEvent::sync_summary(agents, jobs, failed, Utc::now());
        match self.emit(&event).await {
            Ok(()) => {
                debug!(description = %event.description, "Activity logged");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to log activity");
                false
            }
        }
    }

    async fn emit(&self, event: &ActivityEvent) -> Result<(), RemoteError> {
        let row = serde_json::to_value(event)?;
        tokio::time::timeout(self.call_timeout, self.store.insert(Table::ActivityLog, &row))
            .await
            .map_err(|_| RemoteError::Timeout {
                table: Table::ActivityLog.name().to_string(),
                key: event.activity_type.clone(),
                timeout: self.call_timeout,
            })?
    }
}
