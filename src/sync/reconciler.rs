//! Insert-or-update of derived records, keyed by natural id.
//!
//! Each record is applied independently. A failed record is logged and
//! counted; the rest of the batch still runs.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::status::{AgentStatus, CronStatus};
use crate::store::{RemoteStore, Table};

/// A derived record that maps onto one keyed remote row.
pub trait Reconcilable: Send + Sync {
    const TABLE: Table;

    /// Natural key value.
    fn key(&self) -> &str;

    /// Full row written when no remote row exists yet.
    fn insert_row(&self) -> Result<Value, RemoteError>;

    /// Mutable fields written over an existing row.
    fn update_patch(&self) -> Result<Value, RemoteError>;
}

impl Reconcilable for AgentStatus {
    const TABLE: Table = Table::AgentStatus;

    fn key(&self) -> &str {
        &self.agent_name
    }

    fn insert_row(&self) -> Result<Value, RemoteError> {
        Ok(serde_json::to_value(self)?)
    }

    fn update_patch(&self) -> Result<Value, RemoteError> {
        Ok(self.patch())
    }
}

impl Reconcilable for CronStatus {
    const TABLE: Table = Table::CronJobs;

    fn key(&self) -> &str {
        &self.job_id
    }

    fn insert_row(&self) -> Result<Value, RemoteError> {
        Ok(serde_json::to_value(self)?)
    }

    fn update_patch(&self) -> Result<Value, RemoteError> {
        let mut row = self.insert_row()?;
        if let Value::Object(obj) = &mut row {
            obj.remove("job_id");
        }
        Ok(row)
    }
}

/// Which write an upsert ended up issuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Per-batch tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Applies derived records to a remote store.
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    call_timeout: Duration,
    max_concurrency: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, call_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            store,
            call_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Reconcile every record, at most `max_concurrency` in flight.
    ///
    /// Records with a blank key, or a key already used earlier in the batch,
    /// count as failed without touching the store. Once `shutdown` fires no
    /// further records are started; calls already in flight run to completion
    /// and the untouched records are left out of `attempted`.
    pub async fn reconcile_all<R: Reconcilable>(
        &self,
        records: &[R],
        shutdown: &CancellationToken,
    ) -> BatchReport {
        let table = R::TABLE;
        let mut report = BatchReport::default();
        let mut seen = HashSet::new();
        let mut keyed = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key();
            if key.trim().is_empty() {
                report.attempted += 1;
                report.failed += 1;
                warn!(%table, "Skipping record with an empty key");
            } else if !seen.insert(key) {
                report.attempted += 1;
                report.failed += 1;
                warn!(%table, key, "Skipping record whose key repeats within the batch");
            } else {
                keyed.push(record);
            }
        }

        let results: Vec<(&str, Result<UpsertOutcome, RemoteError>)> =
            futures::stream::iter(keyed)
                .take_until(shutdown.cancelled())
                .map(|record| async move { (record.key(), self.upsert(record).await) })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

        report.attempted += results.len();
        for (key, result) in results {
            match result {
                Ok(outcome) => debug!(%table, key, ?outcome, "Reconciled"),
                Err(e) => {
                    report.failed += 1;
                    warn!(%table, key, error = %e, "Failed to reconcile record");
                }
            }
        }
        if report.attempted < records.len() {
            warn!(
                %table,
                skipped = records.len() - report.attempted,
                "Shutdown requested, batch left unfinished"
            );
        }
        report
    }

    /// Insert the record, or update it in place if its key already exists.
    pub async fn upsert<R: Reconcilable>(&self, record: &R) -> Result<UpsertOutcome, RemoteError> {
        let key = record.key();
        let existing = self
            .timed(R::TABLE, key, self.store.select(R::TABLE, key))
            .await?;

        if existing.is_some() {
            let patch = record.update_patch()?;
            self.timed(R::TABLE, key, self.store.update(R::TABLE, key, &patch))
                .await?;
            Ok(UpsertOutcome::Updated)
        } else {
            let row = record.insert_row()?;
            self.timed(R::TABLE, key, self.store.insert(R::TABLE, &row))
                .await?;
            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn timed<T>(
        &self,
        table: Table,
        key: &str,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| RemoteError::Timeout {
                table: table.name().to_string(),
                key: key.to_string(),
                timeout: self.call_timeout,
            })?
    }
}
