//! Scheduler loop.
//!
//! `Init -> (RunCycle -> Sleep)* -> Stopped`. Each cycle reads the sources,
//! derives statuses and hands them to the configured target. A failed cycle
//! is logged and followed by a normal sleep; only the shutdown token stops
//! the loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::source::{self, JobRecord, SessionRecord};
use crate::status::{AgentStatus, CronStatus};
use crate::store::{RemoteStore, RestStore};
use crate::sync::console::ConsoleSink;
use crate::sync::notifier::ActivityNotifier;
use crate::sync::reconciler::{BatchReport, Reconciler};

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Init,
    RunCycle,
    Sleep,
    Stopped,
}

/// Where derived records go.
pub enum SyncTarget {
    Remote {
        reconciler: Reconciler,
        notifier: ActivityNotifier,
    },
    /// Degraded mode: no remote writes.
    Local(ConsoleSink),
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub agents: BatchReport,
    pub jobs: BatchReport,
    pub notified: bool,
    /// Shutdown arrived mid-cycle and some records were not attempted.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.agents.failed + self.jobs.failed
    }
}

pub struct SyncDaemon {
    config: SyncConfig,
    target: SyncTarget,
    state: DaemonState,
    cycles: u64,
}

impl SyncDaemon {
    /// Set up the target from config: remote when credentials are usable,
    /// local otherwise.
    pub fn new(config: SyncConfig) -> Self {
        let store = config
            .remote
            .as_ref()
            .and_then(|remote| match RestStore::new(remote) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn RemoteStore>),
                Err(e) => {
                    warn!("Remote store unavailable, running in local mode: {e}");
                    None
                }
            });

        match store {
            Some(store) => Self::with_store(config, store),
            None => Self::local(config),
        }
    }

    /// Reconcile into the given store.
    pub fn with_store(config: SyncConfig, store: Arc<dyn RemoteStore>) -> Self {
        let target = SyncTarget::Remote {
            reconciler: Reconciler::new(
                Arc::clone(&store),
                config.call_timeout,
                config.max_concurrency,
            ),
            notifier: ActivityNotifier::new(store, config.call_timeout),
        };
        Self::from_parts(config, target)
    }

    /// Degraded mode: log derived records locally.
    pub fn local(config: SyncConfig) -> Self {
        Self::from_parts(config, SyncTarget::Local(ConsoleSink::new()))
    }

    fn from_parts(config: SyncConfig, target: SyncTarget) -> Self {
        Self {
            config,
            target,
            state: DaemonState::Init,
            cycles: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.target, SyncTarget::Local(_))
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Cycles run so far, failed ones included.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation during a cycle stops new remote calls; calls already in
    /// flight finish first. Cancellation during the sleep takes effect
    /// immediately.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            self.state = match self.state {
                DaemonState::Init => {
                    let mode = if self.is_degraded() { "local" } else { "remote" };
                    info!(
                        sessions = %self.config.sessions_dir.display(),
                        jobs = %self.config.jobs_file.display(),
                        interval_secs = self.config.interval.as_secs(),
                        mode,
                        "Sync daemon started"
                    );
                    DaemonState::RunCycle
                }
                DaemonState::RunCycle => {
                    match self.cycle(&shutdown).await {
                        Ok(report) => info!(
                            agents = report.agents.attempted,
                            jobs = report.jobs.attempted,
                            failed = report.failed(),
                            notified = report.notified,
                            interrupted = report.interrupted,
                            "Sync cycle complete"
                        ),
                        Err(e) => error!(error = %e, "Sync cycle failed"),
                    }
                    self.cycles += 1;
                    if shutdown.is_cancelled() {
                        DaemonState::Stopped
                    } else {
                        DaemonState::Sleep
                    }
                }
                DaemonState::Sleep => {
                    tokio::select! {
                        _ = shutdown.cancelled() => DaemonState::Stopped,
                        _ = tokio::time::sleep(self.config.interval) => DaemonState::RunCycle,
                    }
                }
                DaemonState::Stopped => {
                    info!(cycles = self.cycles, "Sync daemon stopped");
                    return;
                }
            };
            debug!(state = ?self.state, "Daemon state");
        }
    }

    /// Read, derive and publish once.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.cycle(&CancellationToken::new()).await
    }

    async fn cycle(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        let now = Utc::now();
        let (sessions, jobs) = self.read_sources(now.timestamp_millis()).await?;

        let agents: Vec<AgentStatus> = sessions
            .values()
            .map(|record| AgentStatus::derive(record, now))
            .collect();
        let crons: Vec<CronStatus> = jobs.iter().map(|job| CronStatus::derive(job, now)).collect();
        debug!(agents = agents.len(), jobs = crons.len(), "Derived statuses");

        let report = match &self.target {
            SyncTarget::Remote {
                reconciler,
                notifier,
            } => {
                let agents_report = reconciler.reconcile_all(&agents, shutdown).await;
                let jobs_report = reconciler.reconcile_all(&crons, shutdown).await;
                let interrupted = agents_report.attempted < agents.len()
                    || jobs_report.attempted < crons.len();
                let notified = if interrupted {
                    false
                } else {
                    notifier
                        .notify_sync(
                            agents.len(),
                            crons.len(),
                            agents_report.failed + jobs_report.failed,
                        )
                        .await
                };
                CycleReport {
                    agents: agents_report,
                    jobs: jobs_report,
                    notified,
                    interrupted,
                }
            }
            SyncTarget::Local(sink) => CycleReport {
                agents: sink.publish_agents(&agents),
                jobs: sink.publish_jobs(&crons),
                notified: false,
                interrupted: false,
            },
        };

        Ok(report)
    }

    async fn read_sources(
        &self,
        now_ms: i64,
    ) -> Result<(BTreeMap<String, SessionRecord>, Vec<JobRecord>)> {
        let sessions_dir = self.config.sessions_dir.clone();
        let jobs_file = self.config.jobs_file.clone();

        tokio::task::spawn_blocking(move || {
            let sessions = source::read_sessions(&sessions_dir, now_ms);
            let jobs = source::read_jobs(&jobs_file);
            (sessions, jobs)
        })
        .await
        .map_err(|e| Error::Cycle(format!("source reader task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::config::RemoteConfig;
    use crate::store::{MemoryStore, Table};

    use super::*;

    fn fixture(dir: &TempDir) -> SyncConfig {
        let sessions_dir = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions_dir).unwrap();

        let recent = Utc::now().timestamp_millis() - 60_000;
        let line = json!({"type": "message", "timestamp": recent, "content": "Reviewing PR #42"});
        std::fs::write(
            sessions_dir.join("reviewer.jsonl"),
            format!("{}\n{}\n", json!({"timestamp": 1}), line),
        )
        .unwrap();

        let jobs_file = dir.path().join("jobs.json");
        std::fs::write(
            &jobs_file,
            json!({"jobs": [{"id": "nightly", "name": "Nightly", "enabled": true, "state": {"lastStatus": "error"}}]})
                .to_string(),
        )
        .unwrap();

        SyncConfig {
            sessions_dir,
            jobs_file,
            interval: Duration::from_secs(3600),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn cycle_derives_and_reconciles() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let daemon = SyncDaemon::with_store(fixture(&dir), store.clone());
        assert!(!daemon.is_degraded());

        let report = daemon.run_cycle().await.unwrap();
        assert_eq!(report.agents.attempted, 1);
        assert_eq!(report.jobs.attempted, 1);
        assert_eq!(report.failed(), 0);
        assert!(report.notified);

        let agents = store.rows(Table::AgentStatus).await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["agent_name"], "reviewer");
        assert_eq!(agents[0]["status"], "working");
        assert!(agents[0]["task_name"].as_str().unwrap().contains("Reviewing PR #42"));

        let jobs = store.rows(Table::CronJobs).await;
        assert_eq!(jobs[0]["job_id"], "nightly");
        assert_eq!(jobs[0]["status"], "failed");
        assert_eq!(jobs[0]["last_status"], "error");

        let activity = store.rows(Table::ActivityLog).await;
        assert_eq!(activity[0]["description"], "Synced 1 agents and 1 cron jobs (0 failed)");
    }

    #[tokio::test]
    async fn repeated_cycles_do_not_duplicate_rows() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let daemon = SyncDaemon::with_store(fixture(&dir), store.clone());

        daemon.run_cycle().await.unwrap();
        daemon.run_cycle().await.unwrap();

        assert_eq!(store.rows(Table::AgentStatus).await.len(), 1);
        assert_eq!(store.rows(Table::CronJobs).await.len(), 1);
        assert_eq!(store.rows(Table::ActivityLog).await.len(), 2);
    }

    #[tokio::test]
    async fn record_failures_surface_in_report() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.fail_key("nightly").await;
        let daemon = SyncDaemon::with_store(fixture(&dir), store.clone());

        let report = daemon.run_cycle().await.unwrap();
        assert_eq!(report.jobs.failed, 1);
        assert_eq!(report.agents.failed, 0);

        let activity = store.rows(Table::ActivityLog).await;
        assert_eq!(activity[0]["description"], "Synced 1 agents and 1 cron jobs (1 failed)");
    }

    #[tokio::test]
    async fn missing_sources_yield_empty_cycle() {
        let config = SyncConfig {
            sessions_dir: Path::new("/no/such/sessions").to_path_buf(),
            jobs_file: Path::new("/no/such/jobs.json").to_path_buf(),
            ..SyncConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let report = SyncDaemon::with_store(config, store).run_cycle().await.unwrap();
        assert_eq!(report.agents.attempted + report.jobs.attempted, 0);
    }

    #[tokio::test]
    async fn degraded_mode_still_runs_cycles() {
        let dir = TempDir::new().unwrap();
        let config = fixture(&dir);
        assert!(config.remote.is_none());

        let daemon = SyncDaemon::new(config);
        assert!(daemon.is_degraded());

        let report = daemon.run_cycle().await.unwrap();
        assert_eq!(report.agents.attempted, 1);
        assert_eq!(report.jobs.attempted, 1);
        assert_eq!(report.failed(), 0);
        assert!(!report.notified);
    }

    #[tokio::test]
    async fn unusable_credentials_fall_back_to_local_mode() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig {
            remote: Some(RemoteConfig::new("https://example.supabase.co", "bad\nkey").unwrap()),
            ..fixture(&dir)
        };

        let daemon = SyncDaemon::new(config);
        assert!(daemon.is_degraded());

        let report = daemon.run_cycle().await.unwrap();
        assert_eq!(report.agents.attempted, 1);
        assert_eq!(report.jobs.attempted, 1);
        assert!(!report.notified);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_cycle_skips_remaining_batches() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.set_delay(Duration::from_secs(1)).await;
        let mut daemon = SyncDaemon::with_store(fixture(&dir), store.clone());
        let shutdown = CancellationToken::new();

        let canceller = async {
            // the agent upsert is now in flight
            while store.call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.cancel();
        };
        tokio::join!(daemon.run(shutdown.clone()), canceller);

        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert_eq!(daemon.cycles(), 1);
        assert_eq!(store.rows(Table::AgentStatus).await.len(), 1);
        assert!(store.rows(Table::CronJobs).await.is_empty());
        assert!(store.rows(Table::ActivityLog).await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_after_current_cycle() {
        let dir = TempDir::new().unwrap();
        let mut daemon = SyncDaemon::local(fixture(&dir));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        daemon.run(shutdown).await;
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert_eq!(daemon.cycles(), 1);
    }

    #[tokio::test]
    async fn cancel_during_sleep_stops_promptly() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut daemon = SyncDaemon::with_store(fixture(&dir), store.clone());
        let shutdown = CancellationToken::new();

        let canceller = async {
            // wait for the first cycle's summary row
            while store.rows(Table::ActivityLog).await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.cancel();
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(daemon.run(shutdown.clone()), canceller)
        })
        .await
        .unwrap();

        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert_eq!(daemon.cycles(), 1);
    }
}
