//! Local sink used when no remote store is configured.

use tracing::info;

use crate::status::{AgentState, AgentStatus, CronStatus};
use crate::sync::reconciler::BatchReport;

/// Logs a status board instead of writing anywhere.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }

    pub fn publish_agents(&self, agents: &[AgentStatus]) -> BatchReport {
        info!(count = agents.len(), "Agents (local mode)");
        for agent in agents {
            info!(
                "  {} {}: {} - {}",
                agent_marker(agent.status),
                agent.agent_name,
                agent.status,
                agent.task_name
            );
        }
        BatchReport {
            attempted: agents.len(),
            failed: 0,
        }
    }

    pub fn publish_jobs(&self, jobs: &[CronStatus]) -> BatchReport {
        info!(count = jobs.len(), "Cron jobs (local mode)");
        for job in jobs {
            let schedule = if job.schedule_expr.is_empty() {
                "N/A"
            } else {
                job.schedule_expr.as_str()
            };
            info!(
                "  [{}] {}: {} (last: {})",
                job.status, job.name, schedule, job.last_status
            );
        }
        BatchReport {
            attempted: jobs.len(),
            failed: 0,
        }
    }
}

fn agent_marker(state: AgentState) -> &'static str {
    match state {
        AgentState::Working => "+",
        AgentState::Idle => "~",
        AgentState::Completed => "-",
    }
}
