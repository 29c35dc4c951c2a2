//! Workflow-job events and how they move jobs through the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};
use vmfleet_core::RunnerName;

use crate::coordinator::{Admission, Coordinator, Transition};

/// The `action` of a `workflow_job` delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowAction {
    Queued,
    InProgress,
    Completed,
    /// Anything else GitHub sends (`waiting`, ...). Accepted and ignored.
    Other(String),
}

impl WorkflowAction {
    pub fn from_action(action: &str) -> Self {
        match action {
            "queued" => WorkflowAction::Queued,
            "in_progress" => WorkflowAction::InProgress,
            "completed" => WorkflowAction::Completed,
            other => WorkflowAction::Other(other.to_string()),
        }
    }
}

/// The parts of a `workflow_job` webhook payload the fleet cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowJobEvent {
    pub action: WorkflowAction,
    /// Runner GitHub assigned the job to, once it has one.
    pub runner_name: Option<String>,
    pub labels: Vec<String>,
    /// Repository name (without owner).
    pub repository: String,
}

impl WorkflowJobEvent {
    /// Parse from a GitHub `workflow_job` webhook payload.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let action = WorkflowAction::from_action(payload.get("action")?.as_str()?);
        let workflow_job = payload.get("workflow_job")?;

        let runner_name = workflow_job
            .get("runner_name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .map(String::from);

        let labels = workflow_job
            .get("labels")
            .and_then(|l| l.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let repository = payload
            .get("repository")
            .and_then(|r| r.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        Some(Self {
            action,
            runner_name,
            labels,
            repository,
        })
    }

    /// Labels that name a runner.
    pub fn runner_labels(&self) -> Vec<RunnerName> {
        self.labels
            .iter()
            .filter_map(|label| parse_runner(label))
            .collect()
    }

    /// Runners this event reports on: the assigned runner if there is one,
    /// otherwise every label that names a runner.
    pub fn runner_names(&self) -> Vec<RunnerName> {
        match &self.runner_name {
            Some(name) => parse_runner(name).into_iter().collect(),
            None => self.runner_labels(),
        }
    }
}

fn parse_runner(s: &str) -> Option<RunnerName> {
    match RunnerName::parse(s) {
        Ok(name) => Some(name),
        Err(e) => {
            trace!(error = %e, "Skipping non-runner label");
            None
        }
    }
}

/// What one event did to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub queued: usize,
    pub updated: usize,
    pub stop_queued: usize,
    pub expired: usize,
    pub skipped: usize,
}

/// Apply a workflow-job event to the coordinator.
pub fn apply_event(
    coordinator: &Coordinator,
    event: &WorkflowJobEvent,
    now: DateTime<Utc>,
) -> EventOutcome {
    let mut outcome = EventOutcome::default();

    match &event.action {
        WorkflowAction::Queued => {
            for runner in event.runner_labels() {
                match coordinator.admit(runner.clone(), &event.repository) {
                    Admission::Queued => {
                        info!(runner = %runner, repository = %event.repository, "Job queued");
                        outcome.queued += 1;
                    }
                    Admission::AlreadyTracked => {
                        debug!(runner = %runner, "Job already tracked, ignoring duplicate");
                        outcome.skipped += 1;
                    }
                    Admission::Expired => {
                        debug!(runner = %runner, "Job already expired, not queueing");
                        outcome.skipped += 1;
                    }
                }
            }
        }
        WorkflowAction::InProgress => {
            for runner in event.runner_names() {
                let transition = coordinator.mark_in_progress(&runner, now);
                outcome.record(&runner, transition, "in_progress");
            }
        }
        WorkflowAction::Completed => {
            for runner in event.runner_names() {
                let transition = coordinator.mark_completed(&runner, now);
                outcome.record(&runner, transition, "completed");
            }
        }
        WorkflowAction::Other(action) => {
            debug!(action = %action, "Ignoring workflow_job action");
        }
    }

    outcome
}

impl EventOutcome {
    fn record(&mut self, runner: &RunnerName, transition: Transition, action: &str) {
        match transition {
            Transition::Applied => {
                info!(runner = %runner, action, "Job updated");
                self.updated += 1;
            }
            Transition::StopQueued => {
                info!(runner = %runner, action, "Job updated, VM queued for deletion");
                self.updated += 1;
                self.stop_queued += 1;
            }
            Transition::Ignored => {
                debug!(runner = %runner, action, "Stale event, job left as is");
                self.skipped += 1;
            }
            Transition::Expired => {
                info!(runner = %runner, action, "Event for untracked job, marking expired");
                self.expired += 1;
            }
            Transition::AlreadyExpired => {
                debug!(runner = %runner, action, "Event for expired job");
                self.skipped += 1;
            }
        }
    }
}
