//! The job model.
//!
//! A [`Job`] is one runner-backed workflow job together with the VM that
//! backs it. The lifecycle state follows GitHub's events; the VM fields are
//! owned by the fleet workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunnerName, RunnerNameError, VmId};

/// Lifecycle state of a workflow job as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    InProgress,
    Completed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::InProgress => write!(f, "in_progress"),
            JobState::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "in_progress" => Ok(JobState::InProgress),
            "completed" => Ok(JobState::Completed),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

/// A runner-backed CI job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    runner_name: RunnerName,
    repository: String,
    state: JobState,
    completed_at: Option<DateTime<Utc>>,
    /// VM currently backing this job, if any.
    pub vm_id: Option<VmId>,
    /// Whether the VM finished setting up.
    pub vm_ready: bool,
    /// Provisioning attempts made so far, successful or not.
    pub start_attempts: u32,
}

impl Job {
    /// A freshly queued job with no VM.
    pub fn new(runner_name: RunnerName, repository: impl Into<String>) -> Self {
        Self {
            runner_name,
            repository: repository.into(),
            state: JobState::Queued,
            completed_at: None,
            vm_id: None,
            vm_ready: false,
            start_attempts: 0,
        }
    }

    pub fn runner_name(&self) -> &RunnerName {
        &self.runner_name
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Whether this job currently holds a slot of fleet capacity.
    pub fn holds_vm(&self) -> bool {
        self.vm_id.is_some()
    }

    /// Move to `InProgress` unless the job already completed.
    ///
    /// Returns whether the state changed. GitHub can deliver `in_progress`
    /// after `completed`, so a late event must not revive a finished job.
    pub fn mark_in_progress(&mut self) -> bool {
        if self.state == JobState::Completed {
            return false;
        }
        let changed = self.state != JobState::InProgress;
        self.state = JobState::InProgress;
        changed
    }

    /// Move to `Completed`, stamping the completion time on the first call.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        if self.state != JobState::Completed {
            self.completed_at = Some(at);
        }
        self.state = JobState::Completed;
    }
}

/// Marker for a runner name seen in an event without a tracked job.
///
/// Recorded when GitHub reports progress for a job we never saw queued (or
/// already forgot). Its presence stops a later duplicate `queued` delivery
/// from provisioning a VM for a job that has already run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredJob {
    pub runner_name: RunnerName,
    pub expired_at: DateTime<Utc>,
}

impl ExpiredJob {
    pub fn new(runner_name: RunnerName, expired_at: DateTime<Utc>) -> Self {
        Self {
            runner_name,
            expired_at,
        }
    }
}

/// Plain field mapping of a [`Job`], for snapshots and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub runner_name: String,
    pub repository: String,
    pub state: JobState,
    pub vm_id: Option<String>,
    pub vm_ready: bool,
    pub start_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            runner_name: job.runner_name.to_string(),
            repository: job.repository.clone(),
            state: job.state,
            vm_id: job.vm_id.as_ref().map(|id| id.to_string()),
            vm_ready: job.vm_ready,
            start_attempts: job.start_attempts,
            completed_at: job.completed_at,
        }
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = RunnerNameError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            runner_name: RunnerName::parse(record.runner_name)?,
            repository: record.repository,
            state: record.state,
            completed_at: record.completed_at,
            vm_id: record.vm_id.map(VmId::from),
            vm_ready: record.vm_ready,
            start_attempts: record.start_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> Job {
        Job::new(RunnerName::parse(name).unwrap(), "brew")
    }

    #[test]
    fn test_new_job_is_queued_without_vm() {
        let job = job("14-100-1");
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.vm_id, None);
        assert!(!job.vm_ready);
        assert_eq!(job.start_attempts, 0);
        assert!(!job.holds_vm());
        assert_eq!(job.repository(), "brew");
    }

    #[test]
    fn test_in_progress_after_queued() {
        let mut job = job("14-100-1");
        assert!(job.mark_in_progress());
        assert_eq!(job.state(), JobState::InProgress);
        // Duplicate delivery is a no-op
        assert!(!job.mark_in_progress());
    }

    #[test]
    fn test_in_progress_does_not_revive_completed_job() {
        let mut job = job("14-100-1");
        job.mark_completed(Utc::now());
        assert!(!job.mark_in_progress());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn test_completed_keeps_first_timestamp() {
        let mut job = job("14-100-1");
        let first = Utc::now();
        job.mark_completed(first);
        job.mark_completed(first + chrono::Duration::seconds(30));
        assert_eq!(job.completed_at(), Some(first));
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_record_encoding() {
        let mut job = job("14-arm64-100-2");
        job.vm_id = Some(VmId::new("vm-abc"));
        job.start_attempts = 3;

        let record = JobRecord::from(&job);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["runner_name"], "14-arm64-100-2");
        assert_eq!(json["state"], "queued");
        assert_eq!(json["vm_id"], "vm-abc");
        assert_eq!(json["start_attempts"], 3);
        assert!(json.get("completed_at").is_none());

        let decoded = Job::try_from(record).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_record_decoding_rejects_bad_runner_name() {
        let record = JobRecord {
            runner_name: "ubuntu-latest".to_string(),
            repository: "brew".to_string(),
            state: JobState::Queued,
            vm_id: None,
            vm_ready: false,
            start_attempts: 0,
            completed_at: None,
        };
        assert!(Job::try_from(record).is_err());
    }

    #[test]
    fn test_job_state_strings() {
        for state in [JobState::Queued, JobState::InProgress, JobState::Completed] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("waiting".parse::<JobState>().is_err());
    }
}
