//! Fleet workers: one drains the start queue, the other the stop queue.
//!
//! Both loop until shutdown. A job whose VM call fails goes back on the
//! end of its queue and the worker sleeps its backoff before taking the
//! next job. Shutdown is observed while waiting for a job, while waiting
//! for capacity, and during the backoff; never in the middle of a VM call.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vmfleet_config::{FleetConfig, ImageConfig};
use vmfleet_core::{Deletion, Error, JobState, Result, RunnerName, VmId, VmSpec};

use crate::coordinator::{Coordinator, uninterruptible};
use crate::queue::JobQueue;

/// Result of handling one start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Provisioned(VmId),
    /// The job is gone, finished, or already has a VM.
    Skipped,
}

/// Result of handling one stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Released(Deletion),
    /// The job is gone or holds no VM.
    Skipped,
}

/// Takes jobs off the start queue and deploys a VM for each.
pub struct StartWorker {
    coordinator: Arc<Coordinator>,
    images: ImageConfig,
    backoff: Duration,
    provision_timeout: Duration,
}

impl StartWorker {
    pub fn new(coordinator: Arc<Coordinator>, fleet: &FleetConfig, images: ImageConfig) -> Self {
        Self {
            coordinator,
            images,
            backoff: fleet.start_backoff,
            provision_timeout: fleet.provision_timeout,
        }
    }

    /// Run the worker loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            capacity = self.coordinator.capacity(),
            "Starting start worker"
        );
        let queue = self.coordinator.start_queue();

        while let Some(runner) = next_job(queue, &shutdown).await {
            match self.process(&runner, &shutdown).await {
                Ok(_) => {}
                Err(Error::Cancelled) => {
                    queue.push(runner);
                    break;
                }
                Err(e) => {
                    error!(runner = %runner, error = %e, "Failed to start VM, requeueing");
                    queue.push(runner);
                    if !backoff(self.backoff, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Start worker stopped");
    }

    /// Deploy a VM for `runner` once the fleet has room.
    pub async fn process(
        &self,
        runner: &RunnerName,
        shutdown: &CancellationToken,
    ) -> Result<StartOutcome> {
        let Some(job) = self.coordinator.job(runner.as_str()) else {
            debug!(runner = %runner, "Job no longer tracked, not starting VM");
            return Ok(StartOutcome::Skipped);
        };
        if job.state() == JobState::Completed {
            debug!(runner = %runner, "Job already completed, not starting VM");
            return Ok(StartOutcome::Skipped);
        }
        if job.holds_vm() {
            debug!(runner = %runner, "Job already has a VM");
            return Ok(StartOutcome::Skipped);
        }

        let label = runner.runner_label();
        let image = self.images.image_for(label).ok_or_else(|| {
            Error::InvalidInput(format!("No VM image configured for runner label {}", label))
        })?;
        let spec = VmSpec::for_job(&job, image);

        let fleet = self
            .coordinator
            .acquire_slot(shutdown)
            .await
            .ok_or(Error::Cancelled)?;

        info!(runner = %runner, image, attempt = job.start_attempts + 1, "Starting VM");
        let section = self
            .coordinator
            .clone()
            .provision(fleet, spec, self.provision_timeout);

        match uninterruptible(section).await? {
            Some(vm_id) => {
                info!(runner = %runner, vm_id = %vm_id, "VM started");
                Ok(StartOutcome::Provisioned(vm_id))
            }
            None => Ok(StartOutcome::Skipped),
        }
    }
}

/// Takes jobs off the stop queue and deletes their VMs.
pub struct StopWorker {
    coordinator: Arc<Coordinator>,
    backoff: Duration,
}

impl StopWorker {
    pub fn new(coordinator: Arc<Coordinator>, fleet: &FleetConfig) -> Self {
        Self {
            coordinator,
            backoff: fleet.stop_backoff,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting stop worker");
        let queue = self.coordinator.stop_queue();

        while let Some(runner) = next_job(queue, &shutdown).await {
            match self.process(&runner, &shutdown).await {
                Ok(_) => {}
                Err(Error::Cancelled) => {
                    queue.push(runner);
                    break;
                }
                Err(e) => {
                    error!(runner = %runner, error = %e, "Failed to delete VM, requeueing");
                    queue.push(runner);
                    if !backoff(self.backoff, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Stop worker stopped");
    }

    /// Delete the VM held by `runner` and free its capacity slot.
    pub async fn process(
        &self,
        runner: &RunnerName,
        shutdown: &CancellationToken,
    ) -> Result<StopOutcome> {
        let holds_vm = self
            .coordinator
            .job(runner.as_str())
            .is_some_and(|job| job.holds_vm());
        if !holds_vm {
            debug!(runner = %runner, "No VM to delete");
            return Ok(StopOutcome::Skipped);
        }

        let fleet = self
            .coordinator
            .lock_fleet(shutdown)
            .await
            .ok_or(Error::Cancelled)?;
        let section = self.coordinator.clone().release(fleet, runner.clone());

        Ok(match uninterruptible(section).await? {
            Some(deletion) => StopOutcome::Released(deletion),
            None => StopOutcome::Skipped,
        })
    }
}

async fn next_job(queue: &JobQueue, shutdown: &CancellationToken) -> Option<RunnerName> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        runner = queue.pop() => runner,
    }
}

/// Sleep for `delay`. Returns false if `shutdown` fired first.
async fn backoff(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
