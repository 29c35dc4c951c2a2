//! Process-wide job directory and fleet gate.
//!
//! The [`Coordinator`] is built once at startup and shared (`Arc`) between
//! the webhook handler and the two fleet workers. It owns:
//! - the job directory and the expired-job markers
//! - the fleet mutex, which wraps the provisioner so no call can reach the
//!   backend without holding it
//! - the capacity condition, signalled whenever a VM is released
//! - the start and stop queues

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vmfleet_core::{
    Deletion, Error, ExpiredJob, Job, JobRecord, JobState, Provisioner, Result, RunnerName, VmId,
    VmSpec,
};

use crate::queue::JobQueue;

#[derive(Default)]
struct Directory {
    jobs: HashMap<RunnerName, Job>,
    expired: HashMap<RunnerName, ExpiredJob>,
}

/// Exclusive handle on the provisioning backend.
pub(crate) struct Fleet {
    provisioner: Arc<dyn Provisioner>,
}

/// What happened to a label from a `queued` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New job tracked and pushed onto the start queue.
    Queued,
    /// A job with this name is already tracked.
    AlreadyTracked,
    /// The name is marked expired; the job already ran or was superseded.
    Expired,
}

/// What happened to a job named by an `in_progress` or `completed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Completed and handed to the stop worker.
    StopQueued,
    /// Out-of-order or duplicate event, state left alone.
    Ignored,
    /// Unknown job; an expired marker was recorded.
    Expired,
    /// Unknown job that was already marked expired.
    AlreadyExpired,
}

/// Counts from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub markers_removed: usize,
    pub jobs_evicted: usize,
}

/// Point-in-time view of the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub capacity: usize,
    pub live_vms: usize,
    pub start_queue: usize,
    pub stop_queue: usize,
    pub jobs: Vec<JobRecord>,
    pub expired: Vec<ExpiredJob>,
}

pub struct Coordinator {
    directory: Mutex<Directory>,
    fleet: Arc<AsyncMutex<Fleet>>,
    capacity_freed: Notify,
    /// Jobs holding a VM. Only changed while the fleet mutex is held.
    live_vms: AtomicUsize,
    capacity: usize,
    start_queue: JobQueue,
    stop_queue: JobQueue,
}

impl Coordinator {
    /// Create a coordinator allowing at most `capacity` live VMs.
    pub fn new(provisioner: Arc<dyn Provisioner>, capacity: usize) -> Self {
        Self {
            directory: Mutex::new(Directory::default()),
            fleet: Arc::new(AsyncMutex::new(Fleet { provisioner })),
            capacity_freed: Notify::new(),
            live_vms: AtomicUsize::new(0),
            capacity: capacity.max(1),
            start_queue: JobQueue::new("start"),
            stop_queue: JobQueue::new("stop"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_vms(&self) -> usize {
        self.live_vms.load(Ordering::SeqCst)
    }

    pub fn start_queue(&self) -> &JobQueue {
        &self.start_queue
    }

    pub fn stop_queue(&self) -> &JobQueue {
        &self.stop_queue
    }

    fn directory(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one job.
    pub fn job(&self, runner: &str) -> Option<Job> {
        self.directory().jobs.get(runner).cloned()
    }

    /// Snapshot of every tracked job, ordered by runner name.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.directory().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.runner_name().cmp(b.runner_name()));
        jobs
    }

    pub fn expired_jobs(&self) -> Vec<ExpiredJob> {
        let mut expired: Vec<ExpiredJob> = self.directory().expired.values().cloned().collect();
        expired.sort_by(|a, b| a.runner_name.cmp(&b.runner_name));
        expired
    }

    pub fn is_expired(&self, runner: &str) -> bool {
        self.directory().expired.contains_key(runner)
    }

    pub fn status(&self) -> FleetStatus {
        FleetStatus {
            capacity: self.capacity,
            live_vms: self.live_vms(),
            start_queue: self.start_queue.len(),
            stop_queue: self.stop_queue.len(),
            jobs: self.jobs().iter().map(JobRecord::from).collect(),
            expired: self.expired_jobs(),
        }
    }

    /// Track a newly queued job and hand it to the start worker.
    pub fn admit(&self, runner: RunnerName, repository: &str) -> Admission {
        {
            let mut dir = self.directory();
            if dir.expired.contains_key(&runner) {
                return Admission::Expired;
            }
            if dir.jobs.contains_key(&runner) {
                return Admission::AlreadyTracked;
            }
            dir.jobs
                .insert(runner.clone(), Job::new(runner.clone(), repository));
        }

        self.start_queue.push(runner);
        Admission::Queued
    }

    /// Record that `runner` was referenced without being tracked.
    ///
    /// Returns false if it was already marked.
    pub fn record_expired(&self, runner: &RunnerName, now: DateTime<Utc>) -> bool {
        Self::expire_in(&mut self.directory(), runner, now)
    }

    fn expire_in(dir: &mut Directory, runner: &RunnerName, now: DateTime<Utc>) -> bool {
        if dir.expired.contains_key(runner) {
            return false;
        }
        dir.expired
            .insert(runner.clone(), ExpiredJob::new(runner.clone(), now));
        true
    }

    fn untracked(dir: &mut Directory, runner: &RunnerName, now: DateTime<Utc>) -> Transition {
        if Self::expire_in(dir, runner, now) {
            Transition::Expired
        } else {
            Transition::AlreadyExpired
        }
    }

    pub fn mark_in_progress(&self, runner: &RunnerName, now: DateTime<Utc>) -> Transition {
        let mut dir = self.directory();
        match dir.jobs.get_mut(runner) {
            Some(job) => {
                if job.mark_in_progress() {
                    Transition::Applied
                } else {
                    Transition::Ignored
                }
            }
            None => Self::untracked(&mut dir, runner, now),
        }
    }

    /// Complete a job, queueing its VM for deletion if it holds one.
    pub fn mark_completed(&self, runner: &RunnerName, now: DateTime<Utc>) -> Transition {
        let holds_vm = {
            let mut dir = self.directory();
            match dir.jobs.get_mut(runner) {
                Some(job) => {
                    job.mark_completed(now);
                    job.holds_vm()
                }
                None => return Self::untracked(&mut dir, runner, now),
            }
        };

        if holds_vm {
            self.stop_queue.push(runner.clone());
            Transition::StopQueued
        } else {
            Transition::Applied
        }
    }

    /// Forget expired markers and finished jobs older than `retention`.
    ///
    /// Evicted jobs leave an expired marker behind so a late duplicate
    /// `queued` delivery still cannot bring them back.
    pub async fn prune(&self, now: DateTime<Utc>, retention: Duration) -> PruneStats {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return PruneStats::default();
        };

        // No provisioning section may be in flight while jobs disappear.
        let _fleet = self.fleet.lock().await;
        let mut dir = self.directory();
        let mut stats = PruneStats::default();

        let before = dir.expired.len();
        dir.expired.retain(|_, marker| marker.expired_at > cutoff);
        stats.markers_removed = before - dir.expired.len();

        let finished: Vec<RunnerName> = dir
            .jobs
            .values()
            .filter(|job| {
                job.state() == JobState::Completed
                    && !job.holds_vm()
                    && job.completed_at().is_some_and(|at| at <= cutoff)
            })
            .map(|job| job.runner_name().clone())
            .collect();

        for runner in finished {
            dir.jobs.remove(&runner);
            Self::expire_in(&mut dir, &runner, now);
            stats.jobs_evicted += 1;
        }

        stats
    }

    /// Lock the fleet, giving up if `shutdown` fires first.
    pub(crate) async fn lock_fleet(
        &self,
        shutdown: &CancellationToken,
    ) -> Option<OwnedMutexGuard<Fleet>> {
        tokio::select! {
            _ = shutdown.cancelled() => None,
            fleet = self.fleet.clone().lock_owned() => Some(fleet),
        }
    }

    /// Lock the fleet once it has a free slot.
    ///
    /// While the fleet is full the lock is released and the caller sleeps
    /// on the capacity condition. Returns `None` on shutdown.
    pub(crate) async fn acquire_slot(
        &self,
        shutdown: &CancellationToken,
    ) -> Option<OwnedMutexGuard<Fleet>> {
        loop {
            let fleet = self.lock_fleet(shutdown).await?;
            let live_vms = self.live_vms();
            if live_vms < self.capacity {
                return Some(fleet);
            }

            let freed = self.capacity_freed.notified();
            tokio::pin!(freed);
            // Releases signal while holding the fleet lock, so registering
            // before unlocking cannot miss a wake-up.
            freed.as_mut().enable();
            drop(fleet);

            debug!(
                live_vms,
                capacity = self.capacity,
                "Fleet at capacity, waiting for a VM to be released"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = &mut freed => {}
            }
        }
    }

    /// Deploy a VM for `spec`. Must run inside [`uninterruptible`].
    ///
    /// Returns `None` if the job no longer wants a VM.
    pub(crate) async fn provision(
        self: Arc<Self>,
        fleet: OwnedMutexGuard<Fleet>,
        spec: VmSpec,
        timeout: Duration,
    ) -> Result<Option<VmId>> {
        let runner = spec.runner_name.clone();

        {
            let mut dir = self.directory();
            match dir.jobs.get_mut(&runner) {
                Some(job) if job.state() != JobState::Completed && !job.holds_vm() => {
                    job.start_attempts += 1;
                }
                _ => return Ok(None),
            }
        }

        let vm_id = match tokio::time::timeout(timeout, fleet.provisioner.create(&spec)).await {
            Ok(created) => created?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "VM deploy for {} took longer than {}s",
                    runner,
                    timeout.as_secs()
                )));
            }
        };

        // Completion and adoption both happen under the directory lock, so
        // exactly one side queues the stop.
        let adopted = {
            let mut dir = self.directory();
            dir.jobs.get_mut(&runner).map(|job| {
                job.vm_id = Some(vm_id.clone());
                job.vm_ready = true;
                job.state() == JobState::Completed
            })
        };

        match adopted {
            Some(completed) => {
                self.live_vms.fetch_add(1, Ordering::SeqCst);
                if completed {
                    info!(runner = %runner, vm_id = %vm_id, "Job completed while its VM was deploying");
                    self.stop_queue.push(runner);
                }
                Ok(Some(vm_id))
            }
            None => {
                warn!(runner = %runner, vm_id = %vm_id, "Job vanished while its VM was deploying, deleting VM");
                fleet.provisioner.delete_all_instances(&vm_id).await?;
                Ok(None)
            }
        }
    }

    fn vm_of(&self, runner: &RunnerName) -> Option<VmId> {
        self.directory()
            .jobs
            .get(runner)
            .and_then(|job| job.vm_id.clone())
    }

    /// Delete the VM held by `runner`. Must run inside [`uninterruptible`].
    ///
    /// A VM the backend no longer knows counts as released. Returns `None`
    /// if the job holds no VM, in which case capacity is not signalled.
    pub(crate) async fn release(
        self: Arc<Self>,
        fleet: OwnedMutexGuard<Fleet>,
        runner: RunnerName,
    ) -> Result<Option<Deletion>> {
        let Some(vm_id) = self.vm_of(&runner) else {
            return Ok(None);
        };

        info!(runner = %runner, vm_id = %vm_id, "Deleting VM");
        let deletion = fleet.provisioner.delete_all_instances(&vm_id).await?;
        if deletion == Deletion::NotFound {
            info!(runner = %runner, vm_id = %vm_id, "VM already deleted");
        }

        {
            let mut dir = self.directory();
            if let Some(job) = dir.jobs.get_mut(&runner) {
                job.vm_id = None;
                job.vm_ready = false;
            }
        }
        let _ = self
            .live_vms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        self.capacity_freed.notify_waiters();
        drop(fleet);

        info!(runner = %runner, vm_id = %vm_id, "VM deleted");
        Ok(Some(deletion))
    }
}

/// Run a VM-mutation section to completion.
///
/// The section is moved onto its own task, so cancelling or dropping the
/// caller cannot stop it halfway between the backend call and the job and
/// capacity bookkeeping that must follow it.
pub(crate) async fn uninterruptible<T, F>(section: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(section)
        .await
        .map_err(|e| Error::Internal(format!("VM section did not finish: {}", e)))?
}
