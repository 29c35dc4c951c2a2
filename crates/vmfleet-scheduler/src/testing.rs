//! In-memory provisioner for scheduler tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use vmfleet_config::ImageConfig;
use vmfleet_core::{Deletion, Error, Provisioner, Result, RunnerName, VmId, VmSpec};

type Hook = Box<dyn Fn() + Send + Sync>;

pub(crate) fn runner(name: &str) -> RunnerName {
    RunnerName::parse(name).unwrap()
}

/// `14-arm64` has its own image; everything else uses the default.
pub(crate) fn images() -> ImageConfig {
    ImageConfig {
        default_image: Some("sonoma-runner".to_string()),
        images: [("14-arm64".to_string(), "sonoma-arm64".to_string())].into(),
    }
}

#[derive(Default)]
pub(crate) struct MockProvisioner {
    ids: Mutex<VecDeque<String>>,
    next_id: AtomicUsize,
    create_failures: AtomicUsize,
    delete_failures: AtomicUsize,
    create_delay: Duration,
    delete_delay: Duration,
    live: Mutex<HashSet<VmId>>,
    on_create: Mutex<Option<Hook>>,
    creates: Mutex<Vec<(RunnerName, Instant)>>,
    deletes: Mutex<Vec<(VmId, Instant)>>,
}

impl MockProvisioner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hand out these ids first, then `vm-1`, `vm-2`, ...
    pub(crate) fn with_ids(self, ids: &[&str]) -> Self {
        self.ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub(crate) fn failing_creates(self, n: usize) -> Self {
        self.create_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_deletes(self, n: usize) -> Self {
        self.delete_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub(crate) fn delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    /// Run `hook` inside every later create, after the delay.
    pub(crate) fn on_create(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_create.lock().unwrap() = Some(Box::new(hook));
    }

    /// Drop a VM behind the scheduler's back.
    pub(crate) fn forget(&self, vm_id: &VmId) {
        self.live.lock().unwrap().remove(vm_id);
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub(crate) fn create_count(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub(crate) fn create_times(&self) -> Vec<Instant> {
        self.creates.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub(crate) fn created_for(&self) -> Vec<RunnerName> {
        self.creates
            .lock()
            .unwrap()
            .iter()
            .map(|(runner, _)| runner.clone())
            .collect()
    }

    pub(crate) fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, spec: &VmSpec) -> Result<VmId> {
        self.creates
            .lock()
            .unwrap()
            .push((spec.runner_name.clone(), Instant::now()));

        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(hook) = self.on_create.lock().unwrap().as_ref() {
            hook();
        }
        if Self::take_failure(&self.create_failures) {
            return Err(Error::Provisioning("deploy rejected".to_string()));
        }

        let id = match self.ids.lock().unwrap().pop_front() {
            Some(id) => id,
            None => format!("vm-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let vm_id = VmId::new(id);
        self.live.lock().unwrap().insert(vm_id.clone());
        Ok(vm_id)
    }

    async fn delete_all_instances(&self, vm_id: &VmId) -> Result<Deletion> {
        self.deletes
            .lock()
            .unwrap()
            .push((vm_id.clone(), Instant::now()));

        if !self.delete_delay.is_zero() {
            tokio::time::sleep(self.delete_delay).await;
        }
        if Self::take_failure(&self.delete_failures) {
            return Err(Error::Provisioning("purge rejected".to_string()));
        }

        if self.live.lock().unwrap().remove(vm_id) {
            Ok(Deletion::Deleted)
        } else {
            Ok(Deletion::NotFound)
        }
    }
}
