//! Provisioner trait and VM request types.
//!
//! Provisioners create and destroy the VMs that back runners (Orka in
//! production, mocks in tests). Callers must serialize every call; the
//! backend is not assumed to tolerate concurrent requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Job, Result, RunnerName, VmId};

/// Specification for a VM to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Runner this VM will back.
    pub runner_name: RunnerName,
    /// Backend image/config to deploy from.
    pub image: String,
    /// Extra key/value metadata attached to the VM.
    pub metadata: BTreeMap<String, String>,
}

impl VmSpec {
    /// Build a spec for `job`, deploying from `image`.
    pub fn for_job(job: &Job, image: impl Into<String>) -> Self {
        let name = job.runner_name();
        let mut metadata = BTreeMap::new();
        metadata.insert("runner_name".to_string(), name.to_string());
        metadata.insert("repository".to_string(), job.repository().to_string());
        metadata.insert("run_id".to_string(), name.run_id().to_string());
        metadata.insert("run_attempt".to_string(), name.run_attempt().to_string());
        metadata.insert("arm64".to_string(), name.is_arm64().to_string());

        Self {
            runner_name: name.clone(),
            image: image.into(),
            metadata,
        }
    }
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// The backend removed the VM.
    Deleted,
    /// The backend had no such VM. Counts as released.
    NotFound,
}

/// Trait for VM provisioning backends.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Deploy a VM, returning its identifier.
    async fn create(&self, spec: &VmSpec) -> Result<VmId>;

    /// Delete every instance of a VM.
    async fn delete_all_instances(&self, vm_id: &VmId) -> Result<Deletion>;
}
