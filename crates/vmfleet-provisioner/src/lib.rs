//! VM provisioning backends for vmfleet.
//!
//! Provides provisioner implementations for runner VMs:
//! - Orka (production)

pub mod orka;

pub use orka::OrkaProvisioner;
pub use vmfleet_core::provisioner::{Deletion, Provisioner, VmSpec};
