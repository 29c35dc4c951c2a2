//! Core domain types and traits for vmfleet.
//!
//! This crate contains:
//! - Runner identifiers and their grammar
//! - The job model and its plain-record encoding
//! - The provisioner trait consumed by the fleet workers

pub mod error;
pub mod id;
pub mod job;
pub mod provisioner;
pub mod runner;

pub use error::{Error, Result};
pub use id::VmId;
pub use job::{ExpiredJob, Job, JobRecord, JobState};
pub use provisioner::{Deletion, Provisioner, VmSpec};
pub use runner::{RunnerName, RunnerNameError};
