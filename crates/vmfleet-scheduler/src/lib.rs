//! Job tracking and VM fleet scheduling for vmfleet.
//!
//! Workflow-job events are applied to a shared [`Coordinator`], which hands
//! jobs to a [`StartWorker`] and a [`StopWorker`] through FIFO queues. The
//! workers serialize every provisioning call behind one fleet mutex and keep
//! the number of live VMs under the configured capacity.

pub mod coordinator;
pub mod events;
pub mod janitor;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testing;

pub use coordinator::{Admission, Coordinator, FleetStatus, PruneStats, Transition};
pub use events::{EventOutcome, WorkflowAction, WorkflowJobEvent, apply_event};
pub use janitor::{JanitorConfig, spawn_janitor};
pub use queue::JobQueue;
pub use worker::{StartOutcome, StartWorker, StopOutcome, StopWorker};
