//! Webhook server for vmfleet.
//!
//! Receives GitHub `workflow_job` deliveries, verifies their signature and
//! feeds them to the scheduler. Also serves health checks and, when
//! enabled, a JSON snapshot of the fleet.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
