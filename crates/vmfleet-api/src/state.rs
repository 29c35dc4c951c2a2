//! Application state.

use std::sync::Arc;
use vmfleet_scheduler::Coordinator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Secret GitHub signs webhook deliveries with.
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, webhook_secret: impl Into<Arc<str>>) -> Self {
        Self {
            coordinator,
            webhook_secret: webhook_secret.into(),
        }
    }
}
