//! Background retention for finished jobs and expired markers.
//!
//! Without it the directory and the expired set grow for as long as the
//! process runs. On every tick the janitor drops expired markers older than
//! the retention and evicts completed jobs that no longer hold a VM.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vmfleet_config::FleetConfig;

use crate::coordinator::Coordinator;

/// Retention settings for the janitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JanitorConfig {
    pub retention: Duration,
    pub interval: Duration,
}

impl From<&FleetConfig> for JanitorConfig {
    fn from(fleet: &FleetConfig) -> Self {
        Self {
            retention: fleet.expired_retention,
            interval: fleet.prune_interval,
        }
    }
}

/// Spawn the janitor loop. It stops when `shutdown` fires.
pub fn spawn_janitor(
    coordinator: Arc<Coordinator>,
    config: JanitorConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { run_janitor(coordinator, config, shutdown).await })
}

pub async fn run_janitor(
    coordinator: Arc<Coordinator>,
    config: JanitorConfig,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = config.interval.as_secs(),
        retention_secs = config.retention.as_secs(),
        "Starting janitor"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = coordinator.prune(Utc::now(), config.retention).await;
                if stats.markers_removed > 0 || stats.jobs_evicted > 0 {
                    info!(
                        markers_removed = stats.markers_removed,
                        jobs_evicted = stats.jobs_evicted,
                        "Pruned job directory"
                    );
                } else {
                    debug!("Nothing to prune");
                }
            }
        }
    }

    info!("Janitor stopped");
}
