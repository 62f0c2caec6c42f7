//! Periodic store maintenance.
//!
//! Each pass purges expired geolocation rows and rewrites the cached
//! per-network device counts. Store calls are blocking, so passes run on the
//! blocking thread pool.

use std::future::Future;

use chrono::{DateTime, Utc};
use netvault_store::prelude::*;
use netvault_store::StoreError;
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// What a single maintenance pass changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub purged_geo_rows: usize,
    pub networks_recounted: usize,
}

/// Run one maintenance pass at `now`.
pub fn run_pass(store: &AssetStore, now: DateTime<Utc>) -> Result<MaintenanceReport, StoreError> {
    let purged_geo_rows = store.purge_expired_locations(now)?;
    let networks_recounted = store.recompute_device_counts()?;
    Ok(MaintenanceReport {
        purged_geo_rows,
        networks_recounted,
    })
}

pub struct Maintainer {
    store: AssetStore,
    every: Duration,
}

impl Maintainer {
    pub fn new(store: AssetStore, every: Duration) -> Self {
        Self { store, every }
    }

    /// Run passes every interval until `shutdown` resolves. The first pass
    /// runs immediately. A failed pass is logged and retried on the next tick.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> u64 {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.every.as_secs(), "Maintenance loop started");
        let mut passes = 0u64;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let store = self.store.clone();
                    match tokio::task::spawn_blocking(move || run_pass(&store, Utc::now())).await {
                        Ok(Ok(report)) => {
                            passes += 1;
                            tracing::info!(
                                purged_geo_rows = report.purged_geo_rows,
                                networks_recounted = report.networks_recounted,
                                "Maintenance pass complete"
                            );
                        }
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, transient = e.is_transient(), "Maintenance pass failed");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Maintenance task panicked");
                        }
                    }
                }
            }
        }

        tracing::info!(passes, "Maintenance loop stopped");
        passes
    }
}
