//! Deadline scanning and retention pruning
//!
//! Every tick the reaper reads deadline-indexed order sets and feeds the
//! matching events to the lifecycle controller. It holds no per-order
//! exclusivity itself, so it is safe to restart at any point. A separate
//! daily job prunes terminal orders past the retention horizon.

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorResult;
use crate::lifecycle::LifecycleController;
use crate::metrics;
use crate::store::OrderStore;

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info};

/// A settlement supervisor has this long after the fund move before the
/// reaper treats the reveal as overdue and re-drives it.
const REVEAL_BACKSTOP_SECS: i64 = 120;

const PRUNE_INTERVAL_SECS: u64 = 86_400;

pub struct Reaper {
    controller: Arc<LifecycleController>,
    store: Arc<dyn OrderStore>,
    config: CoordinatorConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl Reaper {
    pub fn new(
        controller: Arc<LifecycleController>,
        store: Arc<dyn OrderStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            controller,
            store,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main reaper loop
    pub async fn run(&self) -> CoordinatorResult<()> {
        let mut scan_interval =
            interval(std::time::Duration::from_secs(self.config.reaper_interval_secs));
        let mut prune_interval = interval(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS));

        info!("Reaper started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = scan_interval.tick() => {
                    if let Err(e) = self.scan().await {
                        error!("Reaper scan error: {e}");
                    }
                }

                _ = prune_interval.tick() => {
                    match self.store.prune(self.config.retention_days).await {
                        Ok(pruned) => debug!("Retention prune removed {pruned} orders"),
                        Err(e) => error!("Retention prune failed: {e}"),
                    }
                }
            }
        }

        info!("Reaper stopped");
        Ok(())
    }

    /// One deadline sweep across all four order sets.
    pub async fn scan(&self) -> CoordinatorResult<()> {
        let now = Utc::now();

        for order in self.store.expired(now).await? {
            if let Err(e) = self.controller.handle_order_expired(order.id).await {
                error!(order_id = ?order.id, "expiry event failed: {e}");
            }
        }

        for order in self.store.expired_commitments(now).await? {
            if let Err(e) = self.controller.handle_commitment_lapsed(order.id).await {
                error!(order_id = ?order.id, "commitment lapse event failed: {e}");
            }
        }

        let reveal_cutoff = now - Duration::seconds(REVEAL_BACKSTOP_SECS);
        for order in self.store.pending_reveal(reveal_cutoff).await? {
            if let Err(e) = self.controller.handle_reveal_due(order.id).await {
                error!(order_id = ?order.id, "reveal-due event failed: {e}");
            }
        }

        for order in self.store.competition_timed_out(now).await? {
            if let Err(e) = self.controller.handle_competition_timeout(order.id).await {
                error!(order_id = ?order.id, "competition timeout event failed: {e}");
            }
        }

        if let Ok(stats) = self.store.stats().await {
            metrics::record_order_gauges(&stats);
        }

        Ok(())
    }

    /// Stop the reaper loop
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
