use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppError;
use crate::services::reconciler::{ReconcileStats, RegistryReconciler};

/// Periodic reconciliation of the local registry.
pub struct ReconcileScheduler {
    reconciler: Arc<RegistryReconciler>,
    interval: Duration,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Arc<RegistryReconciler>, interval: Duration) -> Self {
        Self { reconciler, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs forever; spawn it.
    pub async fn start(self) {
        info!("Starting registry reconcile scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            match self.run_once().await {
                Ok(stats) => {
                    if stats.failed > 0 {
                        warn!("Reconcile left {} entries pending", stats.failed);
                    }
                }
                Err(e) => {
                    // keep looping
                    warn!("Registry reconcile failed: {:?}", e);
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileStats, AppError> {
        self.reconciler.reconcile_all().await
    }
}
