// Reconciliation Scheduler - drives the engine on a fixed tick
//
// Each tick runs, in order:
// - zombie scan and state reconciliation
// - rider cancellation refunds
// - bulk driver/no-driver refunds (first minutes of the hour only)
//
// Ticks never overlap: the next one is only scheduled after the previous
// finishes. A failed phase is logged and retried on the next tick.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppResult;
use crate::reconcile::{ReconcileReport, StateReconciler};
use crate::settlement::refund::{RefundProcessor, SettlementReport};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct ReconcileScheduleConfig {
    pub tick_interval: Duration,
}

/// Summary of one scheduler tick, served by the ops API
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reconcile: ReconcileReport,
    pub rider_refunds: SettlementReport,
    pub bulk_refunds: Option<SettlementReport>,
}

pub type LatestCycle = Arc<RwLock<Option<CycleReport>>>;

/// Reconciliation scheduler - coordinates the periodic passes
pub struct ReconcileScheduler {
    config: ReconcileScheduleConfig,
    reconciler: Arc<StateReconciler>,
    refunds: Arc<RefundProcessor>,
    clock: Arc<dyn Clock>,
    latest: LatestCycle,
}

impl ReconcileScheduler {
    pub fn new(
        config: ReconcileScheduleConfig,
        reconciler: Arc<StateReconciler>,
        refunds: Arc<RefundProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            reconciler,
            refunds,
            clock,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn latest(&self) -> LatestCycle {
        self.latest.clone()
    }

    /// Run one full cycle and publish its report
    #[instrument(skip(self))]
    pub async fn tick(&self) -> AppResult<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let started_at = self.clock.now();
        info!(%cycle_id, "🔄 Starting reconciliation cycle");

        let reconcile = self.reconciler.run_cycle().await?;
        let rider_refunds = self.refunds.run_rider_cancellations().await?;
        let bulk_refunds = self.refunds.run_bulk_settlement().await?;

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: self.clock.now(),
            reconcile,
            rider_refunds,
            bulk_refunds,
        };

        *self.latest.write().await = Some(report.clone());
        info!(%cycle_id, "✓ Reconciliation cycle completed");

        Ok(report)
    }

    /// Start the scheduler (runs in background until `shutdown` flips to true)
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "⏰ Reconciliation scheduler started, every {}s",
                self.config.tick_interval.as_secs()
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("🛑 Reconciliation scheduler stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("❌ Reconciliation cycle failed: {:?}", e);
                        }
                    }
                }
            }
        })
    }
}
