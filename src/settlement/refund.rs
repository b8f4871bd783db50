// Refund settlement for canceled ridehail trips
//
// Two flows share one settle step:
// - rider cancellations, every tick
// - driver cancellations and no-driver outcomes, in a bulk pass that only
//   runs during the first minutes of each hour
//
// The provider receipt is the source of truth for the final fare. A trip
// without a receipt was never charged and settles at zero.

use chrono::{DateTime, Timelike, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::ProviderStatusClient;
use crate::clock::Clock;
use crate::effects::{MessageParams, NotificationDispatcher};
use crate::error::{AppError, AppResult, ProviderError};
use crate::ledger::models::{MessageKey, RefundCandidate, SettlementOutcome, SettlementPlan, TripStatus};
use crate::ledger::TripStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundFlow {
    RiderCancellation,
    BulkSettlement,
}

impl RefundFlow {
    pub fn statuses(&self) -> &'static [TripStatus] {
        match self {
            RefundFlow::RiderCancellation => &[TripStatus::RiderCanceled],
            RefundFlow::BulkSettlement => &[TripStatus::DriverCanceled, TripStatus::NoDriversAvailable],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Settled {
        #[serde(with = "rust_decimal::serde::float")]
        actual_fare: Decimal,
        receipt_found: bool,
        notified: bool,
    },
    AlreadySettled,
    Skipped {
        reason: String,
    },
}

/// Tally of one settlement pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub flow: RefundFlow,
    pub candidates: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_fare: Decimal,
}

impl SettlementReport {
    fn new(flow: RefundFlow, candidates: usize) -> Self {
        Self {
            flow,
            candidates,
            settled: 0,
            already_settled: 0,
            skipped: 0,
            failed: 0,
            total_fare: Decimal::ZERO,
        }
    }

    fn record(&mut self, result: &AppResult<RefundOutcome>) {
        match result {
            Ok(RefundOutcome::Settled { actual_fare, .. }) => {
                self.settled += 1;
                self.total_fare += *actual_fare;
            }
            Ok(RefundOutcome::AlreadySettled) => self.already_settled += 1,
            Ok(RefundOutcome::Skipped { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Settles refund-in-progress trips against provider receipts
pub struct RefundProcessor {
    store: Arc<dyn TripStore>,
    provider: Arc<dyn ProviderStatusClient>,
    clock: Arc<dyn Clock>,
    notifier: Arc<NotificationDispatcher>,
    bulk_window_minutes: u32,
    batch_limit: i64,
    max_concurrency: usize,
}

impl RefundProcessor {
    pub fn new(
        store: Arc<dyn TripStore>,
        provider: Arc<dyn ProviderStatusClient>,
        clock: Arc<dyn Clock>,
        notifier: Arc<NotificationDispatcher>,
        bulk_window_minutes: u32,
        batch_limit: i64,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            notifier,
            bulk_window_minutes,
            batch_limit,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// True during the first `bulk_window_minutes` of each hour
    pub fn in_bulk_window(&self, now: DateTime<Utc>) -> bool {
        now.minute() < self.bulk_window_minutes
    }

    pub async fn run_rider_cancellations(&self) -> AppResult<SettlementReport> {
        self.run_flow(RefundFlow::RiderCancellation).await
    }

    /// `None` outside the bulk window
    pub async fn run_bulk_settlement(&self) -> AppResult<Option<SettlementReport>> {
        let now = self.clock.now();
        if !self.in_bulk_window(now) {
            debug!(minute = now.minute(), "outside bulk settlement window");
            return Ok(None);
        }

        self.run_flow(RefundFlow::BulkSettlement).await.map(Some)
    }

    #[instrument(skip(self))]
    async fn run_flow(&self, flow: RefundFlow) -> AppResult<SettlementReport> {
        let candidates = self
            .store
            .find_pending_refunds(flow.statuses(), self.batch_limit)
            .await?;

        let mut report = SettlementReport::new(flow, candidates.len());
        if candidates.is_empty() {
            return Ok(report);
        }

        info!("💳 Settling {} refunds ({:?})", candidates.len(), flow);

        let results: Vec<(RefundCandidate, AppResult<RefundOutcome>)> = stream::iter(candidates)
            .map(move |candidate| async move {
                let result = self.settle(&candidate).await;
                (candidate, result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (candidate, result) in &results {
            if let Err(e) = result {
                match e {
                    AppError::NotFound(what) => {
                        warn!(trip_id = candidate.trip_id, "⚠️ Skipping refund with missing record: {}", what)
                    }
                    _ => error!(trip_id = candidate.trip_id, "❌ Refund settlement failed: {:?}", e),
                }
            }
            report.record(result);
        }

        info!(
            settled = report.settled,
            failed = report.failed,
            total_fare = %report.total_fare,
            "✓ Refund pass completed ({:?})",
            flow
        );

        Ok(report)
    }

    /// Settle one trip: final fare from the receipt, or zero when the provider has none
    #[instrument(skip(self, candidate), fields(trip_id = candidate.trip_id, request_id = %candidate.provider_request_id))]
    pub async fn settle(&self, candidate: &RefundCandidate) -> AppResult<RefundOutcome> {
        let (actual_fare, receipt_found) =
            match self.provider.trip_receipt(&candidate.provider_request_id).await {
                Ok(receipt) => (receipt.total()?, true),
                Err(ProviderError::NotFound(_)) => (Decimal::ZERO, false),
                Err(e) if e.is_transient() => {
                    warn!("⏭️ Receipt unavailable, retrying next tick: {}", e);
                    return Ok(RefundOutcome::Skipped {
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };

        let params = MessageParams {
            fare: Some(actual_fare),
            ..Default::default()
        };
        let plan = SettlementPlan {
            trip_id: candidate.trip_id,
            actual_fare,
            notification: self.notifier.compose(
                candidate.user_id,
                candidate.trip_id,
                MessageKey::Refunded,
                &params,
            ),
            settled_at: self.clock.now(),
        };

        match self.store.settle_refund(&plan).await? {
            SettlementOutcome::Settled { notified } => {
                info!(%actual_fare, receipt_found, "✅ Refund settled");
                Ok(RefundOutcome::Settled {
                    actual_fare,
                    receipt_found,
                    notified,
                })
            }
            SettlementOutcome::AlreadySettled => Ok(RefundOutcome::AlreadySettled),
        }
    }
}
