use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::adapters::ProviderStatusClient;
use crate::clock::Clock;
use crate::effects::{IncentiveTrigger, MessageParams, NotificationDispatcher};
use crate::error::{AppError, AppResult, ProviderError};
use crate::ledger::models::*;
use crate::ledger::TripStore;
use crate::reconcile::zombie::ZombieDetector;

/// Recorded on trips the provider no longer knows about
pub const PROVIDER_MISSING_REASON: &str = "Trip not found at provider";

/// Result of reconciling one trip against the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Transitioned {
        from: TripStatus,
        to: TripStatus,
        closed_trip: bool,
        notified: bool,
        incentive_queued: bool,
    },
    Unchanged,
    RefusedTerminal {
        status: TripStatus,
    },
    InvalidTransition {
        from: TripStatus,
        to: TripStatus,
    },
    Skipped {
        reason: String,
    },
}

/// Tally of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub transitioned: usize,
    pub unchanged: usize,
    pub refused: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub missing_records: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn record(&mut self, result: &AppResult<ReconcileOutcome>) {
        match result {
            Ok(ReconcileOutcome::Transitioned { .. }) => self.transitioned += 1,
            Ok(ReconcileOutcome::Unchanged) => self.unchanged += 1,
            Ok(ReconcileOutcome::RefusedTerminal { .. }) => self.refused += 1,
            Ok(ReconcileOutcome::InvalidTransition { .. }) => self.invalid += 1,
            Ok(ReconcileOutcome::Skipped { .. }) => self.skipped += 1,
            Err(AppError::NotFound(_)) => self.missing_records += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Applies provider truth to local trip records.
///
/// Every status write goes through [`TripStore::apply_transition`], which
/// re-checks the persisted status under lock and commits the status change,
/// trip/telework closure, notification and incentive as one unit.
pub struct StateReconciler {
    store: Arc<dyn TripStore>,
    provider: Arc<dyn ProviderStatusClient>,
    clock: Arc<dyn Clock>,
    detector: ZombieDetector,
    notifier: Arc<NotificationDispatcher>,
    incentives: Arc<IncentiveTrigger>,
    max_concurrency: usize,
}

impl StateReconciler {
    pub fn new(
        store: Arc<dyn TripStore>,
        provider: Arc<dyn ProviderStatusClient>,
        clock: Arc<dyn Clock>,
        detector: ZombieDetector,
        notifier: Arc<NotificationDispatcher>,
        incentives: Arc<IncentiveTrigger>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            detector,
            notifier,
            incentives,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Scan for zombie trips and reconcile each one.
    ///
    /// A failed scan aborts the pass; per-trip failures are logged and counted.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> AppResult<ReconcileReport> {
        let candidates = self.detector.scan().await?;

        let mut report = ReconcileReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            info!("✓ No stale ridehail trips");
            return Ok(report);
        }

        info!("📊 Found {} stale ridehail trips", candidates.len());

        let this = self;
        let results: Vec<(ZombieCandidate, AppResult<ReconcileOutcome>)> = stream::iter(candidates)
            .map(move |candidate| async move {
                let result = this.reconcile_trip(&candidate).await;
                (candidate, result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (candidate, result) in &results {
            match result {
                Err(AppError::NotFound(what)) => warn!(
                    trip_id = candidate.trip_id,
                    request_id = %candidate.provider_request_id,
                    "⚠️ Skipping trip with missing record: {}",
                    what
                ),
                Err(e) => error!(
                    trip_id = candidate.trip_id,
                    request_id = %candidate.provider_request_id,
                    "❌ Reconciliation failed: {:?}",
                    e
                ),
                Ok(_) => {}
            }
            report.record(result);
        }

        info!(
            scanned = report.scanned,
            transitioned = report.transitioned,
            skipped = report.skipped,
            failed = report.failed,
            "✓ Reconciliation pass completed"
        );

        Ok(report)
    }

    /// Fetch provider truth for one candidate and apply it
    #[instrument(skip(self, candidate), fields(trip_id = candidate.trip_id, request_id = %candidate.provider_request_id))]
    pub async fn reconcile_trip(&self, candidate: &ZombieCandidate) -> AppResult<ReconcileOutcome> {
        let detail = match self.provider.trip_detail(&candidate.provider_request_id).await {
            Ok(detail) => detail,
            Err(ProviderError::NotFound(_)) => return self.resolve_missing(candidate).await,
            Err(e) if e.is_transient() => {
                warn!("⏭️ Provider unavailable, retrying next tick: {}", e);
                return Ok(ReconcileOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let aggregate = self.load(candidate.trip_id).await?;
        let local = aggregate.ridehail.trip_status;

        if detail.status == local {
            return Ok(ReconcileOutcome::Unchanged);
        }
        if local.is_terminal() {
            return Ok(ReconcileOutcome::RefusedTerminal { status: local });
        }
        if let Err(e) = TripStatus::validate_transition(local, detail.status) {
            warn!("Ignoring provider status: {}", e);
            return Ok(ReconcileOutcome::InvalidTransition {
                from: local,
                to: detail.status,
            });
        }

        let plan = self.plan_transition(
            &aggregate,
            detail.status,
            detail.progress(),
            detail.cancellation_reason(),
            None,
        );
        self.apply(&plan).await
    }

    /// The provider has no record of this request. Once the trip is past the
    /// staleness window it is closed as rider-canceled with a zero fare.
    async fn resolve_missing(&self, candidate: &ZombieCandidate) -> AppResult<ReconcileOutcome> {
        let aggregate = self.load(candidate.trip_id).await?;
        let local = aggregate.ridehail.trip_status;

        if local.is_terminal() {
            return Ok(ReconcileOutcome::RefusedTerminal { status: local });
        }

        let age = self.clock.now() - aggregate.ridehail.updated_at;
        if age <= self.detector.staleness() {
            return Ok(ReconcileOutcome::Skipped {
                reason: "not found at provider, not yet aged".to_string(),
            });
        }

        warn!(
            age_minutes = age.num_minutes(),
            "Provider has no record of aged trip, closing as rider_canceled"
        );

        let plan = self.plan_transition(
            &aggregate,
            TripStatus::RiderCanceled,
            TripProgress::default(),
            Some(PROVIDER_MISSING_REASON.to_string()),
            Some(Decimal::ZERO),
        );
        self.apply(&plan).await
    }

    async fn load(&self, trip_id: i64) -> AppResult<TripAggregate> {
        self.store
            .load_trip(trip_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Trip {} not found", trip_id)))
    }

    async fn apply(&self, plan: &TransitionPlan) -> AppResult<ReconcileOutcome> {
        let outcome = match self.store.apply_transition(plan).await? {
            TransitionOutcome::Applied {
                closed_trip,
                notified,
                incentive_queued,
            } => ReconcileOutcome::Transitioned {
                from: plan.from,
                to: plan.to,
                closed_trip,
                notified,
                incentive_queued,
            },
            TransitionOutcome::RefusedTerminal(status) => {
                warn!(%status, "Trip became terminal before write, discarding poll result");
                ReconcileOutcome::RefusedTerminal { status }
            }
            TransitionOutcome::Unchanged => ReconcileOutcome::Unchanged,
        };
        Ok(outcome)
    }

    /// Everything a move into `to` writes. Terminal moves close the trip,
    /// announce the outcome, queue a reward for qualifying completions and
    /// open a refund for cancellations of charged rides.
    pub fn plan_transition(
        &self,
        aggregate: &TripAggregate,
        to: TripStatus,
        progress: TripProgress,
        cancellation_reason: Option<String>,
        actual_fare: Option<Decimal>,
    ) -> TransitionPlan {
        let now = self.clock.now();
        let trip = &aggregate.trip;
        let ridehail = &aggregate.ridehail;

        let mut plan = TransitionPlan {
            trip_id: trip.id,
            from: ridehail.trip_status,
            to,
            progress,
            cancellation_reason,
            actual_fare,
            close_at: None,
            payment_status: None,
            notification: None,
            incentive: None,
            observed_at: now,
        };

        if !to.is_terminal() {
            return plan;
        }

        plan.close_at = Some(now);

        if let Some(key) = to.message_key() {
            let completed = to == TripStatus::Completed;
            let params = MessageParams {
                fare: actual_fare,
                distance_miles: completed.then_some(trip.distance),
                cancellation_reason: plan.cancellation_reason.clone(),
                destination: completed.then(|| trip.destination_address.clone()),
            };
            plan.notification = Some(self.notifier.compose(trip.user_id, trip.id, key, &params));
        }

        if to == TripStatus::Completed {
            plan.incentive = self.incentives.entry_for(
                trip.user_id,
                trip.id,
                trip.distance,
                ridehail.app_version.as_deref(),
            );
        }

        // nothing to release on a ride that was never charged
        if to.requires_refund() && ridehail.payment_status == PaymentStatus::Charged {
            plan.payment_status = Some(PaymentStatus::RefundInProgress);
        }

        plan
    }
}
