use super::models::*;
use super::repository::TripStore;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct MemoryState {
    trips: HashMap<i64, Trip>,
    ridehail: HashMap<i64, RidehailTrip>,
    telework: HashMap<i64, TeleworkLog>,
    notifications: Vec<Notification>,
    incentives: Vec<IncentiveQueueEntry>,
    failing_trips: HashSet<i64>,
    unreachable: bool,
}

/// In-memory ledger mirroring the Postgres store's guards, for tests
pub struct MemoryTripStore {
    state: tokio::sync::RwLock<MemoryState>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::RwLock::new(MemoryState::default()),
        }
    }

    pub async fn insert(&self, trip: Trip, ridehail: RidehailTrip, telework: Option<TeleworkLog>) {
        let mut state = self.state.write().await;
        if let Some(log) = telework {
            state.telework.insert(log.trip_id, log);
        }
        state.ridehail.insert(ridehail.trip_id, ridehail);
        state.trips.insert(trip.id, trip);
    }

    pub async fn trip(&self, trip_id: i64) -> Trip {
        self.state.read().await.trips[&trip_id].clone()
    }

    pub async fn ridehail(&self, trip_id: i64) -> RidehailTrip {
        self.state.read().await.ridehail[&trip_id].clone()
    }

    pub async fn telework(&self, trip_id: i64) -> TeleworkLog {
        self.state.read().await.telework[&trip_id].clone()
    }

    pub async fn all_notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    pub async fn all_incentives(&self) -> Vec<IncentiveQueueEntry> {
        self.state.read().await.incentives.clone()
    }

    /// Writes touching this trip fail as if the database rejected them
    pub async fn fail_writes_for(&self, trip_id: i64) {
        self.state.write().await.failing_trips.insert(trip_id);
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.unreachable = unreachable;
    }

    fn check_reachable(state: &MemoryState) -> AppResult<()> {
        if state.unreachable {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_writable(state: &MemoryState, trip_id: i64) -> AppResult<()> {
        Self::check_reachable(state)?;
        if state.failing_trips.contains(&trip_id) {
            return Err(AppError::Database(sqlx::Error::WorkerCrashed));
        }
        Ok(())
    }

    fn push_notification(state: &mut MemoryState, n: &NewNotification) -> bool {
        let exists = state
            .notifications
            .iter()
            .any(|row| row.trip_id == n.trip_id && row.message_key == n.message_key.as_str());
        if exists {
            return false;
        }
        let id = state.notifications.len() as i64 + 1;
        state.notifications.push(Notification {
            id,
            user_id: n.user_id,
            trip_id: n.trip_id,
            message_key: n.message_key.as_str().to_string(),
            title: n.title.clone(),
            body: n.body.clone(),
            payload: n.payload.clone(),
            created_at: Utc::now(),
        });
        true
    }

    fn push_incentive(state: &mut MemoryState, e: &NewIncentive) -> bool {
        let exists = state.incentives.iter().any(|row| {
            row.user_id == e.user_id && row.trip_id == e.trip_id && row.reward_type == e.reward_type
        });
        if exists {
            return false;
        }
        let id = state.incentives.len() as i64 + 1;
        state.incentives.push(IncentiveQueueEntry {
            id,
            user_id: e.user_id,
            trip_id: e.trip_id,
            reward_type: e.reward_type.clone(),
            distance: e.distance,
            created_at: Utc::now(),
        });
        true
    }
}

impl Default for MemoryTripStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn find_stale_trips(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ZombieCandidate>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;

        let mut candidates: Vec<ZombieCandidate> = state
            .ridehail
            .values()
            .filter(|r| r.updated_at < cutoff && !r.trip_status.is_terminal())
            .map(|r| ZombieCandidate {
                trip_id: r.trip_id,
                provider_request_id: r.provider_request_id.clone(),
                trip_status: r.trip_status,
                updated_at: r.updated_at,
            })
            .collect();
        candidates.sort_by_key(|c| (c.updated_at, c.trip_id));
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn load_trip(&self, trip_id: i64) -> AppResult<Option<TripAggregate>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;

        Ok(match (state.trips.get(&trip_id), state.ridehail.get(&trip_id)) {
            (Some(trip), Some(ridehail)) => Some(TripAggregate {
                trip: trip.clone(),
                ridehail: ridehail.clone(),
            }),
            _ => None,
        })
    }

    async fn apply_transition(&self, plan: &TransitionPlan) -> AppResult<TransitionOutcome> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, plan.trip_id)?;

        let current = state
            .ridehail
            .get(&plan.trip_id)
            .map(|r| r.trip_status)
            .ok_or_else(|| AppError::NotFound(format!("Ridehail trip {} not found", plan.trip_id)))?;

        if current.is_terminal() {
            return Ok(TransitionOutcome::RefusedTerminal(current));
        }
        if current == plan.to {
            return Ok(TransitionOutcome::Unchanged);
        }
        if plan.close_at.is_some() && !state.telework.contains_key(&plan.trip_id) {
            return Err(AppError::NotFound(format!(
                "Telework log for trip {} not found",
                plan.trip_id
            )));
        }

        if let Some(ridehail) = state.ridehail.get_mut(&plan.trip_id) {
            let p = &plan.progress;
            ridehail.trip_status = plan.to;
            ridehail.pickup_eta = p.pickup_eta.or(ridehail.pickup_eta);
            ridehail.pickup_time = p.pickup_time.or(ridehail.pickup_time);
            ridehail.dropoff_eta = p.dropoff_eta.or(ridehail.dropoff_eta);
            ridehail.dropoff_time = p.dropoff_time.or(ridehail.dropoff_time);
            ridehail.driver_name = p.driver_name.clone().or(ridehail.driver_name.take());
            ridehail.vehicle = p.vehicle.clone().or(ridehail.vehicle.take());
            ridehail.cancellation_reason = plan
                .cancellation_reason
                .clone()
                .or(ridehail.cancellation_reason.take());
            ridehail.actual_fare = plan.actual_fare.or(ridehail.actual_fare);
            if ridehail.payment_status != PaymentStatus::Refunded {
                if let Some(payment_status) = plan.payment_status {
                    ridehail.payment_status = payment_status;
                }
            }
            ridehail.updated_at = plan.observed_at;
        }

        let mut closed_trip = false;
        if let Some(close_at) = plan.close_at {
            let mut ended_on = None;
            if let Some(trip) = state.trips.get_mut(&plan.trip_id) {
                if trip.ended_on.is_none() {
                    trip.ended_on = Some(close_at);
                    closed_trip = true;
                }
                ended_on = trip.ended_on;
            }
            if let Some(log) = state.telework.get_mut(&plan.trip_id) {
                if log.ended_on.is_none() {
                    log.ended_on = ended_on;
                }
            }
        }

        let notified = match &plan.notification {
            Some(n) => Self::push_notification(&mut state, n),
            None => false,
        };
        let incentive_queued = match &plan.incentive {
            Some(e) => Self::push_incentive(&mut state, e),
            None => false,
        };

        Ok(TransitionOutcome::Applied {
            closed_trip,
            notified,
            incentive_queued,
        })
    }

    async fn find_pending_refunds(
        &self,
        statuses: &[TripStatus],
        limit: i64,
    ) -> AppResult<Vec<RefundCandidate>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;

        let mut rows: Vec<(&RidehailTrip, i64)> = state
            .ridehail
            .values()
            .filter(|r| {
                r.payment_status == PaymentStatus::RefundInProgress
                    && statuses.contains(&r.trip_status)
            })
            .filter_map(|r| state.trips.get(&r.trip_id).map(|t| (r, t.user_id)))
            .collect();
        rows.sort_by_key(|(r, _)| (r.updated_at, r.trip_id));

        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(r, user_id)| RefundCandidate {
                trip_id: r.trip_id,
                user_id,
                provider_request_id: r.provider_request_id.clone(),
                trip_status: r.trip_status,
            })
            .collect())
    }

    async fn settle_refund(&self, plan: &SettlementPlan) -> AppResult<SettlementOutcome> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, plan.trip_id)?;

        let current = state
            .ridehail
            .get(&plan.trip_id)
            .map(|r| r.payment_status)
            .ok_or_else(|| AppError::NotFound(format!("Ridehail trip {} not found", plan.trip_id)))?;
        if current == PaymentStatus::Refunded {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if !state.telework.contains_key(&plan.trip_id) {
            return Err(AppError::NotFound(format!(
                "Telework log for trip {} not found",
                plan.trip_id
            )));
        }

        if let Some(ridehail) = state.ridehail.get_mut(&plan.trip_id) {
            ridehail.actual_fare = Some(plan.actual_fare);
            ridehail.payment_status = PaymentStatus::Refunded;
            ridehail.updated_at = plan.settled_at;
        }
        if let Some(trip) = state.trips.get_mut(&plan.trip_id) {
            trip.distance = 0.0;
            trip.duration = 0;
        }
        if let Some(log) = state.telework.get_mut(&plan.trip_id) {
            log.distance = 0.0;
            log.duration = 0;
        }

        let notified = Self::push_notification(&mut state, &plan.notification);
        Ok(SettlementOutcome::Settled { notified })
    }

    async fn insert_notification(&self, notification: &NewNotification) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, notification.trip_id)?;
        Ok(Self::push_notification(&mut state, notification))
    }

    async fn enqueue_incentive(&self, entry: &NewIncentive) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, entry.trip_id)?;
        Ok(Self::push_incentive(&mut state, entry))
    }

    async fn notifications_for_trip(&self, trip_id: i64) -> AppResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.trip_id == trip_id)
            .cloned()
            .collect())
    }

    async fn incentives_for_trip(&self, trip_id: i64) -> AppResult<Vec<IncentiveQueueEntry>> {
        let state = self.state.read().await;
        Ok(state
            .incentives
            .iter()
            .filter(|e| e.trip_id == trip_id)
            .cloned()
            .collect())
    }
}

/// Fixture builders shared by the engine tests
pub mod fixtures {
    use super::*;
    use chrono::Duration;

    pub fn trip(trip_id: i64, user_id: i64, distance: f64, started_on: DateTime<Utc>) -> Trip {
        Trip {
            id: trip_id,
            user_id,
            origin_address: "1200 Main St, Houston, TX".to_string(),
            origin_lat: 29.7550,
            origin_lng: -95.3650,
            destination_address: "6100 Main St, Houston, TX".to_string(),
            destination_lat: 29.7174,
            destination_lng: -95.4018,
            started_on,
            ended_on: None,
            distance,
            duration: 1260,
        }
    }

    pub fn ridehail(
        trip_id: i64,
        status: TripStatus,
        payment_status: PaymentStatus,
        app_version: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> RidehailTrip {
        RidehailTrip {
            id: trip_id,
            trip_id,
            provider_request_id: format!("req-{}", trip_id),
            trip_status: status,
            payment_status,
            estimated_fare: Decimal::new(1250, 2),
            actual_fare: None,
            pickup_eta: None,
            pickup_time: None,
            dropoff_eta: None,
            dropoff_time: None,
            driver_name: None,
            vehicle: None,
            cancellation_reason: None,
            app_version: app_version.map(str::to_string),
            created_at: updated_at - Duration::minutes(5),
            updated_at,
        }
    }

    pub fn telework(trip_id: i64, user_id: i64, distance: f64, started_on: DateTime<Utc>) -> TeleworkLog {
        TeleworkLog {
            id: trip_id,
            trip_id,
            user_id,
            started_on,
            ended_on: None,
            distance,
            duration: 1260,
        }
    }

    /// Seeds a trip with its ridehail row and telework log
    pub async fn seed(
        store: &MemoryTripStore,
        trip_id: i64,
        status: TripStatus,
        payment_status: PaymentStatus,
        distance: f64,
        app_version: Option<&str>,
        updated_at: DateTime<Utc>,
    ) {
        let user_id = trip_id * 10;
        store
            .insert(
                trip(trip_id, user_id, distance, updated_at),
                ridehail(trip_id, status, payment_status, app_version, updated_at),
                Some(telework(trip_id, user_id, distance, updated_at)),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_stale_scan_skips_terminal_and_orders_oldest_first() {
        let store = MemoryTripStore::new();
        seed(&store, 1, TripStatus::InProgress, PaymentStatus::Charged, 3.0, None, at(20)).await;
        seed(&store, 2, TripStatus::Accepted, PaymentStatus::Charged, 3.0, None, at(5)).await;
        seed(&store, 3, TripStatus::Completed, PaymentStatus::Charged, 3.0, None, at(1)).await;
        seed(&store, 4, TripStatus::Processing, PaymentStatus::Charged, 3.0, None, at(50)).await;

        let stale = store.find_stale_trips(at(30), 10).await.unwrap();
        let ids: Vec<i64> = stale.iter().map(|c| c.trip_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_notification_unique_per_trip_and_key() {
        let store = MemoryTripStore::new();
        let n = NewNotification {
            user_id: 10,
            trip_id: 1,
            message_key: MessageKey::Refunded,
            title: "t".into(),
            body: "b".into(),
            payload: serde_json::json!({}),
        };
        assert!(store.insert_notification(&n).await.unwrap());
        assert!(!store.insert_notification(&n).await.unwrap());
        assert_eq!(store.notifications_for_trip(1).await.unwrap().len(), 1);
    }
}
