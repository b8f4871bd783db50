use super::models::*;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

/// Persistence seam for the reconciliation engine.
///
/// Multi-row writes (`apply_transition`, `settle_refund`) are single units:
/// either everything in the plan lands or nothing does.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Non-terminal trips last updated before `cutoff`, oldest first
    async fn find_stale_trips(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ZombieCandidate>>;

    async fn load_trip(&self, trip_id: i64) -> AppResult<Option<TripAggregate>>;

    async fn apply_transition(&self, plan: &TransitionPlan) -> AppResult<TransitionOutcome>;

    /// Trips in one of `statuses` whose payment is `refund_in_progress`
    async fn find_pending_refunds(
        &self,
        statuses: &[TripStatus],
        limit: i64,
    ) -> AppResult<Vec<RefundCandidate>>;

    async fn settle_refund(&self, plan: &SettlementPlan) -> AppResult<SettlementOutcome>;

    /// Returns false when a row for (trip_id, message_key) already exists
    async fn insert_notification(&self, notification: &NewNotification) -> AppResult<bool>;

    /// Returns false when a row for (user_id, trip_id, reward_type) already exists
    async fn enqueue_incentive(&self, entry: &NewIncentive) -> AppResult<bool>;

    async fn notifications_for_trip(&self, trip_id: i64) -> AppResult<Vec<Notification>>;

    async fn incentives_for_trip(&self, trip_id: i64) -> AppResult<Vec<IncentiveQueueEntry>>;
}

/// Postgres-backed trip ledger
pub struct PgTripStore {
    pub pool: PgPool,
}

impl PgTripStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ========== SHARED WRITE HELPERS ==========

async fn insert_notification_on(
    conn: &mut PgConnection,
    notification: &NewNotification,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, trip_id, message_key, title, body, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (trip_id, message_key) DO NOTHING
        "#,
    )
    .bind(notification.user_id)
    .bind(notification.trip_id)
    .bind(notification.message_key.as_str())
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(&notification.payload)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn enqueue_incentive_on(conn: &mut PgConnection, entry: &NewIncentive) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO incentive_queue (user_id, trip_id, reward_type, distance)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, trip_id, reward_type) DO NOTHING
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.trip_id)
    .bind(&entry.reward_type)
    .bind(entry.distance)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn telework_exists(conn: &mut PgConnection, trip_id: i64) -> AppResult<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM telework_logs WHERE trip_id = $1)")
            .bind(trip_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(exists)
}

#[async_trait]
impl TripStore for PgTripStore {
    // ========== ZOMBIE SCAN ==========

    async fn find_stale_trips(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ZombieCandidate>> {
        let candidates = sqlx::query_as::<_, ZombieCandidate>(
            r#"
            SELECT trip_id, provider_request_id, trip_status, updated_at
            FROM ridehail_trips
            WHERE updated_at < $1
              AND trip_status NOT IN ('completed', 'driver_canceled', 'rider_canceled', 'no_drivers_available')
            ORDER BY updated_at ASC, trip_id ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(candidates)
    }

    async fn load_trip(&self, trip_id: i64) -> AppResult<Option<TripAggregate>> {
        let trip = sqlx::query_as::<_, Trip>(
            r#"
            SELECT id, user_id, origin_address, origin_lat, origin_lng,
                   destination_address, destination_lat, destination_lng,
                   started_on, ended_on, distance, duration
            FROM trips
            WHERE id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(trip) = trip else {
            return Ok(None);
        };

        let ridehail = sqlx::query_as::<_, RidehailTrip>(
            r#"
            SELECT id, trip_id, provider_request_id, trip_status, payment_status,
                   estimated_fare, actual_fare, pickup_eta, pickup_time, dropoff_eta, dropoff_time,
                   driver_name, vehicle, cancellation_reason, app_version, created_at, updated_at
            FROM ridehail_trips
            WHERE trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ridehail.map(|ridehail| TripAggregate { trip, ridehail }))
    }

    // ========== STATUS TRANSITIONS ==========

    async fn apply_transition(&self, plan: &TransitionPlan) -> AppResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Re-read under row lock; a stale or duplicate poll must not overwrite a terminal state
        let current: Option<TripStatus> = sqlx::query_scalar(
            "SELECT trip_status FROM ridehail_trips WHERE trip_id = $1 FOR UPDATE",
        )
        .bind(plan.trip_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = current.ok_or_else(|| {
            AppError::NotFound(format!("Ridehail trip {} not found", plan.trip_id))
        })?;

        if current.is_terminal() {
            debug!(trip_id = plan.trip_id, status = %current, "refusing write over terminal status");
            return Ok(TransitionOutcome::RefusedTerminal(current));
        }
        if current == plan.to {
            return Ok(TransitionOutcome::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE ridehail_trips
            SET trip_status = $2,
                pickup_eta = COALESCE($3, pickup_eta),
                pickup_time = COALESCE($4, pickup_time),
                dropoff_eta = COALESCE($5, dropoff_eta),
                dropoff_time = COALESCE($6, dropoff_time),
                driver_name = COALESCE($7, driver_name),
                vehicle = COALESCE($8, vehicle),
                cancellation_reason = COALESCE($9, cancellation_reason),
                actual_fare = COALESCE($10, actual_fare),
                payment_status = CASE
                    WHEN payment_status = 'refunded' THEN payment_status
                    ELSE COALESCE($11, payment_status)
                END,
                updated_at = $12
            WHERE trip_id = $1
            "#,
        )
        .bind(plan.trip_id)
        .bind(plan.to)
        .bind(plan.progress.pickup_eta)
        .bind(plan.progress.pickup_time)
        .bind(plan.progress.dropoff_eta)
        .bind(plan.progress.dropoff_time)
        .bind(&plan.progress.driver_name)
        .bind(&plan.progress.vehicle)
        .bind(&plan.cancellation_reason)
        .bind(plan.actual_fare)
        .bind(plan.payment_status)
        .bind(plan.observed_at)
        .execute(&mut *tx)
        .await?;

        let mut closed_trip = false;
        if let Some(close_at) = plan.close_at {
            if !telework_exists(&mut tx, plan.trip_id).await? {
                return Err(AppError::NotFound(format!(
                    "Telework log for trip {} not found",
                    plan.trip_id
                )));
            }

            closed_trip = sqlx::query(
                "UPDATE trips SET ended_on = $2 WHERE id = $1 AND ended_on IS NULL",
            )
            .bind(plan.trip_id)
            .bind(close_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            // Telework log always takes the trip's end instant so both record the same event
            sqlx::query(
                r#"
                UPDATE telework_logs
                SET ended_on = (SELECT ended_on FROM trips WHERE id = $1)
                WHERE trip_id = $1 AND ended_on IS NULL
                "#,
            )
            .bind(plan.trip_id)
            .execute(&mut *tx)
            .await?;
        }

        let notified = match &plan.notification {
            Some(notification) => insert_notification_on(&mut tx, notification).await?,
            None => false,
        };

        let incentive_queued = match &plan.incentive {
            Some(entry) => enqueue_incentive_on(&mut tx, entry).await?,
            None => false,
        };

        tx.commit().await?;

        info!(
            trip_id = plan.trip_id,
            from = %plan.from,
            to = %plan.to,
            closed_trip,
            notified,
            incentive_queued,
            "✓ Trip transition committed"
        );

        Ok(TransitionOutcome::Applied {
            closed_trip,
            notified,
            incentive_queued,
        })
    }

    // ========== REFUND SETTLEMENT ==========

    async fn find_pending_refunds(
        &self,
        statuses: &[TripStatus],
        limit: i64,
    ) -> AppResult<Vec<RefundCandidate>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let candidates = sqlx::query_as::<_, RefundCandidate>(
            r#"
            SELECT r.trip_id, t.user_id, r.provider_request_id, r.trip_status
            FROM ridehail_trips r
            JOIN trips t ON t.id = r.trip_id
            WHERE r.payment_status = 'refund_in_progress'
              AND r.trip_status::text = ANY($1)
            ORDER BY r.updated_at ASC, r.trip_id ASC
            LIMIT $2
            "#,
        )
        .bind(statuses)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(candidates)
    }

    async fn settle_refund(&self, plan: &SettlementPlan) -> AppResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<PaymentStatus> = sqlx::query_scalar(
            "SELECT payment_status FROM ridehail_trips WHERE trip_id = $1 FOR UPDATE",
        )
        .bind(plan.trip_id)
        .fetch_optional(&mut *tx)
        .await?;

        match current {
            None => {
                return Err(AppError::NotFound(format!(
                    "Ridehail trip {} not found",
                    plan.trip_id
                )))
            }
            Some(PaymentStatus::Refunded) => return Ok(SettlementOutcome::AlreadySettled),
            Some(_) => {}
        }

        if !telework_exists(&mut tx, plan.trip_id).await? {
            return Err(AppError::NotFound(format!(
                "Telework log for trip {} not found",
                plan.trip_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE ridehail_trips
            SET actual_fare = $2, payment_status = 'refunded', updated_at = $3
            WHERE trip_id = $1
            "#,
        )
        .bind(plan.trip_id)
        .bind(plan.actual_fare)
        .bind(plan.settled_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE trips SET distance = 0, duration = 0 WHERE id = $1")
            .bind(plan.trip_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE telework_logs SET distance = 0, duration = 0 WHERE trip_id = $1")
            .bind(plan.trip_id)
            .execute(&mut *tx)
            .await?;

        let notified = insert_notification_on(&mut tx, &plan.notification).await?;

        tx.commit().await?;

        info!(
            trip_id = plan.trip_id,
            actual_fare = %plan.actual_fare,
            notified,
            "✓ Refund settled"
        );

        Ok(SettlementOutcome::Settled { notified })
    }

    // ========== NOTIFICATIONS & INCENTIVES ==========

    async fn insert_notification(&self, notification: &NewNotification) -> AppResult<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_notification_on(&mut conn, notification).await
    }

    async fn enqueue_incentive(&self, entry: &NewIncentive) -> AppResult<bool> {
        let mut conn = self.pool.acquire().await?;
        enqueue_incentive_on(&mut conn, entry).await
    }

    async fn notifications_for_trip(&self, trip_id: i64) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, trip_id, message_key, title, body, payload, created_at
            FROM notifications
            WHERE trip_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn incentives_for_trip(&self, trip_id: i64) -> AppResult<Vec<IncentiveQueueEntry>> {
        let rows = sqlx::query_as::<_, IncentiveQueueEntry>(
            r#"
            SELECT id, user_id, trip_id, reward_type, distance, created_at
            FROM incentive_queue
            WHERE trip_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
