use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use crate::api::models::HealthResponse;
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::ledger::models::Notification;
use crate::ledger::TripStore;
use crate::settlement::{CycleReport, LatestCycle};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TripStore>,
    pub clock: Arc<dyn Clock>,
    pub latest_cycle: LatestCycle,
    /// A finished cycle older than this marks the engine as stalled
    pub stall_after: Duration,
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = state.clock.now();
    let latest = state.latest_cycle.read().await;

    let status = match latest.as_ref() {
        None => "starting",
        Some(report) if now - report.finished_at > state.stall_after => "stalled",
        Some(_) => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: now,
        last_cycle_id: latest.as_ref().map(|r| r.cycle_id),
        last_cycle_finished_at: latest.as_ref().map(|r| r.finished_at),
    })
}

/// GET /api/v1/cycles/latest - Report of the most recent scheduler tick
pub async fn latest_cycle(State(state): State<AppState>) -> AppResult<Json<CycleReport>> {
    state
        .latest_cycle
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No reconciliation cycle has completed yet".to_string()))
}

/// GET /api/v1/trips/:trip_id/notifications - Messages recorded for a trip
pub async fn trip_notifications(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
) -> AppResult<Json<Vec<Notification>>> {
    debug!("Listing notifications for trip: {}", trip_id);

    let notifications = state.store.notifications_for_trip(trip_id).await?;
    Ok(Json(notifications))
}
