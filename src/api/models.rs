use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ========== RESPONSE MODELS ==========

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "starting" or "stalled"
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub last_cycle_id: Option<Uuid>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
}
