use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Provider-reported ridehail trip status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ridehail_trip_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Processing,
    Accepted,
    Arriving,
    InProgress,
    Completed,
    DriverCanceled,
    RiderCanceled,
    DriverRedispatched,
    NoDriversAvailable,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TripStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown trip status: {}", s)))
    }
}

impl TripStatus {
    /// Statuses from which no further transition is expected
    pub const TERMINAL: [TripStatus; 4] = [
        TripStatus::Completed,
        TripStatus::DriverCanceled,
        TripStatus::RiderCanceled,
        TripStatus::NoDriversAvailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Processing => "processing",
            TripStatus::Accepted => "accepted",
            TripStatus::Arriving => "arriving",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::DriverCanceled => "driver_canceled",
            TripStatus::RiderCanceled => "rider_canceled",
            TripStatus::DriverRedispatched => "driver_redispatched",
            TripStatus::NoDriversAvailable => "no_drivers_available",
        }
    }

    pub fn all() -> Vec<TripStatus> {
        vec![
            TripStatus::Processing,
            TripStatus::Accepted,
            TripStatus::Arriving,
            TripStatus::InProgress,
            TripStatus::Completed,
            TripStatus::DriverCanceled,
            TripStatus::RiderCanceled,
            TripStatus::DriverRedispatched,
            TripStatus::NoDriversAvailable,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Cancellations that leave a payment hold to be released by the refund flows
    pub fn requires_refund(&self) -> bool {
        matches!(
            self,
            TripStatus::DriverCanceled | TripStatus::RiderCanceled | TripStatus::NoDriversAvailable
        )
    }

    /// Message key announced to the rider when the trip lands in this status
    pub fn message_key(&self) -> Option<MessageKey> {
        match self {
            TripStatus::Completed => Some(MessageKey::TripCompleted),
            TripStatus::DriverCanceled => Some(MessageKey::DriverCanceled),
            TripStatus::RiderCanceled => Some(MessageKey::RiderCanceled),
            TripStatus::NoDriversAvailable => Some(MessageKey::NoDriversAvailable),
            _ => None,
        }
    }

    /// Valid transitions:
    /// - Any non-terminal state → any terminal state (the provider is authoritative)
    /// - Processing/Accepted/Arriving → any later active status, DriverRedispatched
    /// - InProgress → DriverRedispatched only; it never falls back to dispatch
    /// - DriverRedispatched → back into the dispatch cycle under a new driver
    /// - Terminal states → NO TRANSITIONS ALLOWED
    pub fn can_transition_to(&self, to: TripStatus) -> bool {
        if *self == to || self.is_terminal() {
            return false;
        }
        if to.is_terminal() {
            return true;
        }

        let allowed: &[TripStatus] = match self {
            TripStatus::Processing => &[
                TripStatus::Accepted,
                TripStatus::Arriving,
                TripStatus::InProgress,
                TripStatus::DriverRedispatched,
            ],
            TripStatus::Accepted => &[
                TripStatus::Arriving,
                TripStatus::InProgress,
                TripStatus::DriverRedispatched,
            ],
            TripStatus::Arriving => &[
                TripStatus::Accepted,
                TripStatus::InProgress,
                TripStatus::DriverRedispatched,
            ],
            TripStatus::InProgress => &[TripStatus::DriverRedispatched],
            TripStatus::DriverRedispatched => &[
                TripStatus::Processing,
                TripStatus::Accepted,
                TripStatus::Arriving,
                TripStatus::InProgress,
            ],
            _ => &[],
        };

        allowed.contains(&to)
    }

    pub fn validate_transition(from: TripStatus, to: TripStatus) -> AppResult<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition { from, to })
        }
    }
}

/// Payment ledger status of a ridehail trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ridehail_payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    None,
    Charged,
    RefundInProgress,
    Refunded,
}

/// Key of a rider-facing message; at most one notification per (trip, key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    TripCompleted,
    DriverCanceled,
    RiderCanceled,
    NoDriversAvailable,
    Refunded,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MessageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::TripCompleted => "trip_completed",
            MessageKey::DriverCanceled => "driver_canceled",
            MessageKey::RiderCanceled => "rider_canceled",
            MessageKey::NoDriversAvailable => "no_drivers_available",
            MessageKey::Refunded => "refunded",
        }
    }
}

/// Commute trip entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: i64,
    pub user_id: i64,

    pub origin_address: String,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub destination_address: String,
    pub destination_lat: f64,
    pub destination_lng: f64,

    pub started_on: DateTime<Utc>,
    /// Set exactly once, when the ride reaches a terminal status
    pub ended_on: Option<DateTime<Utc>>,
    /// Miles
    pub distance: f64,
    /// Seconds
    pub duration: i32,
}

/// Ridehail extension of a trip (1:1 on trip_id)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RidehailTrip {
    pub id: i64,
    pub trip_id: i64,
    pub provider_request_id: String,
    pub trip_status: TripStatus,
    pub payment_status: PaymentStatus,

    #[serde(with = "rust_decimal::serde::float")]
    pub estimated_fare: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub actual_fare: Option<Decimal>,

    // Minutes, as reported by the provider
    pub pickup_eta: Option<i32>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub dropoff_eta: Option<i32>,
    pub dropoff_time: Option<DateTime<Utc>>,

    pub driver_name: Option<String>,
    pub vehicle: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Client app version that requested the ride
    pub app_version: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Commute log closed in lockstep with its trip
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeleworkLog {
    pub id: i64,
    pub trip_id: i64,
    pub user_id: i64,
    pub started_on: DateTime<Utc>,
    pub ended_on: Option<DateTime<Utc>>,
    pub distance: f64,
    pub duration: i32,
}

/// Durable rider-facing message, consumed by the push transport
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub trip_id: i64,
    pub message_key: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Reward request consumed by the disbursement job
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IncentiveQueueEntry {
    pub id: i64,
    pub user_id: i64,
    pub trip_id: i64,
    pub reward_type: String,
    pub distance: f64,
    pub created_at: DateTime<Utc>,
}

/// A trip and its ridehail extension, loaded together
#[derive(Debug, Clone)]
pub struct TripAggregate {
    pub trip: Trip,
    pub ridehail: RidehailTrip,
}

/// Trip whose local status may no longer reflect the provider
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ZombieCandidate {
    pub trip_id: i64,
    pub provider_request_id: String,
    pub trip_status: TripStatus,
    pub updated_at: DateTime<Utc>,
}

/// Trip awaiting payment settlement
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefundCandidate {
    pub trip_id: i64,
    pub user_id: i64,
    pub provider_request_id: String,
    pub trip_status: TripStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewNotification {
    pub user_id: i64,
    pub trip_id: i64,
    pub message_key: MessageKey,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIncentive {
    pub user_id: i64,
    pub trip_id: i64,
    pub reward_type: String,
    pub distance: f64,
}

/// Provider-reported progress fields refreshed alongside a status change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripProgress {
    pub pickup_eta: Option<i32>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub dropoff_eta: Option<i32>,
    pub dropoff_time: Option<DateTime<Utc>>,
    pub driver_name: Option<String>,
    pub vehicle: Option<String>,
}

/// Everything one status change writes, applied by the store as a single unit.
///
/// The store re-reads the persisted status under lock and refuses the whole
/// plan if the trip is already terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub trip_id: i64,
    pub from: TripStatus,
    pub to: TripStatus,
    pub progress: TripProgress,
    pub cancellation_reason: Option<String>,
    pub actual_fare: Option<Decimal>,
    /// Close the trip and its telework log at this instant (if still open)
    pub close_at: Option<DateTime<Utc>>,
    /// Ignored once the trip is already refunded
    pub payment_status: Option<PaymentStatus>,
    pub notification: Option<NewNotification>,
    pub incentive: Option<NewIncentive>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        closed_trip: bool,
        notified: bool,
        incentive_queued: bool,
    },
    /// Persisted status was already terminal when the write was attempted
    RefusedTerminal(TripStatus),
    /// Persisted status already equals the target
    Unchanged,
}

/// Payment settlement of one canceled trip
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub trip_id: i64,
    pub actual_fare: Decimal,
    pub notification: NewNotification,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { notified: bool },
    AlreadySettled,
}
