use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ProviderError;
use crate::ledger::models::{TripProgress, TripStatus};

/// Pickup or destination leg of a provider trip
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    /// Minutes until the driver reaches this point
    #[serde(default)]
    pub eta: Option<i32>,
    /// Unix seconds at which the rider was picked up / dropped off
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub license_plate: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CancellationInfo {
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

/// Canonical trip detail from `GET trips/{request_id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripDetail {
    pub request_id: String,
    pub status: TripStatus,
    #[serde(default)]
    pub pickup: Option<Waypoint>,
    #[serde(default)]
    pub destination: Option<Waypoint>,
    #[serde(default)]
    pub driver: Option<Driver>,
    #[serde(default)]
    pub vehicle: Option<Vehicle>,
    #[serde(default)]
    pub cancellation_info: Option<CancellationInfo>,
}

impl TripDetail {
    /// Eta/time fields to refresh on the local record
    pub fn progress(&self) -> TripProgress {
        let pickup = self.pickup.clone().unwrap_or_default();
        let destination = self.destination.clone().unwrap_or_default();

        TripProgress {
            pickup_eta: pickup.eta,
            pickup_time: pickup.timestamp.and_then(from_unix),
            dropoff_eta: destination.eta,
            dropoff_time: destination.timestamp.and_then(from_unix),
            driver_name: self.driver.as_ref().and_then(|d| d.name.clone()),
            vehicle: self.vehicle.as_ref().and_then(Vehicle::summary),
        }
    }

    pub fn cancellation_reason(&self) -> Option<String> {
        self.cancellation_info
            .as_ref()
            .and_then(|c| c.cancellation_reason.clone())
    }
}

impl Vehicle {
    fn summary(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.make, &self.model, &self.license_plate]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Charge {
    pub name: String,
    pub amount: String,
}

/// Financial summary from `GET trips/{request_id}/receipt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    pub total_fare: String,
    #[serde(default)]
    pub charges: Vec<Charge>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub currency_code: Option<String>,
}

impl Receipt {
    pub fn total(&self) -> Result<Decimal, ProviderError> {
        parse_money(&self.total_fare)
    }
}

/// Parses provider money strings such as `"$5.31"`, `"US$1,204.50"` or `"-2.00"`.
pub fn parse_money(raw: &str) -> Result<Decimal, ProviderError> {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if digits.is_empty() {
        return Err(ProviderError::Decode(format!("Unparseable amount: {:?}", raw)));
    }

    let amount = Decimal::from_str(&digits)
        .map_err(|e| ProviderError::Decode(format!("Unparseable amount {:?}: {}", raw, e)))?
        .round_dp(2);

    Ok(if negative { -amount } else { amount })
}

/// Read-only view of the ridehail provider.
///
/// Implementations must not retry; the next scheduler tick is the retry.
#[async_trait]
pub trait ProviderStatusClient: Send + Sync {
    async fn trip_detail(&self, request_id: &str) -> Result<TripDetail, ProviderError>;

    async fn trip_receipt(&self, request_id: &str) -> Result<Receipt, ProviderError>;
}
