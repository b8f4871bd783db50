use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::ledger::models::NewIncentive;
use crate::ledger::TripStore;

/// Dotted numeric client version, e.g. `2.125.0`. Missing components compare as zero.
#[derive(Debug, Clone)]
pub struct AppVersion(Vec<u64>);

impl FromStr for AppVersion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|part| {
                // tolerate build suffixes such as "0-beta" or "0 (1234)"
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u64>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AppError::InvalidInput(format!("Invalid app version: {:?}", s)))?;

        Ok(AppVersion(parts))
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let a = self.0.get(i).copied().unwrap_or(0);
                let b = other.0.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AppVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AppVersion {}

/// Eligibility rules for completion rewards
#[derive(Debug, Clone)]
pub struct IncentiveRules {
    pub min_distance_miles: f64,
    pub min_app_version: AppVersion,
    pub reward_type: String,
}

/// Enqueues one reward per qualifying completed trip
pub struct IncentiveTrigger {
    store: Arc<dyn TripStore>,
    rules: IncentiveRules,
}

impl IncentiveTrigger {
    pub fn new(store: Arc<dyn TripStore>, rules: IncentiveRules) -> Self {
        Self { store, rules }
    }

    /// Distance and version thresholds are both inclusive. Clients with no
    /// recorded or parseable version never qualify.
    pub fn qualifies(&self, distance_miles: f64, app_version: Option<&str>) -> bool {
        let Some(version) = app_version.and_then(|v| v.parse::<AppVersion>().ok()) else {
            return false;
        };

        distance_miles >= self.rules.min_distance_miles && version >= self.rules.min_app_version
    }

    /// Queue entry for a completed trip, or `None` when it does not qualify
    pub fn entry_for(
        &self,
        user_id: i64,
        trip_id: i64,
        distance_miles: f64,
        app_version: Option<&str>,
    ) -> Option<NewIncentive> {
        if !self.qualifies(distance_miles, app_version) {
            debug!(trip_id, distance_miles, ?app_version, "trip does not qualify for incentive");
            return None;
        }

        Some(NewIncentive {
            user_id,
            trip_id,
            reward_type: self.rules.reward_type.clone(),
            distance: distance_miles,
        })
    }

    /// Enqueue outside a transition unit. Returns whether a row was written.
    pub async fn enqueue(
        &self,
        user_id: i64,
        trip_id: i64,
        distance_miles: f64,
        app_version: Option<&str>,
    ) -> AppResult<bool> {
        let Some(entry) = self.entry_for(user_id, trip_id, distance_miles, app_version) else {
            return Ok(false);
        };

        let inserted = self.store.enqueue_incentive(&entry).await?;
        if inserted {
            info!(trip_id, user_id, reward_type = %entry.reward_type, "🎁 Incentive queued");
        }
        Ok(inserted)
    }
}
