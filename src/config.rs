use std::time::Duration;

use serde::Deserialize;

use crate::error::AppResult;

/// Runtime settings, layered from defaults and `RIDEHAIL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub provider_base_url: String,
    #[serde(default)]
    pub provider_token: String,
    pub provider_timeout_secs: u64,
    /// Client-side quota on provider calls, shared by detail and receipt lookups
    pub provider_rate_per_second: u32,
    /// Minimum age before a non-terminal trip is polled again
    pub staleness_minutes: i64,
    pub tick_interval_secs: u64,
    /// Bulk settlement only runs while `minute < bulk_window_minutes`
    pub bulk_window_minutes: u32,
    pub max_concurrency: usize,
    pub scan_batch_limit: i64,
    pub incentive_min_distance_miles: f64,
    pub incentive_min_app_version: String,
    pub incentive_reward_type: String,
}

impl Settings {
    pub fn load() -> AppResult<Self> {
        let settings = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/ridehail")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("provider_base_url", "https://api.uber.com/v1/guests")?
            .set_default("provider_timeout_secs", 10_i64)?
            .set_default("provider_rate_per_second", 20_i64)?
            .set_default("staleness_minutes", 35_i64)?
            .set_default("tick_interval_secs", 60_i64)?
            .set_default("bulk_window_minutes", 5_i64)?
            .set_default("max_concurrency", 8_i64)?
            .set_default("scan_batch_limit", 500_i64)?
            .set_default("incentive_min_distance_miles", 0.5_f64)?
            .set_default("incentive_min_app_version", "2.0.0")?
            .set_default("incentive_reward_type", "ridehail_trip_completed")?
            .add_source(config::Environment::with_prefix("RIDEHAIL"))
            // the deployment-wide DATABASE_URL wins over the prefixed one
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_minutes)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }
}
