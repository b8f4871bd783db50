use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    adapters::{HttpProviderClient, ProviderStatusClient},
    api::handler::AppState,
    clock::{Clock, SystemClock},
    config::Settings,
    effects::{IncentiveRules, IncentiveTrigger, NotificationDispatcher},
    error::AppResult,
    ledger::{PgTripStore, TripStore},
    reconcile::{StateReconciler, ZombieDetector},
    settlement::{ReconcileScheduleConfig, ReconcileScheduler, RefundProcessor},
};

/// Wired application: the background scheduler and the ops API state
pub struct Application {
    pub scheduler: Arc<ReconcileScheduler>,
    pub state: AppState,
}

pub async fn initialize_application(settings: &Settings) -> AppResult<Application> {
    info!("Initializing application components ...");

    let pool = initialize_database(&settings.database_url).await?;
    let store: Arc<dyn TripStore> = Arc::new(PgTripStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let provider: Arc<dyn ProviderStatusClient> = Arc::new(HttpProviderClient::new(
        &settings.provider_base_url,
        &settings.provider_token,
        settings.provider_timeout(),
        settings.provider_rate_per_second,
    )?);
    info!(
        "✅ Provider client initialized: {} ({} req/s)",
        settings.provider_base_url, settings.provider_rate_per_second
    );

    let notifier = Arc::new(NotificationDispatcher::new(store.clone()));
    let incentives = Arc::new(IncentiveTrigger::new(
        store.clone(),
        IncentiveRules {
            min_distance_miles: settings.incentive_min_distance_miles,
            min_app_version: settings.incentive_min_app_version.parse()?,
            reward_type: settings.incentive_reward_type.clone(),
        },
    ));

    let detector = ZombieDetector::new(
        store.clone(),
        clock.clone(),
        settings.staleness(),
        settings.scan_batch_limit,
    );
    let reconciler = Arc::new(StateReconciler::new(
        store.clone(),
        provider.clone(),
        clock.clone(),
        detector,
        notifier.clone(),
        incentives,
        settings.max_concurrency,
    ));
    info!(
        "✅ State reconciler initialized (staleness {}m, concurrency {})",
        settings.staleness_minutes, settings.max_concurrency
    );

    let refunds = Arc::new(RefundProcessor::new(
        store.clone(),
        provider,
        clock.clone(),
        notifier,
        settings.bulk_window_minutes,
        settings.scan_batch_limit,
        settings.max_concurrency,
    ));
    info!(
        "✅ Refund processor initialized (bulk window: first {}m of each hour)",
        settings.bulk_window_minutes
    );

    let tick_interval = settings.tick_interval();
    let scheduler = Arc::new(ReconcileScheduler::new(
        ReconcileScheduleConfig { tick_interval },
        reconciler,
        refunds,
        clock.clone(),
    ));

    let state = AppState {
        store,
        clock,
        latest_cycle: scheduler.latest(),
        stall_after: chrono::Duration::seconds(tick_interval.as_secs() as i64 * 3),
    };

    Ok(Application { scheduler, state })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
