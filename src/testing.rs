//! Engine wired against in-memory collaborators

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use crate::adapters::scripted::ScriptedProvider;
use crate::clock::{Clock, ManualClock};
use crate::effects::{IncentiveRules, IncentiveTrigger, NotificationDispatcher};
use crate::ledger::memory::MemoryTripStore;
use crate::reconcile::{StateReconciler, ZombieDetector};
use crate::settlement::refund::RefundProcessor;

pub struct Harness {
    pub store: Arc<MemoryTripStore>,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Arc<StateReconciler>,
    pub refunds: Arc<RefundProcessor>,
}

impl Harness {
    /// Clock starts at 12:10 UTC, outside the bulk settlement window
    pub fn new() -> Self {
        let store = Arc::new(MemoryTripStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 12, 10, 0).unwrap(),
        ));

        let notifier = Arc::new(NotificationDispatcher::new(store.clone()));
        let incentives = Arc::new(IncentiveTrigger::new(
            store.clone(),
            IncentiveRules {
                min_distance_miles: 0.5,
                min_app_version: "2.0.0".parse().unwrap(),
                reward_type: "ridehail_trip_completed".to_string(),
            },
        ));
        let detector = ZombieDetector::new(store.clone(), clock.clone(), Duration::minutes(35), 500);

        let reconciler = Arc::new(StateReconciler::new(
            store.clone(),
            provider.clone(),
            clock.clone(),
            detector,
            notifier.clone(),
            incentives,
            4,
        ));
        let refunds = Arc::new(RefundProcessor::new(
            store.clone(),
            provider.clone(),
            clock.clone(),
            notifier,
            5,
            500,
            4,
        ));

        Self {
            store,
            provider,
            clock,
            reconciler,
            refunds,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn minutes_ago(&self, minutes: i64) -> DateTime<Utc> {
        self.now() - Duration::minutes(minutes)
    }

    pub fn at_minute(&self, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, minute, 0).unwrap()
    }
}
