pub mod refund;
pub mod scheduler;

pub use refund::{RefundFlow, RefundOutcome, RefundProcessor, SettlementReport};
pub use scheduler::{CycleReport, LatestCycle, ReconcileScheduleConfig, ReconcileScheduler};
