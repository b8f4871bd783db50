// Rider-facing consequences of a status change
pub mod incentive;
pub mod notification;

pub use incentive::{AppVersion, IncentiveRules, IncentiveTrigger};
pub use notification::{MessageParams, NotificationDispatcher};
