use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::AppResult;
use crate::ledger::models::{MessageKey, NewNotification};
use crate::ledger::TripStore;

/// Values interpolated into a message body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageParams {
    pub fare: Option<Decimal>,
    pub distance_miles: Option<f64>,
    pub cancellation_reason: Option<String>,
    pub destination: Option<String>,
}

/// Produces durable, de-duplicated rider messages.
///
/// Rows are keyed by (trip_id, message_key); the push transport reads them
/// from the notifications table.
pub struct NotificationDispatcher {
    store: Arc<dyn TripStore>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn TripStore>) -> Self {
        Self { store }
    }

    /// Render a message without persisting it, for inclusion in a larger write unit
    pub fn compose(
        &self,
        user_id: i64,
        trip_id: i64,
        key: MessageKey,
        params: &MessageParams,
    ) -> NewNotification {
        let (title, body) = render(key, params);

        NewNotification {
            user_id,
            trip_id,
            message_key: key,
            title,
            body,
            payload: serde_json::json!({
                "trip_id": trip_id,
                "message_key": key.as_str(),
                "fare": params.fare.map(|f| format!("{:.2}", f.round_dp(2))),
                "distance": params.distance_miles,
                "cancellation_reason": params.cancellation_reason,
            }),
        }
    }

    /// Insert one notification unless (trip_id, key) already has one.
    /// Returns whether a row was written.
    pub async fn dispatch(
        &self,
        user_id: i64,
        trip_id: i64,
        key: MessageKey,
        params: &MessageParams,
    ) -> AppResult<bool> {
        let notification = self.compose(user_id, trip_id, key, params);
        let inserted = self.store.insert_notification(&notification).await?;

        if inserted {
            info!(trip_id, message_key = %key, "🔔 Notification queued");
        } else {
            debug!(trip_id, message_key = %key, "notification already exists");
        }
        Ok(inserted)
    }
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount.round_dp(2))
}

fn render(key: MessageKey, params: &MessageParams) -> (String, String) {
    match key {
        MessageKey::TripCompleted => {
            let mut body = match &params.destination {
                Some(destination) => format!("You have arrived at {}.", destination),
                None => "Your ride is complete.".to_string(),
            };
            if let Some(distance) = params.distance_miles {
                body.push_str(&format!(" Distance traveled: {:.2} mi.", distance));
            }
            ("Trip completed".to_string(), body)
        }
        MessageKey::DriverCanceled => (
            "Driver canceled".to_string(),
            "Your driver canceled the trip. Any fare hold will be released to your account."
                .to_string(),
        ),
        MessageKey::RiderCanceled => {
            let mut body = "Your ride was canceled.".to_string();
            if let Some(reason) = &params.cancellation_reason {
                body.push_str(&format!(" Reason: {}.", reason.trim_end_matches('.')));
            }
            ("Ride canceled".to_string(), body)
        }
        MessageKey::NoDriversAvailable => (
            "No drivers available".to_string(),
            "No drivers were available for your ride request. You have not been charged."
                .to_string(),
        ),
        MessageKey::Refunded => (
            "Refund processed".to_string(),
            format!(
                "Your ride payment has been settled. Final fare: {}.",
                money(params.fare.unwrap_or(Decimal::ZERO))
            ),
        ),
    }
}
