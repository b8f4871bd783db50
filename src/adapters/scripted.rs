use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::adapters::traits::{ProviderStatusClient, Receipt, TripDetail};
use crate::error::ProviderError;
use crate::ledger::models::TripStatus;

/// Provider stand-in answering from a per-request script, counting calls
#[derive(Default)]
pub struct ScriptedProvider {
    details: Mutex<HashMap<String, Result<TripDetail, ProviderError>>>,
    receipts: Mutex<HashMap<String, Result<Receipt, ProviderError>>>,
    detail_calls: Mutex<Vec<String>>,
    receipt_calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, request_id: &str, status: TripStatus) {
        self.set_detail(request_id, Ok(detail(request_id, status)));
    }

    pub fn set_detail(&self, request_id: &str, detail: Result<TripDetail, ProviderError>) {
        self.details.lock().insert(request_id.to_string(), detail);
    }

    pub fn set_receipt_total(&self, request_id: &str, total: &str) {
        self.set_receipt(
            request_id,
            Ok(Receipt {
                total_fare: total.to_string(),
                charges: Vec::new(),
                distance: None,
                duration: None,
                currency_code: Some("USD".to_string()),
            }),
        );
    }

    pub fn set_receipt(&self, request_id: &str, receipt: Result<Receipt, ProviderError>) {
        self.receipts.lock().insert(request_id.to_string(), receipt);
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().clone()
    }

    pub fn receipt_calls(&self) -> Vec<String> {
        self.receipt_calls.lock().clone()
    }
}

pub fn detail(request_id: &str, status: TripStatus) -> TripDetail {
    TripDetail {
        request_id: request_id.to_string(),
        status,
        pickup: None,
        destination: None,
        driver: None,
        vehicle: None,
        cancellation_info: None,
    }
}

#[async_trait]
impl ProviderStatusClient for ScriptedProvider {
    async fn trip_detail(&self, request_id: &str) -> Result<TripDetail, ProviderError> {
        self.detail_calls.lock().push(request_id.to_string());
        self.details
            .lock()
            .get(request_id)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("unscripted".to_string())))
    }

    async fn trip_receipt(&self, request_id: &str) -> Result<Receipt, ProviderError> {
        self.receipt_calls.lock().push(request_id.to_string());
        self.receipts
            .lock()
            .get(request_id)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::NotFound(request_id.to_string())))
    }
}
