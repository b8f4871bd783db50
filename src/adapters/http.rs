use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::adapters::traits::{ProviderStatusClient, Receipt, TripDetail};
use crate::error::ProviderError;

/// Error code the provider returns for a request id it does not know
const ENTITY_NOT_FOUND: &str = "entity_not_found";

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Guest-rides REST client
pub struct HttpProviderClient {
    client: Client,
    base_url: String,
    token: String,
    limiter: DefaultDirectRateLimiter,
}

impl HttpProviderClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
        rate_per_second: u32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        let quota = Quota::per_second(NonZeroU32::new(rate_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            limiter: RateLimiter::direct(quota),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        request_id: &str,
    ) -> Result<T, ProviderError> {
        self.limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%url, status = status.as_u16(), "provider response");

        if status.is_success() {
            let bytes = response.bytes().await?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| ProviderError::Decode(format!("{}: {}", path, e)));
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            let parsed: Option<ProviderErrorBody> = serde_json::from_str(&body).ok();
            // A bare 404 (wrong base url, proxy page) must not read as "trip does not exist"
            if parsed.as_ref().and_then(|b| b.code.as_deref()) == Some(ENTITY_NOT_FOUND) {
                return Err(ProviderError::NotFound(request_id.to_string()));
            }
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Unavailable(format!(
                "{} returned {}",
                path,
                status.as_u16()
            )));
        }

        let message = serde_json::from_str::<ProviderErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body: message,
        })
    }
}

#[async_trait]
impl ProviderStatusClient for HttpProviderClient {
    #[instrument(skip(self))]
    async fn trip_detail(&self, request_id: &str) -> Result<TripDetail, ProviderError> {
        self.get_json(&format!("trips/{}", request_id), request_id)
            .await
    }

    #[instrument(skip(self))]
    async fn trip_receipt(&self, request_id: &str) -> Result<Receipt, ProviderError> {
        self.get_json(&format!("trips/{}/receipt", request_id), request_id)
            .await
    }
}
