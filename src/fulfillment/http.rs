//! HTTP webhook fulfillment.
//!
//! POSTs one JSON document per redemption to the configured endpoint.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use super::{Fulfillment, FulfillmentError, FulfillmentRequest};
use crate::utils::retry::fulfillment_backoff;

pub struct HttpFulfillment {
    client: Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl HttpFulfillment {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, FulfillmentError> {
        if endpoint.is_empty() {
            return Err(FulfillmentError::Config(
                "fulfillment endpoint not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FulfillmentError::Http)?;

        Ok(Self {
            client,
            endpoint,
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    fn is_retryable(err: &FulfillmentError) -> bool {
        match err {
            FulfillmentError::Http(e) => e.is_timeout() || e.is_connect(),
            FulfillmentError::Unavailable(_) => true,
            _ => false,
        }
    }

    /// 429 and 5xx.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn post(&self, request: &FulfillmentRequest) -> Result<(), FulfillmentError> {
        let body = serde_json::to_vec(request)?;

        let mut call = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            // lets the provider dedupe our retries
            .header("Idempotency-Key", request.redemption.id.to_string())
            .body(body);
        for (key, value) in &self.headers {
            call = call.header(key, value);
        }

        let response = call.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(
                endpoint = %self.endpoint,
                redemption_id = %request.redemption.id,
                "Fulfillment accepted"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!(
            "HTTP {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );
        if Self::is_retryable_status(status) {
            warn!(endpoint = %self.endpoint, status = %status, "Fulfillment returned retryable status");
            Err(FulfillmentError::Unavailable(detail))
        } else {
            error!(endpoint = %self.endpoint, status = %status, "Fulfillment rejected");
            Err(FulfillmentError::Rejected(detail))
        }
    }
}

#[async_trait]
impl Fulfillment for HttpFulfillment {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<(), FulfillmentError> {
        (|| async { self.post(request).await })
            .retry(fulfillment_backoff())
            .when(Self::is_retryable)
            .notify(|e, delay| {
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Retrying fulfillment");
            })
            .await
    }

    fn name(&self) -> &str {
        "http"
    }
}
