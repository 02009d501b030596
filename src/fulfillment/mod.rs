//! Gift-card fulfillment hand-off.
//!
//! Redemptions that need an external provider are committed as `pending`
//! first and then handed to a [`Fulfillment`] implementation outside any
//! store transaction. A failed hand-off leaves the redemption pending for
//! the provider side to pick up.

mod http;

pub use http::HttpFulfillment;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{FulfillmentConfig, FulfillmentKind};
use crate::model::Redemption;

/// Errors that can occur when handing off a redemption.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider answered with a retryable status.
    #[error("Fulfillment unavailable: {0}")]
    Unavailable(String),

    #[error("Fulfillment rejected: {0}")]
    Rejected(String),
}

/// One pending redemption to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulfillmentRequest {
    pub redemption: Redemption,
    pub sku: String,
    /// Face value in cents, when known.
    pub face_value: Option<i64>,
    /// `store` or `giveaway:{id}`.
    pub source: String,
}

#[async_trait]
pub trait Fulfillment: Send + Sync {
    /// Deliver one redemption. Implementations retry transient failures
    /// internally.
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<(), FulfillmentError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Logs the hand-off and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFulfillment;

#[async_trait]
impl Fulfillment for LogFulfillment {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<(), FulfillmentError> {
        info!(
            redemption_id = %request.redemption.id,
            user_id = %request.redemption.user_id,
            sku = %request.sku,
            source = %request.source,
            "Redemption queued for fulfillment"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every request in memory. For tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingFulfillment {
    requests: Mutex<Vec<FulfillmentRequest>>,
    fail: Mutex<bool>,
}

impl RecordingFulfillment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail with `Unavailable`.
    pub async fn set_failing(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }

    pub async fn requests(&self) -> Vec<FulfillmentRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Fulfillment for RecordingFulfillment {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<(), FulfillmentError> {
        if *self.fail.lock().await {
            return Err(FulfillmentError::Unavailable("injected".to_string()));
        }
        self.requests.lock().await.push(request.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Build the configured fulfillment client.
pub fn init_fulfillment(
    config: &FulfillmentConfig,
) -> Result<Arc<dyn Fulfillment>, FulfillmentError> {
    match config.kind {
        FulfillmentKind::Log => Ok(Arc::new(LogFulfillment)),
        FulfillmentKind::Http => {
            let mut client = HttpFulfillment::new(
                config.endpoint.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            if let Some(token) = &config.auth_token {
                client = client.with_header("Authorization", format!("Bearer {token}"));
            }
            info!(endpoint = %config.endpoint, "HTTP fulfillment enabled");
            Ok(Arc::new(client))
        }
    }
}
