use async_trait::async_trait;
use base64::Engine;
use log::{error, info, warn};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::entity::{BroadcastError, SigningResult, SwapRequest};
use crate::provider::models::{BroadcastParams, BroadcastResponse, ErrorResponse};

/// Submits signed transactions to the network
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the network transaction id
    async fn broadcast(
        &self,
        swap_id: &str,
        currency: &str,
        signed_transaction: &[u8],
    ) -> Result<String, BroadcastError>;
}

/// Broadcaster relaying through the provider HTTP API
pub struct HttpBroadcaster {
    http_client: Client,
    base_url: String,
}

impl HttpBroadcaster {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn map_send_error(e: reqwest::Error) -> BroadcastError {
        // Nothing left the machine, so nothing can have been accepted
        if e.is_connect() || e.is_builder() {
            return BroadcastError::Rejected(format!("Provider unreachable: {}", e));
        }
        warn!("Broadcast outcome unknown after transport error: {}", e);
        BroadcastError::AmbiguousTimeout
    }
}

#[async_trait]
impl Broadcaster for HttpBroadcaster {
    async fn broadcast(
        &self,
        swap_id: &str,
        currency: &str,
        signed_transaction: &[u8],
    ) -> Result<String, BroadcastError> {
        let url = format!("{}/broadcast", self.base_url);
        let params = BroadcastParams {
            swap_id,
            currency,
            payload: base64::engine::general_purpose::STANDARD.encode(signed_transaction),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(BroadcastError::AmbiguousTimeout);
        }

        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.message.unwrap_or(body.error),
                Err(_) => status.to_string(),
            };
            error!("Broadcast rejected for swap {}: {}", swap_id, message);
            return Err(BroadcastError::Rejected(message));
        }

        let body: BroadcastResponse = response.json().await.map_err(|e| {
            // Accepted with an unreadable body: the id is lost, not the funds
            warn!("Failed to parse broadcast response: {}", e);
            BroadcastError::AmbiguousTimeout
        })?;

        Ok(body.transaction_id)
    }
}

/// Broadcasts a signed swap exactly once, never retrying.
///
/// A submission that does not answer within the timeout may still have been
/// accepted and is reported as [`BroadcastError::AmbiguousTimeout`].
pub struct BroadcastService {
    broadcaster: Arc<dyn Broadcaster>,
    timeout: Duration,
}

impl BroadcastService {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, timeout: Duration) -> Self {
        Self {
            broadcaster,
            timeout,
        }
    }

    pub async fn broadcast(
        &self,
        request: &SwapRequest,
        signing: &SigningResult,
    ) -> Result<String, BroadcastError> {
        info!(
            "Broadcasting swap {} ({} bytes)",
            signing.swap_provider_id,
            signing.signed_transaction.len()
        );

        let submission = self.broadcaster.broadcast(
            &signing.swap_provider_id,
            &request.from_currency,
            &signing.signed_transaction,
        );

        match tokio::time::timeout(self.timeout, submission).await {
            Ok(Ok(transaction_id)) => {
                info!(
                    "Swap {} broadcast as transaction {}",
                    signing.swap_provider_id, transaction_id
                );
                Ok(transaction_id)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Broadcast of swap {} timed out after {:?}",
                    signing.swap_provider_id, self.timeout
                );
                Err(BroadcastError::AmbiguousTimeout)
            }
        }
    }
}
