use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::entity::{AmountBounds, ProviderError, Quote, RateMode, SwapError, SwapRequest};
use crate::interactor::error_classifier::classify;
use crate::provider::models::{
    BoundsParams, BoundsResponse, ErrorResponse, QuoteParams, QuoteResponseBody,
};

/// Remote source of swap quotes.
///
/// Failures are raised as `anyhow::Error`, carrying a [`ProviderError`]
/// whenever the provider reported a known cause.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Amount limits the provider accepts for a pair
    async fn fetch_bounds(&self, from: &str, to: &str, rate_mode: RateMode)
        -> Result<AmountBounds>;

    async fn fetch_quote(&self, request: &SwapRequest) -> Result<Quote>;
}

/// Quote provider backed by the provider HTTP API
pub struct HttpQuoteProvider {
    http_client: Client,
    base_url: String,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn read_error(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => anyhow::Error::new(body.into_provider_error()),
            Err(_) if status.is_server_error() => {
                anyhow::Error::new(ProviderError::Unavailable(status.to_string()))
            }
            Err(_) => anyhow::Error::new(ProviderError::Rejected(status.to_string())),
        }
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn fetch_bounds(
        &self,
        from: &str,
        to: &str,
        rate_mode: RateMode,
    ) -> Result<AmountBounds> {
        let url = format!("{}/bounds", self.base_url);
        let params = BoundsParams {
            from,
            to,
            rate_mode,
        };

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch bounds from provider: {}", e);
                ProviderError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let bounds: BoundsResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse bounds response: {}", e))?;

        Ok(bounds.into())
    }

    async fn fetch_quote(&self, request: &SwapRequest) -> Result<Quote> {
        let url = format!("{}/quote", self.base_url);
        let params = QuoteParams::from(request);

        debug!("Requesting quote with parameters: {:?}", params);

        let response = self
            .http_client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch quote from provider: {}", e);
                ProviderError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: QuoteResponseBody = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse quote response: {}", e))?;

        Ok(body.into_quote(request.rate_mode))
    }
}

/// How long provider amount limits are trusted before they are fetched again
pub const BOUNDS_TTL: Duration = Duration::from_secs(10 * 60);

type BoundsKey = (String, String, RateMode);

/// Result of one quote fetch, stamped with the generation that issued it
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteResponse {
    pub generation: u64,
    pub result: std::result::Result<Quote, SwapError>,
}

/// Fetches quotes for swap requests, keeping at most one request live.
///
/// Every fetch takes a new generation number; a response is only worth
/// applying while its generation is still the current one.
pub struct QuoteService {
    provider: Arc<dyn QuoteProvider>,
    generation: AtomicU64,
    bounds_cache: Mutex<HashMap<BoundsKey, (AmountBounds, Instant)>>,
    timeout: Duration,
}

impl QuoteService {
    pub fn new(provider: Arc<dyn QuoteProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            generation: AtomicU64::new(0),
            bounds_cache: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Supersedes any in-flight fetch and returns the new generation
    pub fn start_request(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drops interest in any in-flight fetch without starting a new one
    pub fn invalidate(&self) {
        self.start_request();
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    /// Fetches a quote under a fresh generation
    pub async fn get_quote(&self, request: &SwapRequest) -> QuoteResponse {
        let generation = self.start_request();
        self.fetch_for_generation(generation, request).await
    }

    /// Fetches a quote for a generation obtained from [`Self::start_request`]
    pub async fn fetch_for_generation(
        &self,
        generation: u64,
        request: &SwapRequest,
    ) -> QuoteResponse {
        let result = self.fetch(request).await.map_err(|e| classify(&e));

        if !self.is_current(generation) {
            debug!(
                "Quote response for generation {} superseded by {}",
                generation,
                self.current_generation()
            );
        }

        QuoteResponse { generation, result }
    }

    async fn fetch(&self, request: &SwapRequest) -> Result<Quote> {
        request.validate()?;

        let key = Self::bounds_key(request);
        let bounds = self.bounds(&key).await?;
        if request.amount < bounds.min_amount {
            return Err(ProviderError::AmountTooLow {
                minimum: Some(bounds.min_amount),
            }
            .into());
        }
        if request.amount > bounds.max_amount {
            return Err(ProviderError::AmountTooHigh {
                maximum: Some(bounds.max_amount),
            }
            .into());
        }

        let quote = tokio::time::timeout(self.timeout, self.provider.fetch_quote(request))
            .await
            .map_err(|_| ProviderError::Unavailable("Quote request timed out".to_string()))?;

        // Provider refused on limits: refetch them on the next request
        if let Err(e) = &quote {
            if is_bounds_rejection(e) {
                self.evict_bounds(&key);
            }
        }
        let quote = quote?;

        info!(
            "Quote received: id={}, pair={}, amount={}, payout={}",
            quote.id,
            request.pair(),
            request.amount,
            quote.payout_amount
        );

        Ok(quote)
    }

    fn bounds_key(request: &SwapRequest) -> BoundsKey {
        (
            request.from_currency.clone(),
            request.to_currency.clone(),
            request.rate_mode,
        )
    }

    async fn bounds(&self, key: &BoundsKey) -> Result<AmountBounds> {
        {
            let cache = self
                .bounds_cache
                .lock()
                .map_err(|_| anyhow!("Bounds cache poisoned"))?;
            if let Some((bounds, fetched_at)) = cache.get(key) {
                if fetched_at.elapsed() < BOUNDS_TTL {
                    return Ok(*bounds);
                }
            }
        }

        let (from, to, rate_mode) = key;
        let bounds = tokio::time::timeout(
            self.timeout,
            self.provider.fetch_bounds(from, to, *rate_mode),
        )
        .await
        .map_err(|_| ProviderError::Unavailable("Bounds request timed out".to_string()))??;

        {
            let mut cache = self
                .bounds_cache
                .lock()
                .map_err(|_| anyhow!("Bounds cache poisoned"))?;
            cache.insert(key.clone(), (bounds, Instant::now()));
        }

        Ok(bounds)
    }

    fn evict_bounds(&self, key: &BoundsKey) {
        if let Ok(mut cache) = self.bounds_cache.lock() {
            if cache.remove(key).is_some() {
                debug!("Dropped cached bounds for {}/{}", key.0, key.1);
            }
        }
    }
}

fn is_bounds_rejection(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ProviderError>(),
            Some(ProviderError::AmountTooLow { .. } | ProviderError::AmountTooHigh { .. })
        )
    })
}
