use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swap_flow::device::{DeviceSessionController, EmulatedDevice};
use swap_flow::history::{HistoryReader, HistoryStore, InMemoryHistoryStore};
use swap_flow::provider::{Broadcaster, QuoteProvider};
use swap_flow::{
    AmountBounds, AppConfig, BroadcastError, FlowState, ProviderError,
    Quote, RateMode, ServiceContainer, SwapFlowController, SwapFlowHandle, SwapRequest,
};

/// Quote provider with per-amount delays and failures
pub struct TestProvider {
    pub bounds: AmountBounds,
    pub delays: Mutex<HashMap<Decimal, Duration>>,
    pub failures: Mutex<HashMap<Decimal, ProviderError>>,
    pub quote_calls: AtomicUsize,
}

impl TestProvider {
    pub fn new() -> Self {
        Self {
            bounds: AmountBounds {
                min_amount: dec!(0.001),
                max_amount: dec!(10),
            },
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            quote_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuoteProvider for TestProvider {
    async fn fetch_bounds(&self, _: &str, _: &str, _: RateMode) -> Result<AmountBounds> {
        Ok(self.bounds)
    }

    async fn fetch_quote(&self, request: &SwapRequest) -> Result<Quote> {
        let call = self.quote_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&request.amount).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().unwrap().get(&request.amount).cloned();
        if let Some(failure) = failure {
            return Err(failure.into());
        }

        Ok(Quote {
            id: format!("q-{}-{}", call, request.amount),
            rate: dec!(16),
            rate_mode: request.rate_mode,
            expires_at: Utc::now() + ChronoDuration::minutes(5),
            provider_fee: dec!(0.0005),
            payout_amount: request.amount * dec!(16),
            min_amount: self.bounds.min_amount,
            max_amount: self.bounds.max_amount,
        })
    }
}

pub enum BroadcastMode {
    Accept(String),
    Reject(String),
    Hang,
}

pub struct TestBroadcaster {
    pub mode: Mutex<BroadcastMode>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Broadcaster for TestBroadcaster {
    async fn broadcast(&self, _: &str, _: &str, _: &[u8]) -> Result<String, BroadcastError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match &*self.mode.lock().unwrap() {
            BroadcastMode::Accept(id) => Some(Ok(id.clone())),
            BroadcastMode::Reject(reason) => Some(Err(BroadcastError::Rejected(reason.clone()))),
            BroadcastMode::Hang => None,
        };
        match outcome {
            Some(outcome) => outcome,
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BroadcastError::AmbiguousTimeout)
            }
        }
    }
}

pub struct Harness {
    pub flow: SwapFlowHandle,
    pub device: Arc<EmulatedDevice>,
    pub session: Arc<DeviceSessionController>,
    pub provider: Arc<TestProvider>,
    pub broadcaster: Arc<TestBroadcaster>,
    pub history: Arc<InMemoryHistoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        let config = AppConfig {
            quote_timeout_ms: 2_000,
            device_open_timeout_ms: 2_000,
            device_interaction_timeout_ms: 60_000,
            broadcast_timeout_ms: 200,
            ..AppConfig::default()
        };

        let device = Arc::new(EmulatedDevice::new("nano-test", &config.exchange_app_name));
        let provider = Arc::new(TestProvider::new());
        let broadcaster = Arc::new(TestBroadcaster {
            mode: Mutex::new(BroadcastMode::Accept("tx-123".to_string())),
            calls: AtomicUsize::new(0),
        });
        let history = Arc::new(InMemoryHistoryStore::new());
        let store: Arc<dyn HistoryStore> = history.clone();
        let reader: Arc<dyn HistoryReader> = history.clone();

        let container = ServiceContainer::with_services(
            config,
            store,
            reader,
            device.clone(),
            provider.clone(),
            broadcaster.clone(),
        );

        Self {
            flow: SwapFlowController::spawn(container.flow_deps()),
            device,
            session: container.device(),
            provider,
            broadcaster,
            history,
        }
    }

    /// Waits up to five seconds for a state with the given name
    pub async fn wait(&self, name: &str) -> FlowState {
        self.wait_until(|state| state.name() == name).await
    }

    pub async fn wait_until(&self, predicate: impl FnMut(&FlowState) -> bool) -> FlowState {
        match tokio::time::timeout(Duration::from_secs(5), self.flow.wait_for(predicate)).await {
            Ok(state) => state.unwrap(),
            Err(_) => panic!("flow stuck in {}", self.flow.state()),
        }
    }
}

pub fn request(amount: Decimal) -> SwapRequest {
    SwapRequest::new("BTC", "ETH", "btc-main", "eth-main", amount, RateMode::Float)
}
