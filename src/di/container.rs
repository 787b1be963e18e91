use std::sync::Arc;

use crate::config::AppConfig;
use crate::device::{DeviceSessionController, DeviceTransport, SigningCoordinator};
use crate::history::{HistoryReader, HistoryStore};
use crate::interactor::FlowDeps;
use crate::provider::{
    BroadcastService, Broadcaster, HttpBroadcaster, HttpQuoteProvider, QuoteProvider, QuoteService,
};

/// ServiceContainer provides access to core application dependencies
pub struct ServiceContainer {
    config: AppConfig,

    // History
    history: Arc<dyn HistoryStore>,
    history_reader: Arc<dyn HistoryReader>,

    // Provider services
    quote_service: Arc<QuoteService>,
    broadcast_service: Arc<BroadcastService>,

    // Device
    device: Arc<DeviceSessionController>,
    signer: Arc<SigningCoordinator>,
}

impl ServiceContainer {
    /// Create a container talking to the configured provider over HTTP
    pub fn new(
        config: AppConfig,
        history: Arc<dyn HistoryStore>,
        history_reader: Arc<dyn HistoryReader>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        let provider = Arc::new(HttpQuoteProvider::new(&config.provider_url));
        let broadcaster = Arc::new(HttpBroadcaster::new(&config.provider_url));

        Self::with_services(config, history, history_reader, transport, provider, broadcaster)
    }

    /// Create a container around explicit provider implementations
    pub fn with_services(
        config: AppConfig,
        history: Arc<dyn HistoryStore>,
        history_reader: Arc<dyn HistoryReader>,
        transport: Arc<dyn DeviceTransport>,
        provider: Arc<dyn QuoteProvider>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let quote_service = Arc::new(QuoteService::new(provider, config.quote_timeout()));
        let broadcast_service = Arc::new(BroadcastService::new(
            broadcaster,
            config.broadcast_timeout(),
        ));

        let device = DeviceSessionController::new(
            transport,
            config.device_open_timeout(),
            config.device_interaction_timeout(),
        );
        let signer = Arc::new(SigningCoordinator::new(
            device.clone(),
            &config.exchange_app_name,
        ));

        Self {
            config,
            history,
            history_reader,
            quote_service,
            broadcast_service,
            device,
            signer,
        }
    }

    /// Collaborators for a new swap flow
    pub fn flow_deps(&self) -> FlowDeps {
        FlowDeps {
            quote_service: self.quote_service.clone(),
            device: self.device.clone(),
            signer: self.signer.clone(),
            broadcaster: self.broadcast_service.clone(),
            history: self.history.clone(),
        }
    }

    // Accessor methods

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn history_reader(&self) -> Arc<dyn HistoryReader> {
        self.history_reader.clone()
    }

    pub fn device(&self) -> Arc<DeviceSessionController> {
        self.device.clone()
    }
}
