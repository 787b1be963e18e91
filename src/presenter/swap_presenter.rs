use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::entity::{DeviceSession, FlowState, Quote, RateMode, SwapRequest};
use crate::history::HistoryReader;
use crate::interactor::error_classifier::{buy_affordance, BuyAffordance};
use crate::utils::format_amount;
use crate::view::swap_view::SwapView;

/// Quote figures shown on the form and the summary
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSummary {
    pub quote_id: String,
    pub send: String,
    pub receive: String,
    pub rate: String,
    pub fee: String,
    pub rate_mode: RateMode,
    pub expires_at: DateTime<Utc>,
}

impl QuoteSummary {
    fn new(request: &SwapRequest, quote: &Quote) -> Self {
        Self {
            quote_id: quote.id.clone(),
            send: format_amount(request.amount, &request.from_currency),
            receive: format_amount(quote.payout_amount, &request.to_currency),
            rate: format!(
                "1 {} = {}",
                request.from_currency,
                format_amount(quote.rate, &request.to_currency)
            ),
            fee: format_amount(quote.provider_fee, &request.from_currency),
            rate_mode: quote.rate_mode,
            expires_at: quote.expires_at,
        }
    }
}

/// Error shown on the form
#[derive(Debug, Clone, PartialEq)]
pub struct FormError {
    /// Translation key for quote errors, none for device and broadcast failures
    pub message_key: Option<&'static str>,
    pub message: String,
    pub buy: Option<BuyAffordance>,
    pub retry_available: bool,
}

/// Everything the swap form renders for one flow state
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFormModel {
    pub step: &'static str,
    pub continue_enabled: bool,
    pub summary_open: bool,
    pub terms_accepted: bool,
    pub loading: bool,
    pub quote: Option<QuoteSummary>,
    pub error: Option<FormError>,
    pub device_prompt: Option<String>,
    pub swap_id: Option<String>,
    pub transaction_id: Option<String>,
}

/// Builds the form model for a flow state
pub fn form_model(state: &FlowState, buy_supported: &HashSet<String>) -> SwapFormModel {
    let mut model = SwapFormModel {
        step: state.name(),
        continue_enabled: false,
        summary_open: false,
        terms_accepted: false,
        loading: false,
        quote: match (state.request(), state.quote()) {
            (Some(request), Some(quote)) => Some(QuoteSummary::new(request, quote)),
            _ => None,
        },
        error: None,
        device_prompt: None,
        swap_id: None,
        transaction_id: None,
    };

    match state {
        FlowState::Idle => {}
        FlowState::QuoteRequested { .. } => model.loading = true,
        FlowState::QuoteReady { summary, .. } => match summary {
            None => model.continue_enabled = true,
            Some(step) => {
                model.summary_open = true;
                model.terms_accepted = step.terms_accepted;
                model.continue_enabled = step.terms_accepted;
            }
        },
        FlowState::QuoteError { request, error } => {
            model.error = Some(FormError {
                message_key: Some(error.kind().message_key()),
                message: error.to_string(),
                buy: buy_affordance(
                    error,
                    &request.from_currency,
                    &request.from_account_id,
                    buy_supported,
                ),
                retry_available: true,
            });
        }
        FlowState::SummaryConfirmed { .. } | FlowState::DeviceOpening { .. } => {
            model.loading = true;
            model.device_prompt = Some("Connect your device and open the Exchange app".to_string());
        }
        FlowState::DeviceConfirm { swap_id, .. } => {
            model.swap_id = Some(swap_id.clone());
            model.device_prompt = Some("Review and confirm the swap on your device".to_string());
        }
        FlowState::Signing { swap_id, .. } => {
            model.swap_id = Some(swap_id.clone());
            model.device_prompt = Some("Signing transaction on your device".to_string());
        }
        FlowState::Broadcasting { swap_id, .. } => {
            model.loading = true;
            model.swap_id = Some(swap_id.clone());
        }
        FlowState::Finished {
            swap_id,
            transaction_id,
        } => {
            model.swap_id = Some(swap_id.clone());
            model.transaction_id = Some(transaction_id.clone());
        }
        FlowState::BroadcastUnknown { swap_id } => {
            model.swap_id = Some(swap_id.clone());
            model.error = Some(FormError {
                message_key: None,
                message: "Broadcast timed out; the swap may still complete. Check its status in history before trying again".to_string(),
                buy: None,
                retry_available: false,
            });
        }
        FlowState::Failed { error, .. } => {
            model.error = Some(FormError {
                message_key: None,
                message: error.to_string(),
                buy: None,
                retry_available: true,
            });
        }
    }

    model
}

#[async_trait]
pub trait SwapPresenter: Send + Sync {
    async fn present_state(&self, state: &FlowState) -> Result<()>;
    async fn present_history(&self) -> Result<()>;
    async fn present_device(&self, session: &DeviceSession) -> Result<()>;
    async fn present_usage(&self) -> Result<()>;
    async fn present_error(&self, message: &str) -> Result<()>;
}

pub struct SwapPresenterImpl<V> {
    view: Arc<V>,
    history: Arc<dyn HistoryReader>,
    buy_supported: HashSet<String>,
}

impl<V> SwapPresenterImpl<V>
where
    V: SwapView,
{
    pub fn new(view: Arc<V>, history: Arc<dyn HistoryReader>, buy_supported: HashSet<String>) -> Self {
        Self {
            view,
            history,
            buy_supported,
        }
    }

    /// Renders every flow state change until the flow stops
    pub async fn run(self: Arc<Self>, mut states: watch::Receiver<FlowState>) {
        loop {
            let state = states.borrow_and_update().clone();
            if let Err(e) = self.present_state(&state).await {
                warn!("Failed to render swap form: {}", e);
            }
            if states.changed().await.is_err() {
                debug!("Swap flow closed, presenter stopping");
                break;
            }
        }
    }
}

#[async_trait]
impl<V> SwapPresenter for SwapPresenterImpl<V>
where
    V: SwapView + Send + Sync,
{
    async fn present_state(&self, state: &FlowState) -> Result<()> {
        let model = form_model(state, &self.buy_supported);
        self.view.display_form(&model).await
    }

    async fn present_history(&self) -> Result<()> {
        match self.history.list().await {
            Ok(entries) => self.view.display_history(&entries).await,
            Err(e) => {
                self.view
                    .display_error(&format!("Failed to load swap history: {}", e))
                    .await
            }
        }
    }

    async fn present_device(&self, session: &DeviceSession) -> Result<()> {
        self.view.display_device(session).await
    }

    async fn present_usage(&self) -> Result<()> {
        self.view.display_usage().await
    }

    async fn present_error(&self, message: &str) -> Result<()> {
        self.view.display_error(message).await
    }
}
