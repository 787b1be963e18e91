use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceSessionController, SigningCoordinator};
use crate::entity::{
    BroadcastError, FlowError, FlowState, Quote, SigningError, SigningPhase, SigningResult,
    SummaryStep, SwapError, SwapHistoryEntry, SwapRequest, SwapStatus,
};
use crate::history::HistoryStore;
use crate::provider::{BroadcastService, QuoteResponse, QuoteService};

/// Shortest wait before an expiring quote is refreshed
const MIN_QUOTE_REFRESH: Duration = Duration::from_secs(1);

/// What the user can do to a running flow
#[derive(Debug, Clone, PartialEq)]
pub enum UserIntent {
    /// Amount, currency, account or rate mode changed
    UpdateRequest(SwapRequest),
    Continue,
    AcceptTerms(bool),
    Cancel,
    Retry,
    Reset,
}

enum FlowEvent {
    Intent(UserIntent),
    QuoteArrived(QuoteResponse),
    QuoteExpired {
        generation: u64,
    },
    Phase {
        attempt: u64,
        phase: SigningPhase,
    },
    Signed {
        attempt: u64,
        result: std::result::Result<SigningResult, FlowError>,
    },
    Broadcasted {
        attempt: u64,
        entry: SwapHistoryEntry,
        result: std::result::Result<String, BroadcastError>,
    },
}

/// Collaborators the flow orchestrates
#[derive(Clone)]
pub struct FlowDeps {
    pub quote_service: Arc<QuoteService>,
    pub device: Arc<DeviceSessionController>,
    pub signer: Arc<SigningCoordinator>,
    pub broadcaster: Arc<BroadcastService>,
    pub history: Arc<dyn HistoryStore>,
}

/// UI-side handle of a running swap flow
#[derive(Clone)]
pub struct SwapFlowHandle {
    events: mpsc::UnboundedSender<FlowEvent>,
    state: watch::Receiver<FlowState>,
}

impl SwapFlowHandle {
    pub fn send(&self, intent: UserIntent) -> Result<()> {
        self.events
            .send(FlowEvent::Intent(intent))
            .map_err(|_| anyhow!("Swap flow has stopped"))
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.clone()
    }

    /// Waits until the flow reaches a state matching `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&FlowState) -> bool) -> Result<FlowState> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(predicate)
            .await
            .map_err(|_| anyhow!("Swap flow has stopped"))?;
        Ok(reached.clone())
    }
}

/// Top-level swap state machine.
///
/// Runs as its own task; the UI talks to it through [`SwapFlowHandle`].
/// Quote fetches, the device step and the broadcast run in spawned tasks
/// that report back as events, so the flow keeps accepting cancels while
/// they are in flight. Late results are recognised by quote generation
/// and device attempt number and dropped.
pub struct SwapFlowController {
    deps: FlowDeps,
    state: watch::Sender<FlowState>,
    events_tx: mpsc::UnboundedSender<FlowEvent>,
    events_rx: mpsc::UnboundedReceiver<FlowEvent>,
    attempt: u64,
    cancel: Option<CancellationToken>,
    /// Latest device task; it owns the signing session until it returns
    device_task: Option<JoinHandle<()>>,
    expiry_timer: Option<JoinHandle<()>>,
}

impl SwapFlowController {
    pub fn spawn(deps: FlowDeps) -> SwapFlowHandle {
        let (state, state_rx) = watch::channel(FlowState::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let controller = Self {
            deps,
            state,
            events_tx: events_tx.clone(),
            events_rx,
            attempt: 0,
            cancel: None,
            device_task: None,
            expiry_timer: None,
        };
        tokio::spawn(controller.run());

        SwapFlowHandle {
            events: events_tx,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = self.state.closed() => {
                    debug!("Swap flow has no observers left, stopping");
                    break;
                }
            }
        }

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.stop_expiry_timer();
    }

    fn current(&self) -> FlowState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: FlowState) {
        let previous = self.state.borrow().name();
        info!("Swap flow {} -> {}", previous, next.name());
        self.state.send_replace(next);
    }

    async fn handle_event(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::Intent(intent) => self.handle_intent(intent),
            FlowEvent::QuoteArrived(response) => self.on_quote(response),
            FlowEvent::QuoteExpired { generation } => self.on_quote_expired(generation),
            FlowEvent::Phase { attempt, phase } => self.on_phase(attempt, phase),
            FlowEvent::Signed { attempt, result } => self.on_signed(attempt, result).await,
            FlowEvent::Broadcasted {
                attempt,
                entry,
                result,
            } => self.on_broadcasted(attempt, entry, result).await,
        }
    }

    fn handle_intent(&mut self, intent: UserIntent) {
        debug!("Swap flow intent {:?} in {}", intent, self.current().name());

        match intent {
            UserIntent::UpdateRequest(request) => self.on_update_request(request),
            UserIntent::Continue => self.on_continue(),
            UserIntent::AcceptTerms(accepted) => self.on_accept_terms(accepted),
            UserIntent::Cancel => self.on_cancel(),
            UserIntent::Retry => self.on_retry(),
            UserIntent::Reset => self.on_reset(),
        }
    }

    fn on_update_request(&mut self, request: SwapRequest) {
        let state = self.current();
        if state.is_device_step() {
            warn!("Ignoring form change while the device step is running");
            return;
        }
        if matches!(
            state,
            FlowState::Finished { .. } | FlowState::BroadcastUnknown { .. }
        ) {
            warn!("Ignoring form change on a finished flow, reset first");
            return;
        }

        if let Err(e) = request.validate() {
            debug!("Incomplete swap request: {}", e);
            self.clear_quote();
            self.transition(FlowState::Idle);
            return;
        }

        self.request_quote(request);
    }

    fn on_continue(&mut self) {
        match self.current() {
            FlowState::QuoteReady {
                request,
                quote,
                summary,
            } => {
                if quote.is_expired() {
                    info!("Quote {} expired before continue, refreshing", quote.id);
                    self.request_quote(request);
                    return;
                }
                match summary {
                    None => self.transition(FlowState::QuoteReady {
                        request,
                        quote,
                        summary: Some(SummaryStep::default()),
                    }),
                    Some(step) if step.terms_accepted => self.start_device_step(request, quote),
                    Some(_) => warn!("Continue ignored until provider terms are accepted"),
                }
            }
            other => debug!("Continue ignored in {}", other.name()),
        }
    }

    fn on_accept_terms(&mut self, accepted: bool) {
        if let FlowState::QuoteReady {
            request,
            quote,
            summary: Some(_),
        } = self.current()
        {
            self.transition(FlowState::QuoteReady {
                request,
                quote,
                summary: Some(SummaryStep {
                    terms_accepted: accepted,
                }),
            });
        }
    }

    fn on_cancel(&mut self) {
        match self.current() {
            FlowState::QuoteRequested { .. } => {
                self.clear_quote();
                self.transition(FlowState::Idle);
            }
            FlowState::QuoteReady {
                request,
                quote,
                summary: Some(_),
            } => self.transition(FlowState::QuoteReady {
                request,
                quote,
                summary: None,
            }),
            FlowState::SummaryConfirmed { request, quote }
            | FlowState::DeviceOpening { request, quote }
            | FlowState::DeviceConfirm { request, quote, .. } => {
                self.abandon_attempt();
                self.back_to_quote(request, quote);
            }
            FlowState::Signing { request, quote, .. } => {
                self.abandon_attempt();
                self.transition(FlowState::Failed {
                    request,
                    quote,
                    error: FlowError::Signing(SigningError::UserCancelled),
                });
            }
            FlowState::Broadcasting { swap_id, .. } => {
                warn!("Swap {} is already broadcasting and cannot be cancelled", swap_id);
            }
            other => debug!("Cancel ignored in {}", other.name()),
        }
    }

    fn on_retry(&mut self) {
        match self.current() {
            FlowState::QuoteError { request, .. } => self.request_quote(request),
            FlowState::Failed {
                request,
                quote,
                error,
            } => {
                if error.is_recoverable() && !quote.is_expired() {
                    self.start_device_step(request, quote);
                } else {
                    self.request_quote(request);
                }
            }
            other => debug!("Retry ignored in {}", other.name()),
        }
    }

    fn on_reset(&mut self) {
        let state = self.current();
        if state.is_device_step() {
            warn!("Reset ignored while the device step is running");
            return;
        }
        self.clear_quote();
        self.transition(FlowState::Idle);
    }

    fn clear_quote(&mut self) {
        self.deps.quote_service.invalidate();
        self.stop_expiry_timer();
    }

    fn request_quote(&mut self, request: SwapRequest) {
        self.stop_expiry_timer();
        let generation = self.deps.quote_service.start_request();
        self.transition(FlowState::QuoteRequested {
            request: request.clone(),
        });

        let quote_service = self.deps.quote_service.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let response = quote_service.fetch_for_generation(generation, &request).await;
            let _ = events.send(FlowEvent::QuoteArrived(response));
        });
    }

    fn on_quote(&mut self, response: QuoteResponse) {
        if !self.deps.quote_service.is_current(response.generation) {
            debug!("Dropping superseded quote response {}", response.generation);
            return;
        }

        let FlowState::QuoteRequested { request } = self.current() else {
            debug!("Dropping quote response outside of QuoteRequested");
            return;
        };

        match response.result {
            Ok(quote) if quote.is_expired() => {
                warn!("Quote {} arrived already expired", quote.id);
                self.transition(FlowState::QuoteError {
                    request,
                    error: SwapError::Unknown("Quote expired on arrival".to_string()),
                });
            }
            Ok(quote) => {
                self.schedule_expiry(response.generation, quote.time_to_expiry());
                self.transition(FlowState::QuoteReady {
                    request,
                    quote,
                    summary: None,
                });
            }
            Err(error) => {
                warn!("Quote for {} failed: {}", request.pair(), error);
                self.transition(FlowState::QuoteError { request, error });
            }
        }
    }

    fn schedule_expiry(&mut self, generation: u64, delay: Duration) {
        self.stop_expiry_timer();
        let delay = delay.max(MIN_QUOTE_REFRESH);
        let events = self.events_tx.clone();
        self.expiry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(FlowEvent::QuoteExpired { generation });
        }));
    }

    fn stop_expiry_timer(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
    }

    fn on_quote_expired(&mut self, generation: u64) {
        if !self.deps.quote_service.is_current(generation) {
            return;
        }
        if let FlowState::QuoteReady { request, quote, .. } = self.current() {
            info!("Quote {} expired, requesting a new one", quote.id);
            self.request_quote(request);
        }
    }

    /// Returns to the ready quote after an abandoned device step
    fn back_to_quote(&mut self, request: SwapRequest, quote: Quote) {
        if quote.is_expired() {
            self.request_quote(request);
            return;
        }
        let generation = self.deps.quote_service.current_generation();
        self.schedule_expiry(generation, quote.time_to_expiry());
        self.transition(FlowState::QuoteReady {
            request,
            quote,
            summary: None,
        });
    }

    /// Invalidates the running device attempt; its results will be dropped
    fn abandon_attempt(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.attempt += 1;
    }

    fn start_device_step(&mut self, request: SwapRequest, quote: Quote) {
        self.stop_expiry_timer();
        self.transition(FlowState::SummaryConfirmed {
            request: request.clone(),
            quote: quote.clone(),
        });

        self.attempt += 1;
        let attempt = self.attempt;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        self.transition(FlowState::DeviceOpening {
            request: request.clone(),
            quote: quote.clone(),
        });

        let device = self.deps.device.clone();
        let signer = self.deps.signer.clone();
        let events = self.events_tx.clone();
        let previous = self.device_task.take();
        self.device_task = Some(tokio::spawn(async move {
            // An abandoned attempt keeps the session until its device abort returns
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FlowError::Signing(SigningError::UserCancelled)),
                result = device.connect() => result.map_err(FlowError::from),
            };

            let result = match connected {
                Ok(()) => {
                    let phases = events.clone();
                    signer
                        .sign(&request, &quote, &cancel, &move |phase| {
                            let _ = phases.send(FlowEvent::Phase { attempt, phase });
                        })
                        .await
                        .map_err(FlowError::from)
                }
                Err(e) => Err(e),
            };

            let _ = events.send(FlowEvent::Signed { attempt, result });
        }));
    }

    fn on_phase(&mut self, attempt: u64, phase: SigningPhase) {
        if attempt != self.attempt {
            return;
        }

        match (self.current(), phase) {
            (
                FlowState::DeviceOpening { request, quote },
                SigningPhase::AwaitingConfirmation { swap_id },
            ) => self.transition(FlowState::DeviceConfirm {
                request,
                quote,
                swap_id,
            }),
            (
                FlowState::DeviceConfirm { request, quote, .. },
                SigningPhase::Signing { swap_id },
            ) => self.transition(FlowState::Signing {
                request,
                quote,
                swap_id,
            }),
            (state, phase) => debug!("Device phase {:?} in {}", phase, state.name()),
        }
    }

    async fn on_signed(
        &mut self,
        attempt: u64,
        result: std::result::Result<SigningResult, FlowError>,
    ) {
        if attempt != self.attempt {
            debug!("Discarding result of abandoned device attempt {}", attempt);
            return;
        }
        self.cancel = None;

        let state = self.current();
        let (Some(request), Some(quote)) = (state.request().cloned(), state.quote().cloned())
        else {
            warn!("Signing finished in unexpected state {}", state.name());
            return;
        };

        let signing = match result {
            Ok(signing) => signing,
            Err(error) if error.is_user_cancelled() && !matches!(state, FlowState::Signing { .. }) => {
                info!("Swap declined on device");
                self.back_to_quote(request, quote);
                return;
            }
            Err(error) => {
                warn!("Device step failed: {}", error);
                self.transition(FlowState::Failed {
                    request,
                    quote,
                    error,
                });
                return;
            }
        };

        let entry = SwapHistoryEntry {
            swap_id: signing.swap_provider_id.clone(),
            from_account_id: request.from_account_id.clone(),
            to_account_id: request.to_account_id.clone(),
            quote: quote.clone(),
            status: SwapStatus::Pending,
            transaction_id: None,
            created_at: Utc::now(),
        };

        // Nothing is broadcast unless its attempt is on record
        if let Err(e) = self.deps.history.record(&entry).await {
            error!("Failed to record swap {}: {}", entry.swap_id, e);
            self.transition(FlowState::Failed {
                request,
                quote,
                error: e.into(),
            });
            return;
        }

        self.transition(FlowState::Broadcasting {
            request: request.clone(),
            quote,
            swap_id: entry.swap_id.clone(),
        });

        let broadcaster = self.deps.broadcaster.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = broadcaster.broadcast(&request, &signing).await;
            let _ = events.send(FlowEvent::Broadcasted {
                attempt,
                entry,
                result,
            });
        });
    }

    async fn on_broadcasted(
        &mut self,
        attempt: u64,
        entry: SwapHistoryEntry,
        result: std::result::Result<String, BroadcastError>,
    ) {
        if attempt != self.attempt {
            warn!("Broadcast result for stale attempt {}", attempt);
        }

        let state = self.current();
        match result {
            Ok(transaction_id) => {
                let finished =
                    entry.with_outcome(SwapStatus::Finished, Some(transaction_id.clone()));
                if let Err(e) = self.deps.history.record(&finished).await {
                    error!("Failed to record finished swap {}: {}", entry.swap_id, e);
                }
                self.transition(FlowState::Finished {
                    swap_id: entry.swap_id,
                    transaction_id,
                });
            }
            Err(BroadcastError::AmbiguousTimeout) => {
                warn!(
                    "Swap {} left PENDING, broadcast outcome needs reconciliation",
                    entry.swap_id
                );
                self.transition(FlowState::BroadcastUnknown {
                    swap_id: entry.swap_id,
                });
            }
            Err(BroadcastError::Rejected(reason)) => {
                let failed = entry.with_outcome(SwapStatus::Failed, None);
                if let Err(e) = self.deps.history.record(&failed).await {
                    error!("Failed to record failed swap {}: {}", entry.swap_id, e);
                }
                let request = state.request().cloned();
                match request {
                    Some(request) => self.transition(FlowState::Failed {
                        request,
                        quote: entry.quote,
                        error: FlowError::Broadcast(BroadcastError::Rejected(reason)),
                    }),
                    None => warn!("Broadcast rejected in unexpected state {}", state.name()),
                }
            }
        }
    }
}
